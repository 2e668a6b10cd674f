/// Cry detection service module
///
/// Wires the window buffer, classifier and hysteresis into one pipeline per
/// monitored stream. `CryDetector` is the synchronous pipeline;
/// `CryDetectionService` runs it on a dedicated worker task fed through a
/// bounded channel, so audio capture never waits on classification.

use crate::audio_buffer::{AudioBufferError, AudioSample, WindowBuffer, WindowConfig, SAMPLE_RATE};
use crate::classifier::{build_classifier, Classification, ClassifierError, ClassifierKind, CryClassifier};
use crate::features::{FeatureError, MfccConfig};
use crate::hysteresis::{CryEvent, CryStateMachine, HysteresisConfig, HysteresisError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Default confidence a positive window needs to count towards crying
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Window buffer error: {0}")]
    Buffer(#[from] AudioBufferError),

    #[error("Feature configuration error: {0}")]
    Features(#[from] FeatureError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Hysteresis error: {0}")]
    Hysteresis(#[from] HysteresisError),

    #[error("Failed to read config {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Audio queue full")]
    QueueFull,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Detection worker failed: {0}")]
    WorkerFailed(String),
}

/// Configuration for the cry detection pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Sample rate of the incoming stream (Hz)
    pub sample_rate: usize,

    /// Window and hop sizes
    pub window: WindowConfig,

    /// Debounce parameters
    pub hysteresis: HysteresisConfig,

    /// Feature extraction for the model classifier
    pub mfcc: MfccConfig,

    /// Which classifier to build
    pub classifier: ClassifierKind,

    /// Minimum confidence for a positive window (0.0 - 1.0)
    pub confidence_threshold: f32,

    /// Pending audio chunks before `on_audio_chunk` waits
    pub queue_capacity: usize,

    /// Buffered events per subscriber before it lags
    pub event_capacity: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            window: WindowConfig::default(),
            hysteresis: HysteresisConfig::default(),
            mfcc: MfccConfig::default(),
            classifier: ClassifierKind::default(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            queue_capacity: 64,
            event_capacity: 32,
        }
    }
}

impl DetectorConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let json = fs::read_to_string(path).map_err(|source| DetectorError::ConfigIo {
            path: display.clone(),
            source,
        })?;

        serde_json::from_str(&json).map_err(|source| DetectorError::ConfigParse { path: display, source })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.sample_rate == 0 {
            return Err(DetectorError::InvalidConfig(
                "sample_rate must be greater than 0".to_string(),
            ));
        }

        if self.mfcc.sample_rate != self.sample_rate {
            return Err(DetectorError::InvalidConfig(format!(
                "MFCC sample rate {}Hz does not match stream sample rate {}Hz",
                self.mfcc.sample_rate, self.sample_rate
            )));
        }

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(DetectorError::InvalidConfig(
                "confidence_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if let ClassifierKind::Amplitude { threshold } = self.classifier {
            if threshold < 0 {
                return Err(ClassifierError::InvalidThreshold(threshold).into());
            }
        }

        if self.queue_capacity == 0 || self.event_capacity == 0 {
            return Err(DetectorError::InvalidConfig(
                "queue_capacity and event_capacity must be greater than 0".to_string(),
            ));
        }

        self.window.validate()?;
        self.hysteresis.validate()?;
        self.mfcc.validate()?;

        Ok(())
    }
}

/// Pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectorStats {
    pub windows_processed: u64,
    pub positive_windows: u64,
    pub classification_failures: u64,
    pub events_emitted: u64,
    pub buffered_samples: usize,
}

/// Snapshot of the detection state
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionStatus {
    pub is_cry_detected: bool,
    pub last_confidence: f32,
    pub confidence_threshold: f32,
    pub stats: DetectorStats,
}

/// Synchronous cry detection pipeline for one stream
///
/// Owns all mutable session state. Each call to `process_audio` is applied in
/// full before it returns.
pub struct CryDetector {
    classifier: Arc<dyn CryClassifier>,
    buffer: WindowBuffer,
    state_machine: CryStateMachine,
    confidence_threshold: f32,
    stats: DetectorStats,
}

impl CryDetector {
    /// Create a pipeline, building the configured classifier
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectorError> {
        config.validate()?;
        let classifier = build_classifier(&config.classifier, &config.mfcc)?;
        Self::with_classifier(config, classifier)
    }

    /// Create a pipeline around an existing classifier
    pub fn with_classifier(
        config: &DetectorConfig,
        classifier: Arc<dyn CryClassifier>,
    ) -> Result<Self, DetectorError> {
        config.validate()?;

        info!(
            "Initializing cry detector: classifier={}, window={} samples, hop={} samples",
            classifier.name(),
            config.window.window_samples,
            config.window.hop_samples
        );
        debug!("Confidence threshold: {}", config.confidence_threshold);

        Ok(Self {
            classifier,
            buffer: WindowBuffer::with_config(config.window, config.sample_rate)?,
            state_machine: CryStateMachine::with_config(config.hysteresis)?,
            confidence_threshold: config.confidence_threshold,
            stats: DetectorStats::default(),
        })
    }

    /// Process incoming audio samples
    ///
    /// Returns the transitions produced by every window the chunk completed.
    /// Empty chunks are ignored.
    pub fn process_audio(&mut self, samples: &[AudioSample]) -> Vec<CryEvent> {
        if samples.is_empty() {
            return Vec::new();
        }

        self.buffer.write(samples);

        let mut events = Vec::new();
        while let Some(window) = self.buffer.next_window() {
            events.extend(self.process_window(&window));
        }

        events
    }

    /// End of stream: classify the zero-padded windows that drain the buffer
    pub fn finish(&mut self) -> Vec<CryEvent> {
        let windows = self.buffer.flush();
        debug!("Finishing stream with {} trailing windows", windows.len());

        windows
            .iter()
            .filter_map(|window| self.process_window(window))
            .collect()
    }

    fn process_window(&mut self, window: &[AudioSample]) -> Option<CryEvent> {
        self.stats.windows_processed += 1;

        // A panicking classifier must not take the rest of the chunk with it
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.classifier.classify(window)));

        let classification = match outcome {
            Ok(Ok(classification)) => classification,
            Ok(Err(e)) => {
                error!(
                    "Classification error on window {}: {}",
                    self.stats.windows_processed, e
                );
                self.stats.classification_failures += 1;
                Classification::negative()
            }
            Err(_) => {
                error!(
                    "Classifier {} panicked on window {}",
                    self.classifier.name(),
                    self.stats.windows_processed
                );
                self.stats.classification_failures += 1;
                Classification::negative()
            }
        };

        let gated = Classification {
            is_cry: classification.is_cry && classification.confidence >= self.confidence_threshold,
            confidence: classification.confidence,
        };

        if gated.is_cry {
            self.stats.positive_windows += 1;
        }

        trace!(
            "Window {}: is_cry={}, confidence={:.2}",
            self.stats.windows_processed,
            gated.is_cry,
            gated.confidence
        );

        let event = self.state_machine.process(gated);
        if event.is_some() {
            self.stats.events_emitted += 1;
        }

        if self.stats.windows_processed % 1000 == 0 {
            debug!(
                "Processed {} windows, emitted {} events",
                self.stats.windows_processed, self.stats.events_emitted
            );
        }

        event
    }

    pub fn is_cry_detected(&self) -> bool {
        self.state_machine.is_cry_detected()
    }

    pub fn last_confidence(&self) -> f32 {
        self.state_machine.last_confidence()
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Set the confidence threshold, clamped to [0, 1]
    ///
    /// NaN leaves the threshold unchanged. Returns the value in effect.
    pub fn set_confidence_threshold(&mut self, threshold: f32) -> f32 {
        if threshold.is_nan() {
            warn!("Ignoring NaN confidence threshold");
        } else {
            self.confidence_threshold = threshold.clamp(0.0, 1.0);
            debug!("Confidence threshold set to {}", self.confidence_threshold);
        }

        self.confidence_threshold
    }

    /// Get current statistics
    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            buffered_samples: self.buffer.len(),
            ..self.stats
        }
    }

    /// Snapshot of the detection state
    pub fn status(&self) -> DetectionStatus {
        DetectionStatus {
            is_cry_detected: self.is_cry_detected(),
            last_confidence: self.last_confidence(),
            confidence_threshold: self.confidence_threshold,
            stats: self.stats(),
        }
    }

    /// Reset session state (buffer, hysteresis and counters)
    ///
    /// The confidence threshold is a setting and survives the reset.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state_machine.reset();
        self.stats = DetectorStats::default();
        info!("Detector reset");
    }
}

enum Command {
    Audio(Vec<AudioSample>),
    SetThreshold(f32, oneshot::Sender<f32>),
    Reset(oneshot::Sender<()>),
    Finish(oneshot::Sender<()>),
    Drain(oneshot::Sender<()>),
}

/// Cry detection service for one monitored stream
///
/// Chunks are processed strictly in arrival order by a single worker task.
/// Transitions are broadcast to subscribers; the latest state is published
/// through a watch channel for cheap queries.
pub struct CryDetectionService {
    command_tx: mpsc::Sender<Command>,
    event_tx: broadcast::Sender<CryEvent>,
    status_rx: watch::Receiver<DetectionStatus>,
    worker: JoinHandle<()>,
}

impl CryDetectionService {
    /// Build the pipeline and start the worker
    ///
    /// Fails when the classifier cannot be built (e.g. missing model). Must be
    /// called from within a Tokio runtime.
    pub async fn start(config: DetectorConfig) -> Result<Self, DetectorError> {
        let detector = CryDetector::new(&config)?;
        Ok(Self::spawn(detector, &config))
    }

    /// Start the worker around an existing classifier
    pub async fn with_classifier(
        config: DetectorConfig,
        classifier: Arc<dyn CryClassifier>,
    ) -> Result<Self, DetectorError> {
        let detector = CryDetector::with_classifier(&config, classifier)?;
        Ok(Self::spawn(detector, &config))
    }

    fn spawn(detector: CryDetector, config: &DetectorConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.queue_capacity);
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let (status_tx, status_rx) = watch::channel(detector.status());

        let worker = tokio::spawn(run_worker(
            Arc::new(Mutex::new(detector)),
            command_rx,
            event_tx.clone(),
            status_tx,
        ));

        info!("Cry detection service started");

        Self {
            command_tx,
            event_tx,
            status_rx,
            worker,
        }
    }

    /// Queue an audio chunk for processing
    ///
    /// Waits while the queue is full. Empty chunks are ignored. If the future
    /// is dropped before the chunk is queued, nothing is applied.
    pub async fn on_audio_chunk(&self, samples: Vec<AudioSample>) -> Result<(), DetectorError> {
        if samples.is_empty() {
            return Ok(());
        }

        self.command_tx
            .send(Command::Audio(samples))
            .await
            .map_err(|_| DetectorError::ChannelClosed)
    }

    /// Queue an audio chunk without waiting, for real-time capture callbacks
    pub fn try_on_audio_chunk(&self, samples: Vec<AudioSample>) -> Result<(), DetectorError> {
        if samples.is_empty() {
            return Ok(());
        }

        self.command_tx.try_send(Command::Audio(samples)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DetectorError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DetectorError::ChannelClosed,
        })
    }

    /// Subscribe to cry transitions
    pub fn subscribe(&self) -> broadcast::Receiver<CryEvent> {
        self.event_tx.subscribe()
    }

    /// Watch the detection state as it changes
    pub fn watch_status(&self) -> watch::Receiver<DetectionStatus> {
        self.status_rx.clone()
    }

    /// Latest published detection state
    pub fn status(&self) -> DetectionStatus {
        *self.status_rx.borrow()
    }

    pub fn is_cry_detected(&self) -> bool {
        self.status().is_cry_detected
    }

    pub fn last_confidence(&self) -> f32 {
        self.status().last_confidence
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.status().confidence_threshold
    }

    /// Set the confidence threshold (clamped to [0, 1]); returns the value in effect
    pub async fn set_confidence_threshold(&self, threshold: f32) -> Result<f32, DetectorError> {
        self.request(|ack| Command::SetThreshold(threshold, ack)).await
    }

    /// Reset all session state once previously queued chunks are processed
    pub async fn reset(&self) -> Result<(), DetectorError> {
        self.request(Command::Reset).await
    }

    /// Signal end of stream and process the zero-padded tail
    pub async fn finish(&self) -> Result<(), DetectorError> {
        self.request(Command::Finish).await
    }

    /// Wait until every chunk queued so far has been processed
    pub async fn drain(&self) -> Result<(), DetectorError> {
        self.request(Command::Drain).await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, DetectorError> {
        let (ack_tx, ack_rx) = oneshot::channel();

        self.command_tx
            .send(command(ack_tx))
            .await
            .map_err(|_| DetectorError::ChannelClosed)?;

        ack_rx.await.map_err(|_| DetectorError::ChannelClosed)
    }

    /// Stop accepting audio and wait for the worker to finish queued work
    pub async fn shutdown(self) -> Result<(), DetectorError> {
        drop(self.command_tx);
        self.worker
            .await
            .map_err(|e| DetectorError::WorkerFailed(e.to_string()))?;

        info!("Cry detection service stopped");
        Ok(())
    }
}

/// Run a pipeline step on the blocking pool
async fn run_blocking<T, F>(detector: &Arc<Mutex<CryDetector>>, step: F) -> Result<T, DetectorError>
where
    T: Send + 'static,
    F: FnOnce(&mut CryDetector) -> T + Send + 'static,
{
    let detector = Arc::clone(detector);

    tokio::task::spawn_blocking(move || {
        let mut detector = detector.lock();
        step(&mut detector)
    })
    .await
    .map_err(|e| DetectorError::WorkerFailed(e.to_string()))
}

async fn run_worker(
    detector: Arc<Mutex<CryDetector>>,
    mut command_rx: mpsc::Receiver<Command>,
    event_tx: broadcast::Sender<CryEvent>,
    status_tx: watch::Sender<DetectionStatus>,
) {
    // Status is published before a command is acknowledged, so callers
    // awaiting the ack observe its effect.
    while let Some(command) = command_rx.recv().await {
        match command {
            Command::Audio(samples) => {
                match run_blocking(&detector, move |d| d.process_audio(&samples)).await {
                    Ok(events) => publish(&event_tx, events),
                    Err(e) => error!("Failed to process audio chunk: {}", e),
                }
                publish_status(&detector, &status_tx);
            }
            Command::Finish(ack) => {
                match run_blocking(&detector, |d| d.finish()).await {
                    Ok(events) => publish(&event_tx, events),
                    Err(e) => error!("Failed to flush stream: {}", e),
                }
                publish_status(&detector, &status_tx);
                let _ = ack.send(());
            }
            Command::SetThreshold(threshold, ack) => {
                let value = detector.lock().set_confidence_threshold(threshold);
                publish_status(&detector, &status_tx);
                let _ = ack.send(value);
            }
            Command::Reset(ack) => {
                detector.lock().reset();
                publish_status(&detector, &status_tx);
                let _ = ack.send(());
            }
            Command::Drain(ack) => {
                let _ = ack.send(());
            }
        }
    }

    debug!("Command channel closed, detection worker exiting");
}

fn publish_status(detector: &Mutex<CryDetector>, status_tx: &watch::Sender<DetectionStatus>) {
    let status = detector.lock().status();
    status_tx.send_replace(status);
}

fn publish(event_tx: &broadcast::Sender<CryEvent>, events: Vec<CryEvent>) {
    for event in events {
        if event_tx.send(event).is_err() {
            trace!("No subscribers for cry event");
        }
    }
}
