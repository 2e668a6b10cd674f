/// Cry monitor binary
///
/// Streams a WAV recording through the cry detection pipeline as if it were
/// live audio and reports every cry transition.

use anyhow::{Context, Result};
use clap::Parser;
use cry_detector::{
    init_logging, read_wav_mono, ClassifierKind, CryDetectionService, CryEvent, DetectorConfig,
};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cry-monitor")]
#[command(about = "Detect baby crying in a 16kHz WAV recording", long_about = None)]
struct Cli {
    /// WAV file to monitor
    input: PathBuf,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the logistic model at this path instead of the amplitude threshold
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Amplitude threshold (0-32767)
    #[arg(long)]
    threshold: Option<i16>,

    /// Minimum confidence for a positive window (0.0-1.0)
    #[arg(long)]
    confidence: Option<f32>,

    /// Samples per chunk fed to the pipeline
    #[arg(long, default_value_t = 1024)]
    chunk_size: usize,

    /// Print events as JSON lines on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    info!("Starting cry monitor on {}", cli.input.display());

    let samples = read_wav_mono(&cli.input, config.sample_rate as u32)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;

    let service = CryDetectionService::start(config)
        .await
        .context("Failed to start cry detection")?;

    let mut events = service.subscribe();
    let json = cli.json;
    let reporter = tokio::spawn(async move {
        let mut reported = 0usize;
        loop {
            match events.recv().await {
                Ok(event) => {
                    report(&event, json);
                    reported += 1;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Missed {} cry events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        reported
    });

    for chunk in samples.chunks(cli.chunk_size.max(1)) {
        service.on_audio_chunk(chunk.to_vec()).await?;
    }
    service.finish().await?;

    let status = service.status();
    service.shutdown().await?;
    let reported = reporter.await?;

    info!(
        "Processed {} windows ({} positive, {} failures), {} events, crying at end: {}",
        status.stats.windows_processed,
        status.stats.positive_windows,
        status.stats.classification_failures,
        reported,
        status.is_cry_detected
    );

    Ok(())
}

fn report(event: &CryEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to serialize event: {}", e),
        }
        return;
    }

    match event {
        CryEvent::Started { confidence, timestamp } => {
            info!("Cry started: confidence={:.2}, timestamp={}", confidence, timestamp);
        }
        CryEvent::Stopped { timestamp, duration_ms } => {
            info!("Cry stopped: duration={}ms, timestamp={}", duration_ms, timestamp);
        }
    }
}

/// Load configuration from file, environment, then command line
fn load_config(cli: &Cli) -> Result<DetectorConfig> {
    let mut config = match &cli.config {
        Some(path) => DetectorConfig::from_json_file(path)?,
        None => DetectorConfig::default(),
    };

    if let Ok(path) = std::env::var("CRY_MODEL_PATH") {
        config.classifier = ClassifierKind::Model { model_path: path.into() };
    }

    if let Ok(value) = std::env::var("CRY_AMPLITUDE_THRESHOLD") {
        let threshold = value
            .parse::<i16>()
            .with_context(|| format!("Invalid CRY_AMPLITUDE_THRESHOLD: {}", value))?;
        config.classifier = ClassifierKind::Amplitude { threshold };
    }

    if let Ok(value) = std::env::var("CRY_CONFIDENCE_THRESHOLD") {
        config.confidence_threshold = value
            .parse::<f32>()
            .with_context(|| format!("Invalid CRY_CONFIDENCE_THRESHOLD: {}", value))?;
    }

    if let Some(model_path) = &cli.model {
        config.classifier = ClassifierKind::Model {
            model_path: model_path.clone(),
        };
    } else if let Some(threshold) = cli.threshold {
        config.classifier = ClassifierKind::Amplitude { threshold };
    }

    if let Some(confidence) = cli.confidence {
        config.confidence_threshold = confidence;
    }

    config.validate()?;
    Ok(config)
}
