/// Audio buffer module for windowing the incoming sample stream
///
/// Accumulates variable-length PCM chunks and hands out fixed-size,
/// overlapping analysis windows (1.5 seconds of 16kHz audio by default).

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, trace};

/// Audio sample format (16-bit PCM)
pub type AudioSample = i16;

/// Reference sample rate of the monitored stream
pub const SAMPLE_RATE: usize = 16000;

/// Analysis window: 1.5 seconds at 16kHz
pub const WINDOW_SAMPLES: usize = SAMPLE_RATE * 3 / 2; // 24,000 samples

/// Hop between consecutive windows: half a second at 16kHz
pub const HOP_SAMPLES: usize = SAMPLE_RATE / 2; // 8,000 samples

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AudioBufferError {
    #[error("Invalid window geometry: window={window} samples, hop={hop} samples")]
    InvalidGeometry { window: usize, hop: usize },

    #[error("Sample rate must be greater than 0")]
    InvalidSampleRate,
}

/// Window geometry in samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Samples per analysis window
    pub window_samples: usize,

    /// Samples retired from the front after each window (`<= window_samples`)
    pub hop_samples: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_samples: WINDOW_SAMPLES,
            hop_samples: HOP_SAMPLES,
        }
    }
}

impl WindowConfig {
    /// Validate window geometry
    pub fn validate(&self) -> Result<(), AudioBufferError> {
        if self.window_samples == 0 || self.hop_samples == 0 || self.hop_samples > self.window_samples {
            return Err(AudioBufferError::InvalidGeometry {
                window: self.window_samples,
                hop: self.hop_samples,
            });
        }

        Ok(())
    }

    /// Samples shared by two consecutive windows
    pub fn overlap_samples(&self) -> usize {
        self.window_samples - self.hop_samples
    }
}

/// Chunk queue that emits overlapping fixed-size windows
///
/// Chunks are stored as received and only flattened when a window is cut.
/// After every window exactly `hop_samples` are retired from the front, so
/// the trailing `window_samples - hop_samples` samples are delivered again
/// at the start of the next window.
pub struct WindowBuffer {
    chunks: VecDeque<Vec<AudioSample>>,
    total_samples: usize,
    config: WindowConfig,
    sample_rate: usize,
}

impl WindowBuffer {
    /// Create a buffer with the reference 1.5s window and 0.5s hop
    pub fn new() -> Self {
        Self {
            chunks: VecDeque::new(),
            total_samples: 0,
            config: WindowConfig::default(),
            sample_rate: SAMPLE_RATE,
        }
    }

    /// Create a buffer with custom window geometry for a stream at `sample_rate` Hz
    pub fn with_config(config: WindowConfig, sample_rate: usize) -> Result<Self, AudioBufferError> {
        config.validate()?;
        if sample_rate == 0 {
            return Err(AudioBufferError::InvalidSampleRate);
        }

        debug!(
            "Creating window buffer: window={} samples, hop={} samples, {}Hz",
            config.window_samples, config.hop_samples, sample_rate
        );

        Ok(Self {
            config,
            sample_rate,
            ..Self::new()
        })
    }

    /// Append a chunk of samples to the queue
    ///
    /// Empty chunks are ignored.
    pub fn write(&mut self, samples: &[AudioSample]) {
        if samples.is_empty() {
            return;
        }

        self.chunks.push_back(samples.to_vec());
        self.total_samples += samples.len();

        trace!(
            "Queued {} samples ({} total, {} chunks)",
            samples.len(),
            self.total_samples,
            self.chunks.len()
        );
    }

    /// Cut the next analysis window if enough samples are queued
    pub fn next_window(&mut self) -> Option<Vec<AudioSample>> {
        let window_samples = self.config.window_samples;

        if self.total_samples < window_samples {
            return None;
        }

        let mut window = Vec::with_capacity(window_samples);
        for chunk in &self.chunks {
            let needed = window_samples - window.len();
            if needed == 0 {
                break;
            }
            let take = needed.min(chunk.len());
            window.extend_from_slice(&chunk[..take]);
        }

        self.retire(self.config.hop_samples);

        trace!("Produced window, {} samples remain queued", self.total_samples);
        Some(window)
    }

    /// Drain the buffer at end of stream
    ///
    /// Returns every remaining full window, then keeps cutting zero-padded
    /// windows one hop apart until every queued sample has been retired, so
    /// the end of the stream slides out of the window the way it slid in.
    /// Leaves the buffer empty.
    pub fn flush(&mut self) -> Vec<Vec<AudioSample>> {
        let mut windows = Vec::new();
        while let Some(window) = self.next_window() {
            windows.push(window);
        }

        let queued = self.total_samples;
        while !self.is_empty() {
            let mut tail: Vec<AudioSample> = self
                .chunks
                .iter()
                .flatten()
                .copied()
                .take(self.config.window_samples)
                .collect();
            tail.resize(self.config.window_samples, 0);
            windows.push(tail);
            self.retire(self.config.hop_samples);
        }

        if queued > 0 {
            debug!("Flushed {} queued samples into padded windows", queued);
        }

        self.clear();
        windows
    }

    /// Remove `count` samples from the front, splitting the last chunk if needed
    fn retire(&mut self, mut count: usize) {
        while count > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };

            if front.len() <= count {
                count -= front.len();
                self.total_samples -= front.len();
                self.chunks.pop_front();
            } else {
                // Remainder stays at the front, order preserved
                front.drain(..count);
                self.total_samples -= count;
                count = 0;
            }
        }
    }

    /// Get the number of samples currently queued
    pub fn len(&self) -> usize {
        self.total_samples
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.total_samples == 0
    }

    /// Number of chunks currently queued
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Clear all data from the buffer
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total_samples = 0;
        debug!("Cleared window buffer");
    }

    pub fn window_samples(&self) -> usize {
        self.config.window_samples
    }

    pub fn hop_samples(&self) -> usize {
        self.config.hop_samples
    }

    /// Get the sample rate
    pub fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    /// Get duration of audio currently queued (in seconds)
    pub fn duration_secs(&self) -> f32 {
        self.len() as f32 / self.sample_rate as f32
    }
}

impl Default for WindowBuffer {
    fn default() -> Self {
        Self::new()
    }
}
