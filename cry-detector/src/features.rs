/// MFCC feature extraction module
///
/// Summarizes a block of normalized audio as the mean Mel-frequency cepstral
/// coefficients of its frames. The output size depends only on the
/// configuration, never on the input length.

use crate::audio_buffer::{AudioSample, SAMPLE_RATE};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Number of cepstral coefficients per feature vector
pub const FEATURE_COUNT: usize = 13;

/// Analysis frame size in samples (32ms at 16kHz)
pub const FRAME_SIZE: usize = 512;

/// Number of triangular mel filters
pub const FILTER_BANK_SIZE: usize = 24;

/// Floor applied to filter energies before the logarithm
const LOG_FLOOR: f32 = 1e-10;

#[derive(Error, Debug, PartialEq)]
pub enum FeatureError {
    #[error("Empty audio input")]
    EmptyInput,

    #[error("Invalid MFCC configuration: {0}")]
    InvalidConfig(String),

    #[error("Non-finite coefficient produced at index {0}")]
    NonFinite(usize),
}

/// MFCC extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MfccConfig {
    /// Sample rate of the input (Hz)
    pub sample_rate: usize,

    /// Coefficients kept per frame
    pub feature_count: usize,

    /// Samples per frame; frames do not overlap
    pub frame_size: usize,

    /// Mel filters spanning 0 Hz to Nyquist
    pub filter_bank_size: usize,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            feature_count: FEATURE_COUNT,
            frame_size: FRAME_SIZE,
            filter_bank_size: FILTER_BANK_SIZE,
        }
    }
}

impl MfccConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), FeatureError> {
        if self.sample_rate == 0 {
            return Err(FeatureError::InvalidConfig(
                "sample_rate must be greater than 0".to_string(),
            ));
        }

        if self.frame_size == 0 {
            return Err(FeatureError::InvalidConfig(
                "frame_size must be greater than 0".to_string(),
            ));
        }

        if self.feature_count == 0 || self.feature_count > self.filter_bank_size {
            return Err(FeatureError::InvalidConfig(format!(
                "feature_count must be in 1..={} (filter bank size)",
                self.filter_bank_size
            )));
        }

        Ok(())
    }
}

/// Convert 16-bit PCM to floats in [-1, 1)
pub fn normalize_samples(samples: &[AudioSample]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Mean-MFCC feature extractor
///
/// All tables (window, filter bank, DCT basis, FFT plan) are computed once at
/// construction; `extract` only reads them, so one extractor can serve
/// concurrent callers.
pub struct MfccExtractor {
    config: MfccConfig,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    /// Hamming window, `frame_size` long
    window: Vec<f32>,
    /// `filter_bank_size` rows of `fft_size / 2 + 1` weights
    filter_bank: Vec<Vec<f32>>,
    /// `feature_count` rows of `filter_bank_size` DCT-II weights
    dct_basis: Vec<Vec<f32>>,
}

impl MfccExtractor {
    /// Create an extractor with the reference configuration
    pub fn new() -> Self {
        Self::build(MfccConfig::default())
    }

    /// Create an extractor with a custom configuration
    pub fn with_config(config: MfccConfig) -> Result<Self, FeatureError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: MfccConfig) -> Self {
        let fft_size = config.frame_size.next_power_of_two();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);

        let window = hamming_window(config.frame_size);
        let filter_bank = mel_filter_bank(config.filter_bank_size, fft_size, config.sample_rate);
        let dct_basis = dct_basis(config.feature_count, config.filter_bank_size);

        debug!(
            "MFCC extractor: {} coefficients, frame={} (fft={}), {} mel filters @ {}Hz",
            config.feature_count, config.frame_size, fft_size, config.filter_bank_size, config.sample_rate
        );

        Self {
            config,
            fft_size,
            fft,
            window,
            filter_bank,
            dct_basis,
        }
    }

    /// Extract the mean MFCC vector from normalized samples
    ///
    /// The input is split into consecutive `frame_size` frames; a trailing
    /// partial frame is dropped. Input shorter than one frame is treated as a
    /// single zero-padded frame.
    pub fn extract(&self, samples: &[f32]) -> Result<Vec<f32>, FeatureError> {
        if samples.is_empty() {
            return Err(FeatureError::EmptyInput);
        }

        let frame_size = self.config.frame_size;
        let mut mean = vec![0.0f64; self.config.feature_count];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft_size];

        let frames: Vec<&[f32]> = if samples.len() < frame_size {
            vec![samples]
        } else {
            samples.chunks_exact(frame_size).collect()
        };

        for frame in &frames {
            let coefficients = self.frame_coefficients(frame, &mut scratch);
            for (acc, c) in mean.iter_mut().zip(coefficients) {
                *acc += c as f64;
            }
        }

        let frame_count = frames.len() as f64;
        let result: Vec<f32> = mean.into_iter().map(|sum| (sum / frame_count) as f32).collect();

        if let Some(index) = result.iter().position(|c| !c.is_finite()) {
            return Err(FeatureError::NonFinite(index));
        }

        trace!("Extracted MFCC over {} frames", frames.len());
        Ok(result)
    }

    /// Cepstral coefficients of one frame (shorter frames are zero-padded)
    fn frame_coefficients(&self, frame: &[f32], scratch: &mut [Complex<f32>]) -> Vec<f32> {
        for (i, slot) in scratch.iter_mut().enumerate() {
            let sample = if i < frame.len() { frame[i] * self.window[i] } else { 0.0 };
            *slot = Complex::new(sample, 0.0);
        }

        self.fft.process(scratch);

        let bins = self.fft_size / 2 + 1;
        let power: Vec<f32> = scratch[..bins].iter().map(|c| c.norm_sqr()).collect();

        let log_energies: Vec<f32> = self
            .filter_bank
            .iter()
            .map(|filter| {
                let energy: f32 = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
                // f32::max would swallow NaN
                if energy.is_nan() {
                    energy
                } else {
                    energy.max(LOG_FLOOR).ln()
                }
            })
            .collect();

        self.dct_basis
            .iter()
            .map(|row| row.iter().zip(&log_energies).map(|(b, e)| b * e).sum())
            .collect()
    }

    /// Get current configuration
    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    /// Length of every vector returned by `extract`
    pub fn feature_count(&self) -> usize {
        self.config.feature_count
    }
}

impl Default for MfccExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn hamming_window(size: usize) -> Vec<f32> {
    if size == 1 {
        return vec![1.0];
    }

    (0..size)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / (size as f32 - 1.0)).cos())
        .collect()
}

/// Triangular filters evenly spaced on the mel scale from 0 Hz to Nyquist
fn mel_filter_bank(filter_count: usize, fft_size: usize, sample_rate: usize) -> Vec<Vec<f32>> {
    let bins = fft_size / 2 + 1;
    let nyquist = sample_rate as f32 / 2.0;
    let mel_max = hz_to_mel(nyquist);

    let edges: Vec<f32> = (0..filter_count + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (filter_count + 1) as f32))
        .collect();

    (0..filter_count)
        .map(|m| {
            let (left, center, right) = (edges[m], edges[m + 1], edges[m + 2]);
            (0..bins)
                .map(|k| {
                    let freq = k as f32 * sample_rate as f32 / fft_size as f32;
                    let rising = (freq - left) / (center - left);
                    let falling = (right - freq) / (right - center);
                    rising.min(falling).max(0.0)
                })
                .collect()
        })
        .collect()
}

/// Orthonormal DCT-II basis
fn dct_basis(coefficients: usize, inputs: usize) -> Vec<Vec<f32>> {
    let n = inputs as f32;
    (0..coefficients)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..inputs)
                .map(|m| scale * (PI * k as f32 * (m as f32 + 0.5) / n).cos())
                .collect()
        })
        .collect()
}
