/// WAV input for offline monitoring
///
/// Decodes a recording into mono 16-bit PCM so it can be streamed through the
/// detection pipeline like live audio.

use crate::audio_buffer::AudioSample;
use hound::{SampleFormat, WavReader};
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum WavError {
    #[error("Failed to decode WAV: {0}")]
    Decode(#[from] hound::Error),

    #[error("Sample rate mismatch: file is {found}Hz, pipeline expects {expected}Hz")]
    SampleRateMismatch { found: u32, expected: u32 },

    #[error("Unsupported WAV format: {0}")]
    UnsupportedFormat(String),
}

/// Read a WAV file as mono PCM at `expected_rate`
pub fn read_wav_mono(path: impl AsRef<Path>, expected_rate: u32) -> Result<Vec<AudioSample>, WavError> {
    let reader = WavReader::open(path)?;
    decode(reader, expected_rate)
}

/// Decode WAV data from any reader
pub fn read_wav_mono_from<R: Read>(reader: R, expected_rate: u32) -> Result<Vec<AudioSample>, WavError> {
    decode(WavReader::new(reader)?, expected_rate)
}

fn decode<R: Read>(mut reader: WavReader<R>, expected_rate: u32) -> Result<Vec<AudioSample>, WavError> {
    let spec = reader.spec();

    if spec.sample_rate != expected_rate {
        return Err(WavError::SampleRateMismatch {
            found: spec.sample_rate,
            expected: expected_rate,
        });
    }

    if spec.channels == 0 {
        return Err(WavError::UnsupportedFormat("zero channels".to_string()));
    }

    // Interleaved samples scaled to the i16 range
    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(f32::from))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, bits @ 1..=32) => {
            let scale = 2f32.powi(bits as i32 - 16);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| v * 32767.0))
            .collect::<Result<_, _>>()?,
        (format, bits) => {
            return Err(WavError::UnsupportedFormat(format!("{:?} {}-bit", format, bits)));
        }
    };

    let channels = spec.channels as usize;
    let mono: Vec<AudioSample> = interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let mean = frame.iter().sum::<f32>() / channels as f32;
            mean.round().clamp(i16::MIN as f32, i16::MAX as f32) as AudioSample
        })
        .collect();

    debug!(
        "Decoded WAV: {} channels, {}-bit {:?}, {} mono samples",
        spec.channels,
        spec.bits_per_sample,
        spec.sample_format,
        mono.len()
    );

    Ok(mono)
}
