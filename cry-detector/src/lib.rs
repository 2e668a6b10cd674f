//! Cry detector - streaming baby-cry detection
//!
//! This library turns a live 16kHz PCM stream into debounced
//! "cry started" / "cry stopped" events:
//! - Overlapping fixed-size windowing of variable-length chunks
//! - Mean-MFCC feature extraction
//! - Amplitude-threshold or logistic-model classification
//! - Counter-based hysteresis against flicker
//! - A per-stream worker task with event subscription

pub mod audio_buffer;
pub mod classifier;
pub mod detector;
pub mod features;
pub mod hysteresis;
pub mod wav;

// Re-export main types
pub use audio_buffer::{AudioBufferError, AudioSample, WindowBuffer, WindowConfig, SAMPLE_RATE};
pub use classifier::{
    build_classifier, AmplitudeClassifier, Classification, ClassifierError, ClassifierKind, CryClassifier,
    LogisticModel, ModelClassifier, ModelPrediction,
};
pub use detector::{
    CryDetectionService, CryDetector, DetectionStatus, DetectorConfig, DetectorError, DetectorStats,
};
pub use features::{normalize_samples, FeatureError, MfccConfig, MfccExtractor};
pub use hysteresis::{CryEvent, CryStateMachine, HysteresisConfig, HysteresisError};
pub use wav::{read_wav_mono, WavError};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cry_detector=info,cry_monitor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
