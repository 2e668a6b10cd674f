/// Cry classifier module
///
/// Decides whether a single analysis window contains crying. Two variants sit
/// behind the `CryClassifier` trait: a raw amplitude threshold and a logistic
/// regression model over mean-MFCC features. The variant is picked from
/// `ClassifierKind` when the pipeline is built.

use crate::audio_buffer::AudioSample;
use crate::features::{normalize_samples, FeatureError, MfccConfig, MfccExtractor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Default amplitude threshold (out of the ±32767 range)
pub const DEFAULT_AMPLITUDE_THRESHOLD: i16 = 10000;

/// Confidence reported by the amplitude classifier for a loud window.
///
/// The amplitude path has no graded confidence; this stand-in pair feeds the
/// hysteresis stage and the default confidence threshold, so changing it
/// changes detection latency.
pub const AMPLITUDE_CRY_CONFIDENCE: f32 = 0.8;

/// Confidence reported by the amplitude classifier for a quiet window
pub const AMPLITUDE_QUIET_CONFIDENCE: f32 = 0.2;

/// Default location of the trained model artifact
pub const DEFAULT_MODEL_PATH: &str = "models/cry_detection_model.json";

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("Failed to read model {path}: {source}")]
    ModelIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Feature extraction failed: {0}")]
    Features(#[from] FeatureError),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Amplitude threshold must be non-negative, got {0}")]
    InvalidThreshold(i16),
}

/// Result of classifying one window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub is_cry: bool,

    /// Certainty in the reported label (0.0 - 1.0)
    pub confidence: f32,
}

impl Classification {
    pub fn new(is_cry: bool, confidence: f32) -> Self {
        Self {
            is_cry,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Negative result used when a window could not be classified
    pub fn negative() -> Self {
        Self {
            is_cry: false,
            confidence: 0.0,
        }
    }
}

/// Binary cry classifier over one analysis window
///
/// Implementations hold no per-call state, so one instance may be shared
/// between sessions.
#[cfg_attr(test, mockall::automock)]
pub trait CryClassifier: Send + Sync {
    fn classify(&self, window: &[AudioSample]) -> Result<Classification, ClassifierError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Classifier selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Peak amplitude above `threshold`
    Amplitude { threshold: i16 },

    /// Logistic regression model loaded from `model_path`
    Model { model_path: PathBuf },
}

impl Default for ClassifierKind {
    fn default() -> Self {
        ClassifierKind::Amplitude {
            threshold: DEFAULT_AMPLITUDE_THRESHOLD,
        }
    }
}

/// Build the configured classifier
///
/// Fails when the model artifact is missing or unusable; no session should be
/// started in that case.
pub fn build_classifier(
    kind: &ClassifierKind,
    mfcc: &MfccConfig,
) -> Result<Arc<dyn CryClassifier>, ClassifierError> {
    match kind {
        ClassifierKind::Amplitude { threshold } => {
            if *threshold < 0 {
                return Err(ClassifierError::InvalidThreshold(*threshold));
            }
            Ok(Arc::new(AmplitudeClassifier::new(*threshold)))
        }
        ClassifierKind::Model { model_path } => {
            Ok(Arc::new(ModelClassifier::load(model_path, mfcc.clone())?))
        }
    }
}

/// Peak-amplitude detector
#[derive(Debug, Clone, Copy)]
pub struct AmplitudeClassifier {
    threshold: i16,
}

impl AmplitudeClassifier {
    pub fn new(threshold: i16) -> Self {
        debug!("Amplitude classifier threshold: {}", threshold);
        Self { threshold }
    }

    pub fn threshold(&self) -> i16 {
        self.threshold
    }

    /// Whether any sample exceeds the threshold in magnitude
    pub fn is_loud(&self, window: &[AudioSample]) -> bool {
        let threshold = i32::from(self.threshold);
        window.iter().any(|s| i32::from(s.unsigned_abs()) > threshold)
    }
}

impl Default for AmplitudeClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_AMPLITUDE_THRESHOLD)
    }
}

impl CryClassifier for AmplitudeClassifier {
    fn classify(&self, window: &[AudioSample]) -> Result<Classification, ClassifierError> {
        let loud = self.is_loud(window);
        let confidence = if loud {
            AMPLITUDE_CRY_CONFIDENCE
        } else {
            AMPLITUDE_QUIET_CONFIDENCE
        };

        Ok(Classification::new(loud, confidence))
    }

    fn name(&self) -> &'static str {
        "amplitude"
    }
}

/// Prediction of the logistic model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrediction {
    /// Predicted label (positive-class probability above 0.5)
    pub is_cry: bool,

    /// Probability of the positive (cry) class
    pub probability: f32,
}

impl ModelPrediction {
    /// Probability of the predicted class, not of crying
    pub fn confidence(&self) -> f32 {
        if self.is_cry {
            self.probability
        } else {
            1.0 - self.probability
        }
    }
}

/// Logistic regression over mean-MFCC features
///
/// Stored as JSON. When `feature_mean`/`feature_std` are present, features are
/// standardized before the dot product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub feature_count: usize,
    pub weights: Vec<f32>,
    pub bias: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_mean: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_std: Option<Vec<f32>>,
}

impl LogisticModel {
    /// Create a model without feature standardization
    pub fn new(weights: Vec<f32>, bias: f32) -> Result<Self, ClassifierError> {
        let model = Self {
            feature_count: weights.len(),
            weights,
            bias,
            feature_mean: None,
            feature_std: None,
        };
        model.validate()?;
        Ok(model)
    }

    /// Load a model artifact from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let shown = path.display().to_string();

        if !path.exists() {
            return Err(ClassifierError::ModelNotFound(shown));
        }

        let json = fs::read_to_string(path).map_err(|source| ClassifierError::ModelIo {
            path: shown.clone(),
            source,
        })?;

        let model: LogisticModel = serde_json::from_str(&json)
            .map_err(|e| ClassifierError::InvalidModel(format!("{}: {}", shown, e)))?;
        model.validate()?;

        info!("Loaded cry model from {} ({} features)", shown, model.feature_count);
        Ok(model)
    }

    /// Write the model artifact as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ClassifierError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ClassifierError::InvalidModel(e.to_string()))?;

        fs::write(path, json).map_err(|source| ClassifierError::ModelIo {
            path: path.display().to_string(),
            source,
        })
    }

    /// Validate model dimensions and parameters
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.feature_count == 0 || self.weights.len() != self.feature_count {
            return Err(ClassifierError::InvalidModel(format!(
                "expected {} weights, found {}",
                self.feature_count,
                self.weights.len()
            )));
        }

        if !self.bias.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
            return Err(ClassifierError::InvalidModel(
                "weights and bias must be finite".to_string(),
            ));
        }

        for (name, stats) in [("feature_mean", &self.feature_mean), ("feature_std", &self.feature_std)] {
            if let Some(values) = stats {
                if values.len() != self.feature_count {
                    return Err(ClassifierError::InvalidModel(format!(
                        "{} has {} entries, expected {}",
                        name,
                        values.len(),
                        self.feature_count
                    )));
                }
            }
        }

        if let Some(std) = &self.feature_std {
            if std.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
                return Err(ClassifierError::InvalidModel(
                    "feature_std entries must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Probability that the features describe crying
    pub fn positive_probability(&self, features: &[f32]) -> Result<f32, ClassifierError> {
        if features.len() != self.feature_count {
            return Err(ClassifierError::Inference(format!(
                "expected {} features, got {}",
                self.feature_count,
                features.len()
            )));
        }

        let mut score = self.bias;
        for (i, (&x, &w)) in features.iter().zip(&self.weights).enumerate() {
            let mean = self.feature_mean.as_ref().and_then(|m| m.get(i)).copied().unwrap_or(0.0);
            let std = self.feature_std.as_ref().and_then(|s| s.get(i)).copied().unwrap_or(1.0);
            score += w * (x - mean) / std;
        }

        if score.is_nan() {
            return Err(ClassifierError::Inference("model score is NaN".to_string()));
        }

        Ok(sigmoid(score))
    }

    /// Predicted label and positive-class probability
    pub fn predict(&self, features: &[f32]) -> Result<ModelPrediction, ClassifierError> {
        let probability = self.positive_probability(features)?;
        Ok(ModelPrediction {
            is_cry: probability > 0.5,
            probability,
        })
    }
}

fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Model-backed detector: int16 window -> mean MFCC -> logistic regression
pub struct ModelClassifier {
    model: Arc<LogisticModel>,
    extractor: MfccExtractor,
}

impl ModelClassifier {
    /// Load the model artifact and build the feature extractor
    pub fn load(model_path: impl AsRef<Path>, mfcc: MfccConfig) -> Result<Self, ClassifierError> {
        let model = LogisticModel::load(model_path)?;
        Self::with_model(Arc::new(model), mfcc)
    }

    /// Reuse an already loaded model
    pub fn with_model(model: Arc<LogisticModel>, mfcc: MfccConfig) -> Result<Self, ClassifierError> {
        if model.feature_count != mfcc.feature_count {
            return Err(ClassifierError::InvalidModel(format!(
                "model expects {} features, extractor produces {}",
                model.feature_count, mfcc.feature_count
            )));
        }

        let extractor = MfccExtractor::with_config(mfcc)?;
        Ok(Self { model, extractor })
    }

    pub fn model(&self) -> &Arc<LogisticModel> {
        &self.model
    }

    fn predict_window(&self, window: &[AudioSample]) -> Result<ModelPrediction, ClassifierError> {
        let samples = normalize_samples(window);
        let features = self.extractor.extract(&samples)?;
        self.model.predict(&features)
    }
}

impl CryClassifier for ModelClassifier {
    /// Never fails: extraction or inference errors degrade to a negative result
    fn classify(&self, window: &[AudioSample]) -> Result<Classification, ClassifierError> {
        if window.is_empty() {
            return Ok(Classification::negative());
        }

        match self.predict_window(window) {
            Ok(prediction) => {
                trace!(
                    "Model prediction: label={}, p(cry)={:.3}",
                    prediction.is_cry,
                    prediction.probability
                );
                Ok(Classification::new(
                    prediction.is_cry && prediction.probability > 0.5,
                    prediction.confidence(),
                ))
            }
            Err(e) => {
                warn!("Model classification failed, treating window as negative: {}", e);
                Ok(Classification::negative())
            }
        }
    }

    fn name(&self) -> &'static str {
        "model"
    }
}
