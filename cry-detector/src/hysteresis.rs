/// Cry hysteresis module
///
/// Debounces per-window classifications into a stable cry / no-cry state.
/// A bounded counter climbs on positive windows and falls on negative ones;
/// crying is reported while the counter sits at or above the trigger level.

use crate::classifier::Classification;
use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, trace};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HysteresisError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Hysteresis parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HysteresisConfig {
    /// Upper clamp of the counter
    pub max_count: u8,

    /// Counter level at which crying is reported
    pub trigger_count: u8,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            max_count: 5,     // 0-5 consecutive windows
            trigger_count: 3, // 3 positive windows (~1s of hops) to trigger
        }
    }
}

impl HysteresisConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), HysteresisError> {
        if self.trigger_count == 0 || self.trigger_count > self.max_count {
            return Err(HysteresisError::InvalidConfig(format!(
                "trigger_count must be in 1..={} (max_count), got {}",
                self.max_count, self.trigger_count
            )));
        }

        Ok(())
    }
}

/// Debounced cry transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CryEvent {
    /// Crying started
    Started {
        /// Confidence of the window that flipped the state
        confidence: f32,

        /// Microseconds since epoch
        timestamp: i64,
    },

    /// Crying stopped
    Stopped {
        /// Microseconds since epoch
        timestamp: i64,

        /// Length of the crying episode in milliseconds
        duration_ms: u64,
    },
}

impl CryEvent {
    pub fn is_started(&self) -> bool {
        matches!(self, CryEvent::Started { .. })
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            CryEvent::Started { timestamp, .. } | CryEvent::Stopped { timestamp, .. } => *timestamp,
        }
    }
}

/// Counter-based cry debouncer
#[derive(Debug, Clone)]
pub struct CryStateMachine {
    config: HysteresisConfig,
    counter: u8,
    is_cry_detected: bool,
    last_confidence: f32,
    episode_started: Option<Instant>,
}

impl CryStateMachine {
    /// Create a state machine with the default 3-of-5 hysteresis
    pub fn new() -> Self {
        Self {
            config: HysteresisConfig::default(),
            counter: 0,
            is_cry_detected: false,
            last_confidence: 0.0,
            episode_started: None,
        }
    }

    /// Create a state machine with custom hysteresis
    pub fn with_config(config: HysteresisConfig) -> Result<Self, HysteresisError> {
        config.validate()?;
        debug!("Initializing cry hysteresis with config: {:?}", config);

        Ok(Self {
            config,
            ..Self::new()
        })
    }

    /// Feed one window's classification
    ///
    /// Returns an event only when the debounced state flips.
    pub fn process(&mut self, classification: Classification) -> Option<CryEvent> {
        self.counter = if classification.is_cry {
            self.counter.saturating_add(1).min(self.config.max_count)
        } else {
            self.counter.saturating_sub(1)
        };
        self.last_confidence = classification.confidence;

        let detected = self.counter >= self.config.trigger_count;

        trace!(
            "Hysteresis: is_cry={}, confidence={:.2}, counter={}, detected={}",
            classification.is_cry,
            classification.confidence,
            self.counter,
            detected
        );

        if detected == self.is_cry_detected {
            return None;
        }

        self.is_cry_detected = detected;
        let timestamp = current_timestamp_micros();

        if detected {
            self.episode_started = Some(Instant::now());
            info!("Cry detected with confidence {:.2}", self.last_confidence);

            Some(CryEvent::Started {
                confidence: self.last_confidence,
                timestamp,
            })
        } else {
            let duration_ms = self
                .episode_started
                .take()
                .map(|started| started.elapsed().as_millis() as u64)
                .unwrap_or(0);
            info!("Cry stopped after {}ms", duration_ms);

            Some(CryEvent::Stopped {
                timestamp,
                duration_ms,
            })
        }
    }

    /// Current counter value (always within `0..=max_count`)
    pub fn counter(&self) -> u8 {
        self.counter
    }

    pub fn is_cry_detected(&self) -> bool {
        self.is_cry_detected
    }

    /// Confidence of the most recently processed window
    pub fn last_confidence(&self) -> f32 {
        self.last_confidence
    }

    /// Get current configuration
    pub fn config(&self) -> &HysteresisConfig {
        &self.config
    }

    /// Reset to initial state
    pub fn reset(&mut self) {
        self.counter = 0;
        self.is_cry_detected = false;
        self.last_confidence = 0.0;
        self.episode_started = None;
        debug!("Cry hysteresis reset to initial state");
    }
}

impl Default for CryStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Get current timestamp in microseconds
pub(crate) fn current_timestamp_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}
