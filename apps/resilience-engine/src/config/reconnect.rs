//! Reconnection supervisor configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::reconnect::BackoffSchedule;

/// Configuration for exponential-backoff reconnection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// First retry delay, in seconds.
    #[serde(default = "default_backoff_floor_secs")]
    pub backoff_floor_secs: f64,
    /// Upper bound on the retry delay, in seconds.
    #[serde(default = "default_backoff_ceiling_secs")]
    pub backoff_ceiling_secs: f64,
    /// Delay growth factor per failed attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Random jitter applied to sleeps as a fraction of the delay (0.1 = 10%).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Failed attempts before the stream is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_floor_secs: default_backoff_floor_secs(),
            backoff_ceiling_secs: default_backoff_ceiling_secs(),
            multiplier: default_multiplier(),
            jitter_factor: default_jitter_factor(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    /// Floor delay as a duration.
    #[must_use]
    pub fn backoff_floor(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_floor_secs.max(0.0))
    }

    /// Ceiling delay as a duration.
    #[must_use]
    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_ceiling_secs.max(0.0))
    }

    /// Convert to the schedule used by the supervisor.
    #[must_use]
    pub fn to_schedule(&self) -> BackoffSchedule {
        BackoffSchedule::new(
            self.backoff_floor(),
            self.backoff_ceiling(),
            self.multiplier,
            self.jitter_factor,
        )
    }
}

const fn default_backoff_floor_secs() -> f64 {
    1.0
}

const fn default_backoff_ceiling_secs() -> f64 {
    60.0
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_jitter_factor() -> f64 {
    0.1
}

const fn default_max_attempts() -> u32 {
    5
}
