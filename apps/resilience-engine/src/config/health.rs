//! Connection health tracker configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for per-stream liveness tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthTrackerConfig {
    /// Seconds without data before a connected stream is treated as stale.
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,
    /// Interval between liveness sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for HealthTrackerConfig {
    fn default() -> Self {
        Self {
            stale_threshold_secs: default_stale_threshold_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl HealthTrackerConfig {
    /// Staleness threshold as a duration.
    #[must_use]
    pub const fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    /// Sweep interval as a duration.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

const fn default_stale_threshold_secs() -> u64 {
    300
}

const fn default_sweep_interval_secs() -> u64 {
    60
}
