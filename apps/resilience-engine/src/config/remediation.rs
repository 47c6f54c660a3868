//! Remediation queue and budget gate configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for remediation approval, dispatch, and spend limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    /// Pending requests at or below this estimate auto-approve, in dollars.
    #[serde(default = "default_auto_approve_limit")]
    pub auto_approve_limit: f64,
    /// Maximum simultaneously running backfills.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Interval between auto-approval/dispatch sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Hard gate on remediation spend per calendar day, in dollars.
    #[serde(default = "default_daily_spend_limit")]
    pub daily_spend_limit: f64,
    /// Hard gate on remediation spend per calendar month, in dollars.
    #[serde(default = "default_monthly_spend_limit")]
    pub monthly_spend_limit: f64,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            auto_approve_limit: default_auto_approve_limit(),
            max_concurrent: default_max_concurrent(),
            sweep_interval_secs: default_sweep_interval_secs(),
            daily_spend_limit: default_daily_spend_limit(),
            monthly_spend_limit: default_monthly_spend_limit(),
        }
    }
}

impl RemediationConfig {
    /// Sweep interval as a duration.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

const fn default_auto_approve_limit() -> f64 {
    10.0
}

const fn default_max_concurrent() -> usize {
    3
}

const fn default_sweep_interval_secs() -> u64 {
    15
}

const fn default_daily_spend_limit() -> f64 {
    150.0
}

const fn default_monthly_spend_limit() -> f64 {
    1500.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remediation_config_defaults() {
        let config = RemediationConfig::default();
        assert!((config.auto_approve_limit - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.sweep_interval(), Duration::from_secs(15));
        assert!((config.daily_spend_limit - 150.0).abs() < f64::EPSILON);
        assert!((config.monthly_spend_limit - 1500.0).abs() < f64::EPSILON);
    }
}
