//! Circuit-breaker failover configuration.

use serde::{Deserialize, Serialize};

/// Configuration for component-level trip and recovery evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Consecutive failures that trip a component.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// A reported call slower than this trips a component, in milliseconds.
    #[serde(default = "default_slow_call_threshold_ms")]
    pub slow_call_threshold_ms: f64,
    /// Rolling success rate below which a component trips.
    #[serde(default = "default_success_rate_floor")]
    pub success_rate_floor: f64,
    /// Rolling success rate required for recovery.
    #[serde(default = "default_recovery_success_rate")]
    pub recovery_success_rate: f64,
    /// Rolling average response time required for recovery, in milliseconds.
    #[serde(default = "default_recovery_response_time_ms")]
    pub recovery_response_time_ms: f64,
    /// Call outcomes retained in the rolling window.
    #[serde(default = "default_sliding_window_size")]
    pub sliding_window_size: usize,
    /// Outcomes required before rate-based conditions are evaluated.
    #[serde(default = "default_minimum_calls")]
    pub minimum_calls: usize,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            slow_call_threshold_ms: default_slow_call_threshold_ms(),
            success_rate_floor: default_success_rate_floor(),
            recovery_success_rate: default_recovery_success_rate(),
            recovery_response_time_ms: default_recovery_response_time_ms(),
            sliding_window_size: default_sliding_window_size(),
            minimum_calls: default_minimum_calls(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_slow_call_threshold_ms() -> f64 {
    5000.0
}

const fn default_success_rate_floor() -> f64 {
    0.8
}

const fn default_recovery_success_rate() -> f64 {
    0.95
}

const fn default_recovery_response_time_ms() -> f64 {
    1000.0
}

const fn default_sliding_window_size() -> usize {
    20
}

const fn default_minimum_calls() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failover_config_defaults() {
        let config = FailoverConfig::default();
        assert_eq!(config.failure_threshold, 3);
        assert!((config.slow_call_threshold_ms - 5000.0).abs() < f64::EPSILON);
        assert!((config.success_rate_floor - 0.8).abs() < f64::EPSILON);
        assert!((config.recovery_success_rate - 0.95).abs() < f64::EPSILON);
        assert!((config.recovery_response_time_ms - 1000.0).abs() < f64::EPSILON);
        assert_eq!(config.sliding_window_size, 20);
        assert_eq!(config.minimum_calls, 5);
    }
}
