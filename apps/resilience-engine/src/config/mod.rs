//! Configuration module for the resilience engine.
//!
//! Provides configuration loading, validation, and environment variable
//! interpolation for every engine component.
//!
//! # Usage
//!
//! ```rust,ignore
//! use resilience_engine::config::{Config, load_config};
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! // Load from custom path
//! let config = load_config(Some("custom/config.yaml"))?;
//!
//! println!("health port: {}", config.server.health_port);
//! ```

mod failover;
mod gap;
mod health;
mod observability;
mod quality;
mod reconnect;
mod remediation;
mod server;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::health::StreamSpec;

pub use failover::FailoverConfig;
pub use gap::GapAnalyzerConfig;
pub use health::HealthTrackerConfig;
pub use observability::{LoggingConfig, ObservabilityConfig};
pub use quality::QualityConfig;
pub use reconnect::ReconnectConfig;
pub use remediation::RemediationConfig;
pub use server::ServerConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection health tracking.
    pub health: HealthTrackerConfig,
    /// Gap classification and backfill pricing.
    pub gaps: GapAnalyzerConfig,
    /// Remediation approval, dispatch, and spend limits.
    pub remediation: RemediationConfig,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// Component circuit breakers.
    pub failover: FailoverConfig,
    /// Record quality scoring.
    pub quality: QualityConfig,
    /// Ops HTTP server.
    pub server: ServerConfig,
    /// Logging.
    pub observability: ObservabilityConfig,
    /// Streams to register at startup.
    pub streams: Vec<StreamSpec>,
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let mut result = input.to_string();

    // Match ${VAR} or ${VAR:-default} patterns
    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    for cap in re.captures_iter(input) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let Some(var_match) = cap.get(1) else {
            continue;
        };
        let full_match = full_match.as_str();
        let var_name = var_match.as_str();
        let default_value = cap.get(2).map(|m| m.as_str());

        let value = match std::env::var(var_name) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        };

        result = result.replace(full_match, &value);
    }

    result
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Health tracking
    if config.health.stale_threshold_secs == 0 {
        return Err(ConfigError::ValidationError(
            "health.stale_threshold_secs must be positive".to_string(),
        ));
    }
    if config.health.sweep_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "health.sweep_interval_secs must be positive".to_string(),
        ));
    }

    // Gap thresholds
    if config.gaps.min_gap_duration_secs < 0.0 {
        return Err(ConfigError::ValidationError(
            "gaps.min_gap_duration_secs must not be negative".to_string(),
        ));
    }
    if config.gaps.critical_gap_duration_secs < config.gaps.min_gap_duration_secs {
        return Err(ConfigError::ValidationError(
            "gaps.critical_gap_duration_secs must be >= gaps.min_gap_duration_secs".to_string(),
        ));
    }
    if !config.gaps.cost_per_gigabyte.is_finite() || config.gaps.cost_per_gigabyte < 0.0 {
        return Err(ConfigError::ValidationError(
            "gaps.cost_per_gigabyte must be a non-negative number".to_string(),
        ));
    }
    if config.gaps.max_backfill_cost <= 0.0 {
        return Err(ConfigError::ValidationError(
            "gaps.max_backfill_cost must be positive".to_string(),
        ));
    }
    if config.gaps.cheap_auto_threshold < 0.0
        || config.gaps.cheap_auto_threshold > config.gaps.max_backfill_cost
    {
        return Err(ConfigError::ValidationError(
            "gaps.cheap_auto_threshold must be within [0, gaps.max_backfill_cost]".to_string(),
        ));
    }

    // Remediation limits
    if config.remediation.auto_approve_limit < 0.0 {
        return Err(ConfigError::ValidationError(
            "remediation.auto_approve_limit must not be negative".to_string(),
        ));
    }
    if config.remediation.max_concurrent == 0 {
        return Err(ConfigError::ValidationError(
            "remediation.max_concurrent must be at least 1".to_string(),
        ));
    }
    if config.remediation.sweep_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "remediation.sweep_interval_secs must be positive".to_string(),
        ));
    }
    if config.remediation.daily_spend_limit <= 0.0
        || config.remediation.monthly_spend_limit <= 0.0
    {
        return Err(ConfigError::ValidationError(
            "remediation spend limits must be positive".to_string(),
        ));
    }
    if config.remediation.monthly_spend_limit < config.remediation.daily_spend_limit {
        return Err(ConfigError::ValidationError(
            "remediation.monthly_spend_limit must be >= daily_spend_limit".to_string(),
        ));
    }

    // Reconnect backoff
    if config.reconnect.backoff_floor_secs <= 0.0 {
        return Err(ConfigError::ValidationError(
            "reconnect.backoff_floor_secs must be positive".to_string(),
        ));
    }
    if config.reconnect.backoff_ceiling_secs < config.reconnect.backoff_floor_secs {
        return Err(ConfigError::ValidationError(
            "reconnect.backoff_ceiling_secs must be >= backoff_floor_secs".to_string(),
        ));
    }
    if config.reconnect.multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "reconnect.multiplier must be at least 1.0".to_string(),
        ));
    }
    if !(0.0..1.0).contains(&config.reconnect.jitter_factor) {
        return Err(ConfigError::ValidationError(
            "reconnect.jitter_factor must be within [0.0, 1.0)".to_string(),
        ));
    }
    if config.reconnect.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "reconnect.max_attempts must be at least 1".to_string(),
        ));
    }

    // Failover thresholds
    if config.failover.failure_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "failover.failure_threshold must be at least 1".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.failover.success_rate_floor) {
        return Err(ConfigError::ValidationError(
            "failover.success_rate_floor must be within [0.0, 1.0]".to_string(),
        ));
    }
    if config.failover.recovery_success_rate < config.failover.success_rate_floor
        || config.failover.recovery_success_rate > 1.0
    {
        return Err(ConfigError::ValidationError(
            "failover.recovery_success_rate must be within [success_rate_floor, 1.0]".to_string(),
        ));
    }
    if config.failover.sliding_window_size == 0 {
        return Err(ConfigError::ValidationError(
            "failover.sliding_window_size must be at least 1".to_string(),
        ));
    }
    if config.failover.minimum_calls == 0
        || config.failover.minimum_calls > config.failover.sliding_window_size
    {
        return Err(ConfigError::ValidationError(
            "failover.minimum_calls must be within [1, sliding_window_size]".to_string(),
        ));
    }

    // Quality scoring
    if !(0.0..=1.0).contains(&config.quality.min_acceptable_score) {
        return Err(ConfigError::ValidationError(
            "quality.min_acceptable_score must be within [0.0, 1.0]".to_string(),
        ));
    }
    if !(0.0..1.0).contains(&config.quality.null_ratio_threshold) {
        return Err(ConfigError::ValidationError(
            "quality.null_ratio_threshold must be within [0.0, 1.0)".to_string(),
        ));
    }
    if config.quality.timestamp_field.is_empty() {
        return Err(ConfigError::ValidationError(
            "quality.timestamp_field must not be empty".to_string(),
        ));
    }

    // Stream registry
    let mut seen = std::collections::HashSet::new();
    for stream in &config.streams {
        if stream.stream_id.is_empty() {
            return Err(ConfigError::ValidationError(
                "streams entries must have a non-empty stream_id".to_string(),
            ));
        }
        if !seen.insert(stream.stream_id.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "streams contains duplicate stream_id '{}'",
                stream.stream_id
            )));
        }
    }

    Ok(())
}
