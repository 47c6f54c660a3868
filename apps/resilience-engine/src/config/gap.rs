//! Gap analysis and backfill pricing configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::health::DataKind;

/// Configuration for gap classification and the local cost model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapAnalyzerConfig {
    /// Gaps shorter than this are ignored, in seconds.
    #[serde(default = "default_min_gap_duration_secs")]
    pub min_gap_duration_secs: f64,
    /// Gaps at or beyond this length are critical, in seconds.
    #[serde(default = "default_critical_gap_duration_secs")]
    pub critical_gap_duration_secs: f64,
    /// Expected record rate per stream for each data kind.
    #[serde(default = "default_records_per_second")]
    pub records_per_second: HashMap<DataKind, f64>,
    /// Average wire size of one record for each data kind, in bytes.
    #[serde(default = "default_avg_record_bytes")]
    pub avg_record_bytes: HashMap<DataKind, u64>,
    /// Backfill price per gigabyte of recovered data, in dollars.
    #[serde(default = "default_cost_per_gigabyte")]
    pub cost_per_gigabyte: f64,
    /// Hard ceiling on a single backfill's estimated cost, in dollars.
    #[serde(default = "default_max_backfill_cost")]
    pub max_backfill_cost: f64,
    /// Estimates below this are accepted without approval, in dollars.
    #[serde(default = "default_cheap_auto_threshold")]
    pub cheap_auto_threshold: f64,
}

impl Default for GapAnalyzerConfig {
    fn default() -> Self {
        Self {
            min_gap_duration_secs: default_min_gap_duration_secs(),
            critical_gap_duration_secs: default_critical_gap_duration_secs(),
            records_per_second: default_records_per_second(),
            avg_record_bytes: default_avg_record_bytes(),
            cost_per_gigabyte: default_cost_per_gigabyte(),
            max_backfill_cost: default_max_backfill_cost(),
            cheap_auto_threshold: default_cheap_auto_threshold(),
        }
    }
}

impl GapAnalyzerConfig {
    /// Expected record rate for a data kind, zero when unconfigured.
    #[must_use]
    pub fn records_per_second_for(&self, kind: DataKind) -> f64 {
        self.records_per_second.get(&kind).copied().unwrap_or(0.0)
    }

    /// Average record size for a data kind, zero when unconfigured.
    #[must_use]
    pub fn avg_record_bytes_for(&self, kind: DataKind) -> u64 {
        self.avg_record_bytes.get(&kind).copied().unwrap_or(0)
    }
}

const fn default_min_gap_duration_secs() -> f64 {
    30.0
}

const fn default_critical_gap_duration_secs() -> f64 {
    300.0
}

fn default_records_per_second() -> HashMap<DataKind, f64> {
    HashMap::from([
        (DataKind::Trades, 300.0),
        (DataKind::Quotes, 1500.0),
        (DataKind::Bars, 2.0),
    ])
}

fn default_avg_record_bytes() -> HashMap<DataKind, u64> {
    HashMap::from([
        (DataKind::Trades, 120),
        (DataKind::Quotes, 96),
        (DataKind::Bars, 160),
    ])
}

const fn default_cost_per_gigabyte() -> f64 {
    60.0
}

const fn default_max_backfill_cost() -> f64 {
    50.0
}

const fn default_cheap_auto_threshold() -> f64 {
    5.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_analyzer_config_defaults() {
        let config = GapAnalyzerConfig::default();
        assert!((config.min_gap_duration_secs - 30.0).abs() < f64::EPSILON);
        assert!((config.critical_gap_duration_secs - 300.0).abs() < f64::EPSILON);
        assert!((config.max_backfill_cost - 50.0).abs() < f64::EPSILON);
        assert!((config.cheap_auto_threshold - 5.0).abs() < f64::EPSILON);
        assert!((config.records_per_second_for(DataKind::Quotes) - 1500.0).abs() < f64::EPSILON);
        assert_eq!(config.avg_record_bytes_for(DataKind::Trades), 120);
    }

    #[test]
    fn test_unconfigured_kind_rates_are_zero() {
        let config = GapAnalyzerConfig {
            records_per_second: HashMap::new(),
            avg_record_bytes: HashMap::new(),
            ..Default::default()
        };
        assert!((config.records_per_second_for(DataKind::Bars) - 0.0).abs() < f64::EPSILON);
        assert_eq!(config.avg_record_bytes_for(DataKind::Bars), 0);
    }
}
