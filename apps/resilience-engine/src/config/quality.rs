//! Data quality scoring configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration for record quality scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Records older than this are penalized as stale, in milliseconds.
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,
    /// Scores below this threshold raise a quality alert.
    #[serde(default = "default_min_acceptable_score")]
    pub min_acceptable_score: f64,
    /// Null-field ratio above which the null penalty applies.
    #[serde(default = "default_null_ratio_threshold")]
    pub null_ratio_threshold: f64,
    /// Payload field holding the record timestamp.
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    /// Fields every record must carry.
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,
    /// Per-source overrides for the required field list.
    #[serde(default)]
    pub required_fields_by_source: HashMap<String, Vec<String>>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_latency_ms: default_max_latency_ms(),
            min_acceptable_score: default_min_acceptable_score(),
            null_ratio_threshold: default_null_ratio_threshold(),
            timestamp_field: default_timestamp_field(),
            required_fields: default_required_fields(),
            required_fields_by_source: HashMap::new(),
        }
    }
}

impl QualityConfig {
    /// Required fields for a source, falling back to the global list.
    #[must_use]
    pub fn required_fields_for(&self, source: &str) -> &[String] {
        self.required_fields_by_source
            .get(source)
            .map_or(&self.required_fields, Vec::as_slice)
    }
}

const fn default_max_latency_ms() -> u64 {
    1000
}

const fn default_min_acceptable_score() -> f64 {
    0.95
}

const fn default_null_ratio_threshold() -> f64 {
    0.05
}

fn default_timestamp_field() -> String {
    "timestamp".to_string()
}

fn default_required_fields() -> Vec<String> {
    vec![
        "symbol".to_string(),
        "timestamp".to_string(),
        "price".to_string(),
        "volume".to_string(),
    ]
}
