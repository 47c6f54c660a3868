//! Record quality scoring.
//!
//! Scoring is a pure function over the record payload: it starts at 1.0 and
//! subtracts penalties for an empty payload, excessive null fields, a stale
//! or unparsable timestamp, and missing required fields. Scores below the
//! acceptance threshold fan out to registered sinks; a failing sink is
//! logged and never aborts the scoring call.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::alert::{Alert, AlertBus, AlertKind};
use crate::config::QualityConfig;
use crate::observability;

const EMPTY_PAYLOAD_PENALTY: f64 = 0.5;
const NULL_RATIO_PENALTY: f64 = 0.3;
const STALE_TIMESTAMP_PENALTY: f64 = 0.2;
const UNPARSABLE_TIMESTAMP_PENALTY: f64 = 0.1;
const MISSING_FIELDS_PENALTY: f64 = 0.2;

/// Error returned by a quality alert sink that could not deliver.
#[derive(Debug, Clone, Error)]
#[error("quality alert delivery failed: {message}")]
pub struct AlertDeliveryError {
    /// What went wrong.
    pub message: String,
}

/// Receives reports for records that scored below the acceptance threshold.
///
/// Delivery is push-based fan-out, not a queue: every registered sink sees
/// every low report, and each sink's failure affects only itself.
pub trait QualityAlertSink: Send + Sync {
    /// Deliver one low-quality report.
    fn deliver(&self, report: &QualityReport) -> Result<(), AlertDeliveryError>;
}

/// Outcome of scoring one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    /// Where the record came from.
    pub source: String,
    /// Score in [0, 1].
    pub score: f64,
    /// Human-readable defects, in evaluation order.
    pub issues: Vec<String>,
    /// When the record was scored.
    pub scored_at: DateTime<Utc>,
}

/// Scores records and fans low scores out to alert sinks.
pub struct QualityScorer {
    config: QualityConfig,
    alerts: AlertBus,
    sinks: parking_lot::RwLock<Vec<Arc<dyn QualityAlertSink>>>,
}

impl QualityScorer {
    /// Create a scorer publishing low-score alerts on the bus.
    #[must_use]
    pub fn new(config: QualityConfig, alerts: AlertBus) -> Self {
        Self {
            config,
            alerts,
            sinks: parking_lot::RwLock::new(Vec::new()),
        }
    }

    /// Register a sink for low-quality reports.
    pub fn register_sink(&self, sink: Arc<dyn QualityAlertSink>) {
        let mut sinks = self.sinks.write();
        sinks.push(sink);
        tracing::debug!(sink_count = sinks.len(), "Quality alert sink registered");
    }

    /// Score a record and alert if it falls below the acceptance threshold.
    pub fn check(&self, record: &Value, source: &str) -> QualityReport {
        self.check_at(record, source, Utc::now())
    }

    /// Score and alert with an explicit clock.
    pub fn check_at(&self, record: &Value, source: &str, now: DateTime<Utc>) -> QualityReport {
        let report = self.score_at(record, source, now);
        observability::record_quality_score(source, report.score);

        if report.score < self.config.min_acceptable_score {
            self.alerts.publish(Alert::new(
                AlertKind::LowQualityRecord,
                source.to_string(),
                format!(
                    "record scored {:.3} with {} issue(s): {}",
                    report.score,
                    report.issues.len(),
                    report.issues.join("; ")
                ),
            ));
            let sinks = self.sinks.read();
            for sink in sinks.iter() {
                if let Err(err) = sink.deliver(&report) {
                    tracing::warn!(source, error = %err, "Quality alert sink failed");
                }
            }
        }
        report
    }

    /// Score a record without side effects.
    ///
    /// Identical input always yields an identical score and issue list.
    #[must_use]
    pub fn score_at(&self, record: &Value, source: &str, now: DateTime<Utc>) -> QualityReport {
        let mut score: f64 = 1.0;
        let mut issues: Vec<String> = Vec::new();
        let required = self.config.required_fields_for(source);

        match record {
            Value::Object(fields) if !fields.is_empty() => {
                self.penalize_null_ratio(fields, &mut score, &mut issues);
                self.penalize_timestamp(fields, now, &mut score, &mut issues);
                penalize_missing_fields(fields, required, &mut score, &mut issues);
            }
            _ => {
                score -= EMPTY_PAYLOAD_PENALTY;
                issues.push("payload is empty".to_string());
                score -= UNPARSABLE_TIMESTAMP_PENALTY;
                issues.push(format!(
                    "timestamp field '{}' missing",
                    self.config.timestamp_field
                ));
                if !required.is_empty() {
                    score -= MISSING_FIELDS_PENALTY;
                    for field in required {
                        issues.push(format!("missing required field: {field}"));
                    }
                }
            }
        }

        QualityReport {
            source: source.to_string(),
            score: score.clamp(0.0, 1.0),
            issues,
            scored_at: now,
        }
    }

    fn penalize_null_ratio(
        &self,
        fields: &serde_json::Map<String, Value>,
        score: &mut f64,
        issues: &mut Vec<String>,
    ) {
        #[allow(clippy::cast_precision_loss)]
        let ratio = fields.values().filter(|v| v.is_null()).count() as f64 / fields.len() as f64;
        let threshold = self.config.null_ratio_threshold;
        if ratio > threshold {
            // Scales from zero at the threshold up to the full penalty for
            // an all-null payload.
            let scaled = (ratio - threshold) / (1.0 - threshold).max(f64::MIN_POSITIVE);
            *score -= NULL_RATIO_PENALTY * scaled.clamp(0.0, 1.0);
            issues.push(format!(
                "null field ratio {:.1}% exceeds {:.1}%",
                ratio * 100.0,
                threshold * 100.0
            ));
        }
    }

    fn penalize_timestamp(
        &self,
        fields: &serde_json::Map<String, Value>,
        now: DateTime<Utc>,
        score: &mut f64,
        issues: &mut Vec<String>,
    ) {
        let field = &self.config.timestamp_field;
        match fields.get(field).map(parse_timestamp) {
            Some(Some(timestamp)) => {
                let age_ms = (now - timestamp).num_milliseconds();
                let limit = i64::try_from(self.config.max_latency_ms).unwrap_or(i64::MAX);
                if age_ms > limit {
                    *score -= STALE_TIMESTAMP_PENALTY;
                    issues.push(format!("timestamp stale by {age_ms}ms"));
                }
            }
            Some(None) => {
                *score -= UNPARSABLE_TIMESTAMP_PENALTY;
                issues.push(format!("timestamp field '{field}' unparsable"));
            }
            None => {
                *score -= UNPARSABLE_TIMESTAMP_PENALTY;
                issues.push(format!("timestamp field '{field}' missing"));
            }
        }
    }
}

fn penalize_missing_fields(
    fields: &serde_json::Map<String, Value>,
    required: &[String],
    score: &mut f64,
    issues: &mut Vec<String>,
) {
    if required.is_empty() {
        return;
    }
    #[allow(clippy::cast_precision_loss)]
    let per_field = MISSING_FIELDS_PENALTY / required.len() as f64;
    for field in required {
        if !fields.contains_key(field) {
            *score -= per_field;
            issues.push(format!("missing required field: {field}"));
        }
    }
}

/// Accepts RFC 3339 strings and epoch-millisecond numbers.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct RecordingSink {
        delivered: parking_lot::Mutex<Vec<QualityReport>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                delivered: parking_lot::Mutex::new(Vec::new()),
            })
        }
    }

    impl QualityAlertSink for RecordingSink {
        fn deliver(&self, report: &QualityReport) -> Result<(), AlertDeliveryError> {
            self.delivered.lock().push(report.clone());
            Ok(())
        }
    }

    struct BrokenSink;

    impl QualityAlertSink for BrokenSink {
        fn deliver(&self, _report: &QualityReport) -> Result<(), AlertDeliveryError> {
            Err(AlertDeliveryError {
                message: "pager service down".to_string(),
            })
        }
    }

    fn scorer() -> QualityScorer {
        QualityScorer::new(QualityConfig::default(), AlertBus::new())
    }

    fn fresh_record(now: DateTime<Utc>) -> Value {
        json!({
            "symbol": "AAPL",
            "timestamp": now.to_rfc3339(),
            "price": 189.44,
            "volume": 1200,
        })
    }

    #[test]
    fn clean_record_scores_one() {
        let now = Utc::now();
        let report = scorer().score_at(&fresh_record(now), "trades", now);
        assert!((report.score - 1.0).abs() < f64::EPSILON);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn scoring_is_deterministic() {
        let now = Utc::now();
        let record = json!({
            "symbol": "AAPL",
            "timestamp": "garbage",
            "price": Value::Null,
        });
        let s = scorer();
        let a = s.score_at(&record, "trades", now);
        let b = s.score_at(&record, "trades", now);
        assert!((a.score - b.score).abs() < f64::EPSILON);
        assert_eq!(a.issues, b.issues);
    }

    #[test]
    fn empty_record_scores_at_the_floor() {
        let now = Utc::now();
        let report = scorer().score_at(&json!({}), "trades", now);
        // Empty payload, missing timestamp, and all required fields absent
        assert!((report.score - 0.2).abs() < 1e-9);
        assert!(report.issues.len() >= 3);
    }

    #[test]
    fn null_heavy_record_is_penalized_proportionally() {
        let now = Utc::now();
        let record = json!({
            "symbol": "AAPL",
            "timestamp": now.to_rfc3339(),
            "price": 189.44,
            "volume": 1200,
            "bid": Value::Null,
            "ask": Value::Null,
            "bid_size": Value::Null,
            "ask_size": Value::Null,
            "exchange": Value::Null,
            "conditions": Value::Null,
        });
        let report = scorer().score_at(&record, "trades", now);
        // 6 of 10 fields null: ratio 0.6, scaled over (0.6-0.05)/0.95
        let expected = 1.0 - 0.3 * ((0.6 - 0.05) / 0.95);
        assert!((report.score - expected).abs() < 1e-9);
        assert!(report.issues[0].contains("null field ratio"));
    }

    #[test]
    fn stale_timestamp_is_penalized() {
        let now = Utc::now();
        let record = json!({
            "symbol": "AAPL",
            "timestamp": (now - chrono::TimeDelta::seconds(3)).to_rfc3339(),
            "price": 189.44,
            "volume": 1200,
        });
        let report = scorer().score_at(&record, "trades", now);
        assert!((report.score - 0.8).abs() < 1e-9);
        assert!(report.issues[0].contains("stale"));
    }

    #[test]
    fn future_timestamp_is_not_stale() {
        let now = Utc::now();
        let record = json!({
            "symbol": "AAPL",
            "timestamp": (now + chrono::TimeDelta::seconds(30)).to_rfc3339(),
            "price": 189.44,
            "volume": 1200,
        });
        let report = scorer().score_at(&record, "trades", now);
        assert!((report.score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn epoch_millis_timestamps_parse() {
        let now = Utc::now();
        let record = json!({
            "symbol": "AAPL",
            "timestamp": now.timestamp_millis(),
            "price": 189.44,
            "volume": 1200,
        });
        let report = scorer().score_at(&record, "trades", now);
        assert!((report.score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unparsable_timestamp_is_penalized_lighter_than_stale() {
        let now = Utc::now();
        let record = json!({
            "symbol": "AAPL",
            "timestamp": "not-a-date",
            "price": 189.44,
            "volume": 1200,
        });
        let report = scorer().score_at(&record, "trades", now);
        assert!((report.score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn single_missing_field_sits_exactly_at_the_acceptance_threshold() {
        let now = Utc::now();
        let record = json!({
            "symbol": "AAPL",
            "timestamp": now.to_rfc3339(),
            "volume": 1200,
        });
        let s = scorer();
        let report = s.check_at(&record, "trades", now);
        // 0.2 / 4 required fields
        assert!((report.score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn low_score_fans_out_to_sinks() {
        let now = Utc::now();
        let s = scorer();
        let sink = RecordingSink::new();
        s.register_sink(sink.clone());

        let record = json!({
            "symbol": "AAPL",
            "timestamp": now.to_rfc3339(),
        });
        let report = s.check_at(&record, "trades", now);

        assert!(report.score < 0.95);
        let delivered = sink.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert!((delivered[0].score - report.score).abs() < f64::EPSILON);
    }

    #[test]
    fn acceptable_score_skips_sinks() {
        let now = Utc::now();
        let s = scorer();
        let sink = RecordingSink::new();
        s.register_sink(sink.clone());

        s.check_at(&fresh_record(now), "trades", now);

        assert!(sink.delivered.lock().is_empty());
    }

    #[test]
    fn broken_sink_does_not_block_the_others() {
        let now = Utc::now();
        let s = scorer();
        let sink = RecordingSink::new();
        s.register_sink(Arc::new(BrokenSink));
        s.register_sink(sink.clone());

        s.check_at(&json!({}), "trades", now);

        assert_eq!(sink.delivered.lock().len(), 1);
    }

    #[test]
    fn source_override_changes_required_fields() {
        let now = Utc::now();
        let mut config = QualityConfig::default();
        config
            .required_fields_by_source
            .insert("bars".to_string(), vec!["open".to_string()]);
        let s = QualityScorer::new(config, AlertBus::new());

        let record = json!({
            "symbol": "AAPL",
            "timestamp": now.to_rfc3339(),
        });
        let report = s.score_at(&record, "bars", now);
        // The single required field "open" is missing: full 0.2 penalty
        assert!((report.score - 0.8).abs() < 1e-9);
    }
}
