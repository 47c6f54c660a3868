//! Backfill cost estimation.
//!
//! The external estimator is an opaque service behind `CostEstimatorPort`.
//! When it is absent or errors, the analyzer falls back to a local linear
//! model priced from configured per-kind record rates and sizes.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GapAnalyzerConfig;
use crate::health::{DataKind, RemediationPriority};

/// Confidence reported for local linear estimates.
const LINEAR_MODEL_CONFIDENCE: f64 = 0.5;

/// Inputs for pricing one backfill window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostQuery {
    /// Category of records to retrieve.
    pub data_kind: DataKind,
    /// Length of the window in seconds.
    pub window_seconds: f64,
    /// Symbols subscribed on the stream.
    pub symbol_count: u32,
    /// Urgency of the remediation, for tiered provider pricing.
    pub priority: RemediationPriority,
}

/// Estimated price of a backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Estimated dollar cost.
    pub estimated_cost: Decimal,
    /// Estimator confidence in [0.0, 1.0].
    pub confidence: f64,
}

/// Cost estimator errors.
#[derive(Debug, Clone, Error)]
pub enum CostEstimatorError {
    /// The estimator service could not be reached.
    #[error("cost estimator unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },
    /// The estimator rejected the query.
    #[error("cost estimator rejected query: {message}")]
    InvalidQuery {
        /// Error details.
        message: String,
    },
}

/// Port to the external cost estimation service.
#[async_trait]
pub trait CostEstimatorPort: Send + Sync {
    /// Price one backfill window.
    async fn estimate(&self, query: &CostQuery) -> Result<CostEstimate, CostEstimatorError>;
}

/// Local linear pricing: volume from per-kind record rates, size from
/// per-kind record bytes, dollars from a flat per-gigabyte rate.
#[derive(Debug, Clone)]
pub struct LinearCostModel {
    config: GapAnalyzerConfig,
}

impl LinearCostModel {
    /// Build a model from the analyzer configuration.
    #[must_use]
    pub const fn new(config: GapAnalyzerConfig) -> Self {
        Self { config }
    }

    /// Estimated records lost over the window.
    #[must_use]
    pub fn estimated_records(&self, query: &CostQuery) -> f64 {
        query.window_seconds.max(0.0) * self.config.records_per_second_for(query.data_kind)
    }

    /// Price a window. Never fails; unknown kinds price at zero.
    #[must_use]
    pub fn estimate(&self, query: &CostQuery) -> CostEstimate {
        let records = self.estimated_records(query);
        #[allow(clippy::cast_precision_loss)]
        let bytes = records * self.config.avg_record_bytes_for(query.data_kind) as f64;
        let gigabytes = bytes / 1_000_000_000.0;
        let dollars = gigabytes * self.config.cost_per_gigabyte;

        CostEstimate {
            estimated_cost: Decimal::try_from(dollars).unwrap_or_default().round_dp(2),
            confidence: LINEAR_MODEL_CONFIDENCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn query(kind: DataKind, window_seconds: f64) -> CostQuery {
        CostQuery {
            data_kind: kind,
            window_seconds,
            symbol_count: 25,
            priority: RemediationPriority::Low,
        }
    }

    #[test]
    fn linear_model_prices_trades_window() {
        let model = LinearCostModel::new(GapAnalyzerConfig::default());

        // 45s * 300 rec/s * 120 B = 1.62 MB; at $60/GB that is $0.0972
        let estimate = model.estimate(&query(DataKind::Trades, 45.0));
        assert_eq!(estimate.estimated_cost, dec!(0.10));
        assert!((estimate.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn linear_model_scales_with_duration() {
        let model = LinearCostModel::new(GapAnalyzerConfig::default());

        let short = model.estimate(&query(DataKind::Quotes, 60.0));
        let long = model.estimate(&query(DataKind::Quotes, 600.0));
        assert!(long.estimated_cost > short.estimated_cost);
    }

    #[test]
    fn linear_model_negative_window_prices_zero() {
        let model = LinearCostModel::new(GapAnalyzerConfig::default());
        let estimate = model.estimate(&query(DataKind::Bars, -10.0));
        assert_eq!(estimate.estimated_cost, Decimal::ZERO);
    }

    #[test]
    fn unconfigured_kind_prices_zero() {
        let config = GapAnalyzerConfig {
            records_per_second: std::collections::HashMap::new(),
            ..Default::default()
        };
        let model = LinearCostModel::new(config);
        let estimate = model.estimate(&query(DataKind::Trades, 300.0));
        assert_eq!(estimate.estimated_cost, Decimal::ZERO);
    }

    #[test]
    fn estimated_records_uses_per_kind_rate() {
        let model = LinearCostModel::new(GapAnalyzerConfig::default());
        // Quotes default to 1500 records/second
        let records = model.estimated_records(&query(DataKind::Quotes, 10.0));
        assert!((records - 15_000.0).abs() < f64::EPSILON);
    }
}
