//! Gap classification: decides whether a closed gap warrants a backfill.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

use crate::config::GapAnalyzerConfig;
use crate::gap::cost::{CostEstimatorPort, CostQuery, LinearCostModel};
use crate::health::{ConnectionGap, RemediationPriority};
use crate::observability;
use crate::remediation::RemediationRequest;

/// Why a gap was not turned into a remediation.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The gap is still open; only closed gaps are classified.
    NotClosed,
    /// Outage shorter than the minimum worth remediating.
    TooShort {
        /// Measured outage length.
        duration_seconds: f64,
        /// Configured minimum.
        minimum: f64,
    },
    /// Estimated cost exceeds the hard ceiling.
    CostCeiling {
        /// Estimated dollar cost.
        estimated_cost: Decimal,
        /// Configured ceiling.
        ceiling: Decimal,
    },
}

impl SkipReason {
    /// Snake-case label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotClosed => "not_closed",
            Self::TooShort { .. } => "too_short",
            Self::CostCeiling { .. } => "cost_ceiling",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotClosed => write!(f, "gap is not closed"),
            Self::TooShort {
                duration_seconds,
                minimum,
            } => write!(f, "duration {duration_seconds}s below minimum {minimum}s"),
            Self::CostCeiling {
                estimated_cost,
                ceiling,
            } => write!(f, "estimated cost ${estimated_cost} above ceiling ${ceiling}"),
        }
    }
}

/// Outcome of classifying one closed gap.
#[derive(Debug, Clone)]
pub enum GapDecision {
    /// No remediation warranted.
    Skip {
        /// Why the gap was skipped.
        reason: SkipReason,
    },
    /// A backfill candidate, ready for the remediation queue.
    Remediate(Box<RemediationRequest>),
}

impl GapDecision {
    /// Returns true if the gap produced a remediation candidate.
    #[must_use]
    pub const fn is_remediate(&self) -> bool {
        matches!(self, Self::Remediate(_))
    }
}

/// Classifies closed gaps into remediation candidates.
///
/// Pure and idempotent over a single gap: the same gap always yields the
/// same priority, and the same cost when the external estimator is
/// deterministic.
pub struct GapAnalyzer {
    ceiling: Decimal,
    cheap_threshold: Decimal,
    min_gap_duration: f64,
    critical_gap_duration: f64,
    fallback: LinearCostModel,
    estimator: Option<Arc<dyn CostEstimatorPort>>,
}

impl GapAnalyzer {
    /// Build an analyzer. `estimator` is the optional external service;
    /// pricing falls back to the local linear model without it.
    #[must_use]
    pub fn new(config: GapAnalyzerConfig, estimator: Option<Arc<dyn CostEstimatorPort>>) -> Self {
        Self {
            ceiling: Decimal::try_from(config.max_backfill_cost).unwrap_or_default(),
            cheap_threshold: Decimal::try_from(config.cheap_auto_threshold).unwrap_or_default(),
            min_gap_duration: config.min_gap_duration_secs,
            critical_gap_duration: config.critical_gap_duration_secs,
            fallback: LinearCostModel::new(config),
            estimator,
        }
    }

    /// Classify a closed gap.
    pub async fn analyze(&self, gap: &ConnectionGap, symbol_count: u32) -> GapDecision {
        self.analyze_at(gap, symbol_count, Utc::now()).await
    }

    /// Classify a closed gap with an explicit clock for the request's
    /// creation time.
    pub async fn analyze_at(
        &self,
        gap: &ConnectionGap,
        symbol_count: u32,
        now: DateTime<Utc>,
    ) -> GapDecision {
        let Some(duration) = gap.duration_seconds else {
            tracing::warn!(gap_id = %gap.gap_id, "Gap handed to analyzer before closure");
            return self.skip(gap, SkipReason::NotClosed);
        };

        if duration < self.min_gap_duration {
            return self.skip(
                gap,
                SkipReason::TooShort {
                    duration_seconds: duration,
                    minimum: self.min_gap_duration,
                },
            );
        }

        let priority = self.classify(gap, duration);
        let query = CostQuery {
            data_kind: gap.data_kind,
            window_seconds: duration,
            symbol_count,
            priority,
        };
        let estimate = self.price(&query, gap).await;

        if estimate.estimated_cost > self.ceiling {
            return self.skip(
                gap,
                SkipReason::CostCeiling {
                    estimated_cost: estimate.estimated_cost,
                    ceiling: self.ceiling,
                },
            );
        }

        let requires_approval =
            !priority.is_urgent() && estimate.estimated_cost >= self.cheap_threshold;

        let request = RemediationRequest::new(
            gap,
            priority,
            estimate.estimated_cost,
            self.ceiling,
            requires_approval,
            now,
        );
        tracing::info!(
            gap_id = %gap.gap_id,
            request_id = %request.request_id,
            priority = priority.as_str(),
            estimated_cost = %request.estimated_cost,
            requires_approval,
            "Gap classified for remediation"
        );
        GapDecision::Remediate(Box::new(request))
    }

    const fn classify(&self, gap: &ConnectionGap, duration: f64) -> RemediationPriority {
        if duration >= self.critical_gap_duration {
            RemediationPriority::Critical
        } else if gap.affects_real_time {
            RemediationPriority::High
        } else if gap.affects_baseline {
            RemediationPriority::Medium
        } else {
            RemediationPriority::Low
        }
    }

    async fn price(&self, query: &CostQuery, gap: &ConnectionGap) -> crate::gap::CostEstimate {
        if let Some(estimator) = &self.estimator {
            match estimator.estimate(query).await {
                Ok(estimate) => {
                    tracing::debug!(
                        gap_id = %gap.gap_id,
                        estimated_cost = %estimate.estimated_cost,
                        confidence = estimate.confidence,
                        "External cost estimate"
                    );
                    return estimate;
                }
                Err(err) => {
                    tracing::warn!(
                        gap_id = %gap.gap_id,
                        error = %err,
                        "Cost estimator failed, using linear fallback"
                    );
                }
            }
        }
        self.fallback.estimate(query)
    }

    fn skip(&self, gap: &ConnectionGap, reason: SkipReason) -> GapDecision {
        tracing::debug!(
            gap_id = %gap.gap_id,
            stream_id = %gap.stream_id,
            reason = %reason,
            "Gap skipped"
        );
        observability::record_gap_skipped(reason.as_str());
        GapDecision::Skip { reason }
    }
}
