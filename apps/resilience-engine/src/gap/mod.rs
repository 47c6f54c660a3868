//! Gap classification and backfill pricing.
//!
//! Turns closed connection gaps into prioritized, priced remediation
//! candidates, or rejects them when too short or too expensive.

mod analyzer;
mod cost;

pub use analyzer::{GapAnalyzer, GapDecision, SkipReason};
pub use cost::{CostEstimate, CostEstimatorError, CostEstimatorPort, CostQuery, LinearCostModel};
