//! Remediation requests and their status lifecycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::health::{ConnectionGap, DataKind, RemediationPriority};

/// Errors from remediation bookkeeping.
#[derive(Debug, Error)]
pub enum RemediationError {
    /// No request with this id exists.
    #[error("unknown remediation request '{0}'")]
    UnknownRequest(String),
    /// The requested status change is not allowed.
    #[error("invalid status transition {from} -> {to} for request '{request_id}'")]
    InvalidTransition {
        /// Request the transition was attempted on.
        request_id: String,
        /// Status the request is in.
        from: RemediationStatus,
        /// Status that was requested.
        to: RemediationStatus,
    },
}

/// Lifecycle status of a remediation request.
///
/// Transitions are monotonic along `Pending -> Approved -> InProgress ->
/// {Completed | Failed}`, with `Cancelled` reachable from `Pending` and
/// `Approved` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemediationStatus {
    /// Submitted, awaiting approval.
    Pending,
    /// Approved, waiting for a dispatch slot.
    Approved,
    /// A worker is executing the backfill.
    InProgress,
    /// Backfill finished successfully.
    Completed,
    /// Backfill ran and failed.
    Failed,
    /// Rejected or withdrawn before execution.
    Cancelled,
}

impl RemediationStatus {
    /// Returns true if the request reached a final state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the request is waiting for a dispatch slot.
    #[must_use]
    pub const fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Returns true if the request can still be cancelled.
    #[must_use]
    pub const fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    /// Validates a status transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved | Self::Cancelled)
                | (Self::Approved, Self::InProgress | Self::Cancelled)
                | (Self::InProgress, Self::Completed | Self::Failed)
        )
    }
}

impl fmt::Display for RemediationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Approved => write!(f, "APPROVED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// One backfill candidate produced from a closed gap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationRequest {
    /// Unique request identifier.
    pub request_id: String,
    /// Gap this request would repair.
    pub gap_id: String,
    /// Stream the gap occurred on.
    pub stream_id: String,
    /// Start of the window to backfill.
    pub window_start: DateTime<Utc>,
    /// End of the window to backfill.
    pub window_end: DateTime<Utc>,
    /// Category of records to retrieve.
    pub data_kind: DataKind,
    /// Urgency tier assigned at classification.
    pub priority: RemediationPriority,
    /// Estimated dollar cost of the backfill.
    pub estimated_cost: Decimal,
    /// Hard ceiling the execution must not exceed.
    pub max_cost_limit: Decimal,
    /// Requires a manual approve call before dispatch.
    pub requires_approval: bool,
    /// Lifecycle status.
    pub status: RemediationStatus,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// When the request was approved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    /// Who approved or cancelled the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    /// When execution started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When execution reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Dollars actually spent, reported by the executor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_cost: Option<Decimal>,
    /// Records retrieved by the backfill.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_retrieved: Option<u64>,
    /// Failure or rejection detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RemediationRequest {
    /// Build a `Pending` request for a closed gap.
    #[must_use]
    pub fn new(
        gap: &ConnectionGap,
        priority: RemediationPriority,
        estimated_cost: Decimal,
        max_cost_limit: Decimal,
        requires_approval: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            gap_id: gap.gap_id.clone(),
            stream_id: gap.stream_id.clone(),
            window_start: gap.start_time,
            window_end: gap.end_time.unwrap_or(gap.start_time),
            data_kind: gap.data_kind,
            priority,
            estimated_cost,
            max_cost_limit,
            requires_approval,
            status: RemediationStatus::Pending,
            created_at,
            approved_at: None,
            approved_by: None,
            started_at: None,
            completed_at: None,
            actual_cost: None,
            records_retrieved: None,
            error_message: None,
        }
    }

    /// Dispatch ordering score, higher first.
    ///
    /// Tier base weights sit an order of magnitude apart, so priority
    /// dominates whenever costs are comparable. Recency halves roughly
    /// every 24 hours since the gap started; cost efficiency is the
    /// inverse of the estimated cost.
    #[must_use]
    pub fn dispatch_score(&self, now: DateTime<Utc>) -> f64 {
        let age_hours = (now - self.window_start).num_seconds().max(0) as f64 / 3600.0;
        let recency = 0.5_f64.powf(age_hours / 24.0);
        let cost = self.estimated_cost.to_f64().unwrap_or(0.0).max(0.0);
        let cost_efficiency = 1.0 / (1.0 + cost);
        self.priority.base_weight() * recency * cost_efficiency
    }

    fn transition(
        &mut self,
        to: RemediationStatus,
    ) -> Result<(), RemediationError> {
        if !self.status.can_transition_to(to) {
            return Err(RemediationError::InvalidTransition {
                request_id: self.request_id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Approve the request, optionally raising its cost ceiling.
    pub fn mark_approved(
        &mut self,
        approver: &str,
        max_cost_limit: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<(), RemediationError> {
        self.transition(RemediationStatus::Approved)?;
        self.approved_at = Some(now);
        self.approved_by = Some(approver.to_string());
        if let Some(limit) = max_cost_limit {
            self.max_cost_limit = limit;
        }
        Ok(())
    }

    /// Cancel the request before execution.
    pub fn mark_cancelled(
        &mut self,
        actor: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RemediationError> {
        self.transition(RemediationStatus::Cancelled)?;
        self.completed_at = Some(now);
        self.approved_by = Some(actor.to_string());
        self.error_message = Some(reason.to_string());
        Ok(())
    }

    /// Move the request into execution.
    pub fn mark_in_progress(&mut self, now: DateTime<Utc>) -> Result<(), RemediationError> {
        self.transition(RemediationStatus::InProgress)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Record a successful backfill.
    pub fn mark_completed(
        &mut self,
        actual_cost: Decimal,
        records_retrieved: u64,
        now: DateTime<Utc>,
    ) -> Result<(), RemediationError> {
        self.transition(RemediationStatus::Completed)?;
        self.completed_at = Some(now);
        self.actual_cost = Some(actual_cost);
        self.records_retrieved = Some(records_retrieved);
        Ok(())
    }

    /// Record a failed backfill and whatever it cost before failing.
    pub fn mark_failed(
        &mut self,
        actual_cost: Decimal,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RemediationError> {
        self.transition(RemediationStatus::Failed)?;
        self.completed_at = Some(now);
        self.actual_cost = Some(actual_cost);
        self.error_message = Some(error.to_string());
        Ok(())
    }
}
