//! The remediation queue: submission, approval, and dispatch ordering.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::config::RemediationConfig;
use crate::observability;
use crate::remediation::request::{RemediationError, RemediationRequest, RemediationStatus};

/// Actor name recorded on sweep approvals.
const AUTO_APPROVER: &str = "auto-approval";

/// Priority-ordered, approval-gated queue of remediation requests.
///
/// Submission never blocks: requests land in an owned map guarded by a
/// mutex and all further work happens in the dispatcher's sweep. Callers
/// only ever see copies of the stored requests.
pub struct RemediationQueue {
    auto_approve_limit: Decimal,
    requests: Mutex<HashMap<String, RemediationRequest>>,
}

impl RemediationQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new(config: &RemediationConfig) -> Self {
        Self {
            auto_approve_limit: Decimal::try_from(config.auto_approve_limit).unwrap_or_default(),
            requests: Mutex::new(HashMap::new()),
        }
    }

    // ============================================
    // Submission & Approval
    // ============================================

    /// Enqueue a request. Returns its id.
    pub fn submit(&self, request: RemediationRequest) -> String {
        let request_id = request.request_id.clone();
        tracing::info!(
            request_id = %request_id,
            stream_id = %request.stream_id,
            priority = request.priority.as_str(),
            estimated_cost = %request.estimated_cost,
            requires_approval = request.requires_approval,
            "Remediation submitted"
        );
        observability::record_remediation_submitted(request.priority);
        self.requests.lock().insert(request_id.clone(), request);
        request_id
    }

    /// Approve pending requests that do not need a human.
    ///
    /// A pending request moves to `Approved` when it never required approval
    /// (urgent or cheap at classification) or when its estimated cost is
    /// within the auto-approve limit, boundary inclusive. Returns the number
    /// approved.
    pub fn auto_approve_sweep(&self) -> usize {
        self.auto_approve_sweep_at(Utc::now())
    }

    /// Run the approval sweep with an explicit clock.
    pub fn auto_approve_sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut approved = 0;
        let mut requests = self.requests.lock();
        for request in requests.values_mut() {
            if request.status != RemediationStatus::Pending {
                continue;
            }
            if request.requires_approval && request.estimated_cost > self.auto_approve_limit {
                continue;
            }
            if request.mark_approved(AUTO_APPROVER, None, now).is_ok() {
                tracing::debug!(
                    request_id = %request.request_id,
                    estimated_cost = %request.estimated_cost,
                    "Remediation auto-approved"
                );
                approved += 1;
            }
        }
        approved
    }

    /// Manually approve a pending request, optionally raising its cost
    /// ceiling.
    pub fn approve(
        &self,
        request_id: &str,
        approver: &str,
        max_cost_limit: Option<Decimal>,
    ) -> Result<(), RemediationError> {
        self.approve_at(request_id, approver, max_cost_limit, Utc::now())
    }

    /// Manual approval with an explicit clock.
    pub fn approve_at(
        &self,
        request_id: &str,
        approver: &str,
        max_cost_limit: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<(), RemediationError> {
        let mut requests = self.requests.lock();
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| RemediationError::UnknownRequest(request_id.to_string()))?;
        request.mark_approved(approver, max_cost_limit, now)?;
        tracing::info!(request_id, approver, "Remediation approved");
        Ok(())
    }

    /// Reject a request before execution. The request ends `Cancelled` with
    /// the reason recorded.
    pub fn reject(
        &self,
        request_id: &str,
        approver: &str,
        reason: &str,
    ) -> Result<(), RemediationError> {
        self.reject_at(request_id, approver, reason, Utc::now())
    }

    /// Rejection with an explicit clock.
    pub fn reject_at(
        &self,
        request_id: &str,
        approver: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RemediationError> {
        let mut requests = self.requests.lock();
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| RemediationError::UnknownRequest(request_id.to_string()))?;
        request.mark_cancelled(approver, reason, now)?;
        tracing::info!(request_id, approver, reason, "Remediation rejected");
        Ok(())
    }

    // ============================================
    // Dispatch
    // ============================================

    /// Copy of the best approved request at `now`, by dispatch score.
    ///
    /// Score ties break toward the earlier `created_at`.
    #[must_use]
    pub fn peek_dispatchable_at(&self, now: DateTime<Utc>) -> Option<RemediationRequest> {
        let requests = self.requests.lock();
        requests
            .values()
            .filter(|r| r.status.is_dispatchable())
            .max_by(|a, b| {
                a.dispatch_score(now)
                    .total_cmp(&b.dispatch_score(now))
                    // Older request wins the tie, so compare reversed
                    .then_with(|| b.created_at.cmp(&a.created_at))
            })
            .cloned()
    }

    /// Move an approved request into execution and return a copy for the
    /// worker.
    pub fn begin_execution(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RemediationRequest, RemediationError> {
        let mut requests = self.requests.lock();
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| RemediationError::UnknownRequest(request_id.to_string()))?;
        request.mark_in_progress(now)?;
        let copy = request.clone();
        observability::set_remediations_in_progress(count_in_progress(&requests));
        Ok(copy)
    }

    /// Record a successful backfill and return the terminal copy.
    pub fn complete(
        &self,
        request_id: &str,
        actual_cost: Decimal,
        records_retrieved: u64,
        now: DateTime<Utc>,
    ) -> Result<RemediationRequest, RemediationError> {
        let mut requests = self.requests.lock();
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| RemediationError::UnknownRequest(request_id.to_string()))?;
        request.mark_completed(actual_cost, records_retrieved, now)?;
        let copy = request.clone();
        observability::set_remediations_in_progress(count_in_progress(&requests));
        observability::record_remediation_terminal(RemediationStatus::Completed);
        Ok(copy)
    }

    /// Record a failed backfill and return the terminal copy.
    pub fn fail(
        &self,
        request_id: &str,
        actual_cost: Decimal,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RemediationRequest, RemediationError> {
        let mut requests = self.requests.lock();
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| RemediationError::UnknownRequest(request_id.to_string()))?;
        request.mark_failed(actual_cost, error, now)?;
        let copy = request.clone();
        observability::set_remediations_in_progress(count_in_progress(&requests));
        observability::record_remediation_terminal(RemediationStatus::Failed);
        Ok(copy)
    }

    // ============================================
    // Queries
    // ============================================

    /// Copy of one request.
    #[must_use]
    pub fn request(&self, request_id: &str) -> Option<RemediationRequest> {
        self.requests.lock().get(request_id).cloned()
    }

    /// Requests awaiting approval.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.count_with_status(RemediationStatus::Pending)
    }

    /// Requests executing right now.
    #[must_use]
    pub fn in_progress_count(&self) -> usize {
        count_in_progress(&self.requests.lock())
    }

    /// Requests per status.
    #[must_use]
    pub fn counts_by_status(&self) -> HashMap<RemediationStatus, usize> {
        let requests = self.requests.lock();
        let mut counts = HashMap::new();
        for request in requests.values() {
            *counts.entry(request.status).or_insert(0) += 1;
        }
        counts
    }

    fn count_with_status(&self, status: RemediationStatus) -> usize {
        self.requests
            .lock()
            .values()
            .filter(|r| r.status == status)
            .count()
    }
}

fn count_in_progress(requests: &HashMap<String, RemediationRequest>) -> usize {
    requests
        .values()
        .filter(|r| r.status == RemediationStatus::InProgress)
        .count()
}
