//! Bounded dispatch of approved remediations.
//!
//! The dispatcher runs one periodic sweep: auto-approve what needs no human,
//! then hand approved requests to workers while permits and budget allow.
//! Workers execute the backfill through `BackfillExecutorPort`, record the
//! terminal status, and report actual spend to the ledger exactly once. The
//! permit count caps concurrent executions; excess approved work simply
//! stays queued.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use crate::alert::{Alert, AlertBus, AlertKind};
use crate::config::RemediationConfig;
use crate::observability;
use crate::remediation::budget::{BudgetGate, BudgetLedgerPort};
use crate::remediation::queue::RemediationQueue;
use crate::remediation::request::RemediationRequest;

/// Result of a successful backfill run.
#[derive(Debug, Clone)]
pub struct BackfillOutcome {
    /// Dollars actually spent.
    pub actual_cost: Decimal,
    /// Records retrieved.
    pub records_retrieved: u64,
}

/// Backfill execution errors.
#[derive(Debug, Clone, Error)]
pub enum BackfillError {
    /// The run started and failed partway.
    #[error("backfill failed: {message}")]
    Failed {
        /// Dollars spent before the failure.
        partial_cost: Decimal,
        /// Error details.
        message: String,
    },
    /// The provider could not be reached; nothing was spent.
    #[error("backfill provider unavailable: {message}")]
    ProviderUnavailable {
        /// Error details.
        message: String,
    },
}

impl BackfillError {
    /// Dollars spent before the error.
    #[must_use]
    pub const fn partial_cost(&self) -> Decimal {
        match self {
            Self::Failed { partial_cost, .. } => *partial_cost,
            Self::ProviderUnavailable { .. } => Decimal::ZERO,
        }
    }
}

/// Port to whatever actually retrieves the missed data.
#[async_trait]
pub trait BackfillExecutorPort: Send + Sync {
    /// Run the backfill for one request.
    async fn execute(&self, request: &RemediationRequest) -> Result<BackfillOutcome, BackfillError>;
}

/// Executor used until a real backfill provider is wired in. Marks every
/// request complete at zero cost so the pipeline stays observable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpBackfillExecutor;

#[async_trait]
impl BackfillExecutorPort for NoOpBackfillExecutor {
    async fn execute(
        &self,
        request: &RemediationRequest,
    ) -> Result<BackfillOutcome, BackfillError> {
        tracing::warn!(
            request_id = %request.request_id,
            stream_id = %request.stream_id,
            "No backfill executor configured; completing at zero cost"
        );
        Ok(BackfillOutcome {
            actual_cost: Decimal::ZERO,
            records_retrieved: 0,
        })
    }
}

/// Dispatches approved remediations to a bounded worker pool.
pub struct RemediationDispatcher {
    config: RemediationConfig,
    queue: Arc<RemediationQueue>,
    gate: BudgetGate,
    ledger: Arc<dyn BudgetLedgerPort>,
    executor: Arc<dyn BackfillExecutorPort>,
    alerts: AlertBus,
    permits: Arc<Semaphore>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl RemediationDispatcher {
    /// Wire a dispatcher over the queue, ledger, and executor.
    #[must_use]
    pub fn new(
        config: RemediationConfig,
        queue: Arc<RemediationQueue>,
        ledger: Arc<dyn BudgetLedgerPort>,
        executor: Arc<dyn BackfillExecutorPort>,
        alerts: AlertBus,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent));
        let gate = BudgetGate::new(Arc::clone(&ledger), &config);
        Self {
            config,
            queue,
            gate,
            ledger,
            executor,
            alerts,
            permits,
            workers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Run the sweep loop until cancelled, then wait for in-flight workers.
    ///
    /// Cancellation stops new dispatches; running backfills finish their
    /// current unit of work.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            sweep_interval_secs = self.config.sweep_interval_secs,
            max_concurrent = self.config.max_concurrent,
            "Remediation dispatcher started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => self.cycle().await,
            }
        }

        tracing::info!("Remediation dispatcher stopping, draining workers");
        self.drain_workers().await;
    }

    /// One sweep: approve, then dispatch while permits and budget allow.
    async fn cycle(&self) {
        let approved = self.queue.auto_approve_sweep();
        if approved > 0 {
            tracing::debug!(approved, "Auto-approval sweep");
        }
        self.prune_finished_workers();

        loop {
            // Permit released on drop unless a worker takes it
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };
            let now = Utc::now();
            let Some(candidate) = self.queue.peek_dispatchable_at(now) else {
                break;
            };

            if let Err(denial) = self.gate.check(candidate.estimated_cost).await {
                // The highest-scored request claims the remaining budget
                // first; cheaper work does not jump past it.
                observability::record_budget_deferral();
                self.alerts.publish(Alert::new(
                    AlertKind::BudgetDeferred,
                    candidate.stream_id.clone(),
                    format!("request {} deferred: {denial}", candidate.request_id),
                ));
                break;
            }

            match self.queue.begin_execution(&candidate.request_id, now) {
                Ok(request) => self.spawn_worker(request, permit),
                Err(err) => {
                    // Cancelled between peek and claim; move on.
                    tracing::debug!(
                        request_id = %candidate.request_id,
                        error = %err,
                        "Dispatch candidate no longer executable"
                    );
                }
            }
        }
    }

    fn spawn_worker(&self, request: RemediationRequest, permit: OwnedSemaphorePermit) {
        tracing::info!(
            request_id = %request.request_id,
            stream_id = %request.stream_id,
            priority = request.priority.as_str(),
            estimated_cost = %request.estimated_cost,
            "Backfill dispatched"
        );
        observability::record_remediation_dispatched();

        let queue = Arc::clone(&self.queue);
        let executor = Arc::clone(&self.executor);
        let ledger = Arc::clone(&self.ledger);
        let alerts = self.alerts.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            execute_and_record(&queue, &*executor, &*ledger, &alerts, request).await;
        });
        self.workers.lock().push(handle);
    }

    fn prune_finished_workers(&self) {
        self.workers.lock().retain(|h| !h.is_finished());
    }

    async fn drain_workers(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Backfill worker panicked");
            }
        }
    }
}

/// Execute one backfill, record its terminal status, and report spend.
///
/// The terminal transition succeeds at most once per request, and spend is
/// reported only when that transition succeeds, so the ledger sees each
/// request exactly once.
async fn execute_and_record(
    queue: &RemediationQueue,
    executor: &dyn BackfillExecutorPort,
    ledger: &dyn BudgetLedgerPort,
    alerts: &AlertBus,
    request: RemediationRequest,
) {
    let request_id = request.request_id.clone();
    let terminal = match executor.execute(&request).await {
        Ok(outcome) => {
            tracing::info!(
                request_id = %request_id,
                actual_cost = %outcome.actual_cost,
                records_retrieved = outcome.records_retrieved,
                "Backfill completed"
            );
            queue.complete(
                &request_id,
                outcome.actual_cost,
                outcome.records_retrieved,
                Utc::now(),
            )
        }
        Err(err) => {
            alerts.publish(Alert::new(
                AlertKind::RemediationFailed,
                request.stream_id.clone(),
                format!("backfill {request_id} failed: {err}"),
            ));
            queue.fail(&request_id, err.partial_cost(), &err.to_string(), Utc::now())
        }
    };

    match terminal {
        Ok(done) => {
            let actual_cost = done.actual_cost.unwrap_or_default();
            if actual_cost > Decimal::ZERO {
                let category = format!("backfill:{}", done.data_kind);
                if let Err(err) = ledger.record_spend(actual_cost, &category).await {
                    tracing::error!(
                        request_id = %request_id,
                        actual_cost = %actual_cost,
                        error = %err,
                        "Failed to report spend to the budget ledger"
                    );
                }
            }
        }
        Err(err) => {
            tracing::error!(
                request_id = %request_id,
                error = %err,
                "Terminal status transition failed"
            );
        }
    }
}
