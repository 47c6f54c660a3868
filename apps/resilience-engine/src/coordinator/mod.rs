//! Composition root wiring the subsystem together.
//!
//! The coordinator owns one instance of every piece: the alert bus, the
//! health tracker, the gap analyzer, the remediation queue and dispatcher,
//! the reconnection supervisor, the failover manager, and the quality
//! scorer. Callers feed it connection events, call results, and records;
//! `start` spawns the background loops that move outages through analysis
//! and into paid remediation.

mod snapshot;

pub use snapshot::HealthSnapshot;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alert::{Alert, AlertBus};
use crate::config::Config;
use crate::failover::{ComponentStatus, FailoverError, FailoverHook, FailoverManager};
use crate::gap::{CostEstimatorPort, GapAnalyzer, GapDecision};
use crate::health::{
    ConnectionHealthTracker, HealthNotice, HealthTrackerError, StreamEvent, StreamHealth,
    StreamSpec,
};
use crate::quality::{QualityAlertSink, QualityReport, QualityScorer};
use crate::reconnect::{ReconnectError, ReconnectHandler, ReconnectSupervisor};
use crate::remediation::{
    BackfillExecutorPort, BudgetLedgerPort, RemediationDispatcher, RemediationError,
    RemediationQueue, RemediationRequest,
};

// ============================================
// Handler Registry
// ============================================

/// Routes reconnect attempts to the handler registered for each stream.
#[derive(Default)]
struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ReconnectHandler>>>,
}

impl HandlerRegistry {
    fn insert(&self, stream_id: impl Into<String>, handler: Arc<dyn ReconnectHandler>) {
        self.handlers.write().insert(stream_id.into(), handler);
    }
}

#[async_trait]
impl ReconnectHandler for HandlerRegistry {
    async fn attempt(&self, stream_id: &str) -> Result<(), ReconnectError> {
        let handler = self.handlers.read().get(stream_id).cloned();
        match handler {
            Some(handler) => handler.attempt(stream_id).await,
            None => Err(ReconnectError::Unsupported {
                stream_id: stream_id.to_string(),
            }),
        }
    }
}

// ============================================
// Coordinator
// ============================================

/// Owns the full stream-resilience pipeline.
pub struct ResilienceCoordinator {
    alerts: AlertBus,
    tracker: Arc<ConnectionHealthTracker>,
    analyzer: Arc<GapAnalyzer>,
    queue: Arc<RemediationQueue>,
    dispatcher: Arc<RemediationDispatcher>,
    supervisor: Arc<ReconnectSupervisor>,
    failover: Arc<FailoverManager>,
    scorer: Arc<QualityScorer>,
    handlers: Arc<HandlerRegistry>,
    sweep_interval: Duration,
    cancel: CancellationToken,
    notice_rx: Mutex<Option<mpsc::UnboundedReceiver<HealthNotice>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ResilienceCoordinator {
    /// Build the full pipeline from configuration.
    ///
    /// `estimator` prices backfills when an external quote service exists;
    /// without one the analyzer falls back to its linear model. `ledger`
    /// and `executor` are the spend ledger and the backfill provider the
    /// dispatcher charges and drives.
    #[must_use]
    pub fn new(
        config: &Config,
        estimator: Option<Arc<dyn CostEstimatorPort>>,
        ledger: Arc<dyn BudgetLedgerPort>,
        executor: Arc<dyn BackfillExecutorPort>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let alerts = AlertBus::new();

        let (tracker, notice_rx) =
            ConnectionHealthTracker::new(config.health.clone(), &config.reconnect, alerts.clone());
        let tracker = Arc::new(tracker);

        let analyzer = Arc::new(GapAnalyzer::new(config.gaps.clone(), estimator));
        let queue = Arc::new(RemediationQueue::new(&config.remediation));
        let dispatcher = Arc::new(RemediationDispatcher::new(
            config.remediation.clone(),
            Arc::clone(&queue),
            ledger,
            executor,
            alerts.clone(),
        ));

        let handlers = Arc::new(HandlerRegistry::default());
        let routing = Arc::clone(&handlers) as Arc<dyn ReconnectHandler>;
        let supervisor = Arc::new(ReconnectSupervisor::new(
            &config.reconnect,
            Arc::clone(&tracker),
            routing,
            cancel.child_token(),
        ));

        let failover = Arc::new(FailoverManager::new(config.failover.clone(), alerts.clone()));
        let scorer = Arc::new(QualityScorer::new(config.quality.clone(), alerts.clone()));

        Self {
            alerts,
            tracker,
            analyzer,
            queue,
            dispatcher,
            supervisor,
            failover,
            scorer,
            handlers,
            sweep_interval: config.health.sweep_interval(),
            cancel,
            notice_rx: Mutex::new(Some(notice_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    // ============================================
    // Registration
    // ============================================

    /// Register a stream for health monitoring.
    pub fn register_stream(&self, spec: StreamSpec) -> Result<(), HealthTrackerError> {
        self.tracker.register_stream(spec)
    }

    /// Register the handler that re-establishes a stream's connection.
    ///
    /// Streams without a handler still get outage tracking and gap
    /// analysis; their reconnect attempts fail until one is registered.
    pub fn register_reconnect_handler(
        &self,
        stream_id: impl Into<String>,
        handler: Arc<dyn ReconnectHandler>,
    ) {
        self.handlers.insert(stream_id, handler);
    }

    /// Register a component for failover supervision.
    pub fn register_component(
        &self,
        component_id: impl Into<String>,
        hook: Option<Arc<dyn FailoverHook>>,
    ) -> Result<(), FailoverError> {
        self.failover.register_component(component_id, hook)
    }

    /// Register a sink for low-quality record reports.
    pub fn register_quality_sink(&self, sink: Arc<dyn QualityAlertSink>) {
        self.scorer.register_sink(sink);
    }

    // ============================================
    // Lifecycle
    // ============================================

    /// Spawn the background loops: the liveness sweep, the notice router,
    /// and the remediation dispatcher. Calling `start` twice is a no-op.
    pub fn start(&self) {
        let Some(notice_rx) = self.notice_rx.lock().take() else {
            tracing::warn!("Coordinator already started");
            return;
        };

        let mut tasks = self.tasks.lock();
        tasks.push(self.spawn_sweep_loop());
        tasks.push(self.spawn_notice_router(notice_rx));
        tasks.push(self.spawn_dispatcher());
        tracing::info!("Resilience coordinator started");
    }

    /// Stop the background loops and wait for them to drain.
    pub async fn stop(&self) {
        tracing::info!("Resilience coordinator stopping");
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(error) = task.await {
                tracing::error!(%error, "Coordinator task panicked during shutdown");
            }
        }
        self.supervisor.shutdown().await;
        tracing::info!("Resilience coordinator stopped");
    }

    fn spawn_sweep_loop(&self) -> JoinHandle<()> {
        let tracker = Arc::clone(&self.tracker);
        let cancel = self.cancel.child_token();
        let period = self.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        tracker.sweep();
                    }
                }
            }
        })
    }

    fn spawn_notice_router(
        &self,
        mut notice_rx: mpsc::UnboundedReceiver<HealthNotice>,
    ) -> JoinHandle<()> {
        let supervisor = Arc::clone(&self.supervisor);
        let analyzer = Arc::clone(&self.analyzer);
        let queue = Arc::clone(&self.queue);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            loop {
                let notice = tokio::select! {
                    () = cancel.cancelled() => return,
                    notice = notice_rx.recv() => match notice {
                        Some(notice) => notice,
                        None => return,
                    },
                };

                match notice {
                    HealthNotice::StreamDisconnected { stream_id } => {
                        supervisor.watch(&stream_id);
                    }
                    HealthNotice::GapClosed { gap, symbol_count } => {
                        if let GapDecision::Remediate(request) =
                            analyzer.analyze(&gap, symbol_count).await
                        {
                            let request_id = queue.submit(*request);
                            tracing::info!(
                                gap_id = %gap.gap_id,
                                request_id = %request_id,
                                "Gap closure queued for remediation"
                            );
                        }
                    }
                }
            }
        })
    }

    fn spawn_dispatcher(&self) -> JoinHandle<()> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            dispatcher.run(cancel).await;
        })
    }

    // ============================================
    // Event Ingestion
    // ============================================

    /// Report a connection event for a stream.
    pub fn report_event(
        &self,
        stream_id: &str,
        event: StreamEvent,
        error_message: Option<&str>,
    ) -> Result<(), HealthTrackerError> {
        self.tracker.report_event(stream_id, event, error_message)
    }

    /// Record that a message arrived on a stream.
    pub fn report_message_received(&self, stream_id: &str) -> Result<(), HealthTrackerError> {
        self.tracker.report_message_received(stream_id)
    }

    /// Record the outcome of a call through a supervised component.
    pub fn record_result(
        &self,
        component_id: &str,
        success: bool,
        response_time_ms: f64,
    ) -> Result<ComponentStatus, FailoverError> {
        self.failover.record_result(component_id, success, response_time_ms)
    }

    /// Score one record and raise alerts if it falls below the floor.
    pub fn check_quality(&self, record: &Value, source: &str) -> QualityReport {
        self.scorer.check(record, source)
    }

    // ============================================
    // Remediation Control
    // ============================================

    /// Submit a remediation request directly, bypassing gap analysis.
    pub fn submit_remediation(&self, request: RemediationRequest) -> String {
        self.queue.submit(request)
    }

    /// Approve a pending remediation request.
    pub fn approve_remediation(
        &self,
        request_id: &str,
        approver: &str,
        max_cost_limit: Option<Decimal>,
    ) -> Result<(), RemediationError> {
        self.queue.approve(request_id, approver, max_cost_limit)
    }

    /// Reject a remediation request before it executes.
    pub fn reject_remediation(
        &self,
        request_id: &str,
        approver: &str,
        reason: &str,
    ) -> Result<(), RemediationError> {
        self.queue.reject(request_id, approver, reason)
    }

    // ============================================
    // Observation
    // ============================================

    /// Point-in-time snapshot of everything under supervision.
    #[must_use]
    pub fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            generated_at: Utc::now(),
            streams: self.tracker.all_stream_health(),
            components: self.failover.all_component_health(),
            open_gap_count: self.tracker.open_gap_count(),
            pending_remediation_count: self.queue.pending_count(),
            in_progress_remediation_count: self.queue.in_progress_count(),
        }
    }

    /// Health record for one stream.
    #[must_use]
    pub fn stream_health(&self, stream_id: &str) -> Option<StreamHealth> {
        self.tracker.stream_health(stream_id)
    }

    /// Copy of one remediation request.
    #[must_use]
    pub fn remediation_request(&self, request_id: &str) -> Option<RemediationRequest> {
        self.queue.request(request_id)
    }

    /// Subscribe to alerts published after this call.
    #[must_use]
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alerts.subscribe()
    }
}
