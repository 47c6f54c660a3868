//! End-to-End Outage Flow Tests
//!
//! Drives a full outage through the public API: stream drop, gap capture,
//! classification, queueing, and paid completion. The first tests use
//! explicit clocks so the timeline is exact; the last one runs the
//! coordinator's real background loops.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use tokio::time::Instant;

use resilience_engine::alert::AlertBus;
use resilience_engine::coordinator::ResilienceCoordinator;
use resilience_engine::gap::{GapAnalyzer, GapDecision};
use resilience_engine::health::{
    ConnectionHealthTracker, DataKind, HealthNotice, RemediationPriority, StreamEvent, StreamSpec,
    StreamState,
};
use resilience_engine::reconnect::{ReconnectError, ReconnectHandler};
use resilience_engine::remediation::{
    BackfillError, BackfillExecutorPort, BackfillOutcome, BudgetLedgerPort, BudgetPeriod,
    InMemoryBudgetLedger, RemediationQueue, RemediationRequest, RemediationStatus,
};
use resilience_engine::{Config, load_config_from_string};

// =============================================================================
// Helpers
// =============================================================================

fn bars_spec(stream_id: &str) -> StreamSpec {
    StreamSpec {
        stream_id: stream_id.to_string(),
        data_kind: DataKind::Bars,
        affects_real_time: false,
        affects_baseline: true,
        symbol_count: 50,
        max_reconnect_attempts: None,
    }
}

async fn wait_until(description: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {description}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =============================================================================
// Explicit-clock pipeline
// =============================================================================

#[tokio::test]
async fn outage_flows_from_gap_to_completed_backfill() {
    let config = Config::default();
    let alerts = AlertBus::new();
    let (tracker, mut notices) =
        ConnectionHealthTracker::new(config.health.clone(), &config.reconnect, alerts);
    tracker.register_stream(bars_spec("alpaca:bars:sip")).unwrap();

    // Ten quiet minutes, then a 45 second drop healed by a message.
    let t0 = Utc::now();
    tracker
        .report_event_at("alpaca:bars:sip", StreamEvent::Connected, None, t0)
        .unwrap();
    let drop_at = t0 + TimeDelta::minutes(10);
    tracker
        .report_event_at(
            "alpaca:bars:sip",
            StreamEvent::Disconnected,
            Some("ws reset"),
            drop_at,
        )
        .unwrap();
    let recover_at = drop_at + TimeDelta::seconds(45);
    tracker
        .report_message_received_at("alpaca:bars:sip", recover_at)
        .unwrap();

    let disconnect = notices.try_recv().unwrap();
    assert!(matches!(disconnect, HealthNotice::StreamDisconnected { .. }));
    let HealthNotice::GapClosed { gap, symbol_count } = notices.try_recv().unwrap() else {
        panic!("expected a gap closure notice");
    };
    assert_eq!(gap.duration_seconds, Some(45.0));
    assert_eq!(gap.start_time, drop_at);
    assert_eq!(symbol_count, 50);

    // Baseline-only stream, short outage: medium priority, cheap enough to
    // skip manual approval.
    let analyzer = GapAnalyzer::new(config.gaps.clone(), None);
    let GapDecision::Remediate(request) = analyzer.analyze_at(&gap, symbol_count, recover_at).await
    else {
        panic!("expected a remediation candidate");
    };
    assert_eq!(request.priority, RemediationPriority::Medium);
    assert!(request.estimated_cost < dec!(5));
    assert!(!request.requires_approval);
    assert_eq!(request.window_start, drop_at);
    assert_eq!(request.window_end, recover_at);

    let queue = RemediationQueue::new(&config.remediation);
    let request_id = queue.submit(*request);
    assert_eq!(queue.auto_approve_sweep_at(recover_at), 1);
    assert_eq!(
        queue.peek_dispatchable_at(recover_at).unwrap().request_id,
        request_id
    );

    queue.begin_execution(&request_id, recover_at).unwrap();
    let done = queue
        .complete(
            &request_id,
            dec!(0.42),
            9_000,
            recover_at + TimeDelta::minutes(2),
        )
        .unwrap();
    assert_eq!(done.status, RemediationStatus::Completed);
    assert_eq!(done.actual_cost, Some(dec!(0.42)));

    // The stream itself recovered the moment the message arrived.
    let health = tracker.stream_health("alpaca:bars:sip").unwrap();
    assert_eq!(health.state, StreamState::Connected);
    assert_eq!(tracker.open_gap_count(), 0);
}

#[tokio::test]
async fn silence_past_the_stale_threshold_opens_a_gap_at_sweep_time() {
    let config = Config::default();
    let alerts = AlertBus::new();
    let (tracker, mut notices) =
        ConnectionHealthTracker::new(config.health.clone(), &config.reconnect, alerts);
    tracker.register_stream(bars_spec("feedA")).unwrap();

    let t0 = Utc::now();
    tracker
        .report_event_at("feedA", StreamEvent::Connected, None, t0)
        .unwrap();

    // Inside the threshold nothing happens; one second past it the sweep
    // routes the stream through the outage path.
    assert_eq!(tracker.sweep_at(t0 + TimeDelta::seconds(299)), 0);
    assert_eq!(tracker.sweep_at(t0 + TimeDelta::seconds(301)), 1);

    let health = tracker.stream_health("feedA").unwrap();
    assert_eq!(health.state, StreamState::Disconnected);

    // The gap starts when the silence was detected, not when data stopped.
    let gap = tracker.open_gap("feedA").unwrap();
    assert_eq!(gap.start_time, t0 + TimeDelta::seconds(301));
    assert!(matches!(
        notices.try_recv().unwrap(),
        HealthNotice::StreamDisconnected { .. }
    ));

    // A second sweep on the now-disconnected stream is a no-op.
    assert_eq!(tracker.sweep_at(t0 + TimeDelta::seconds(400)), 0);
    assert_eq!(tracker.open_gap_count(), 1);
}

#[tokio::test]
async fn config_loaded_stream_registry_feeds_the_tracker() {
    let yaml = r"
health:
  stale_threshold_secs: 120
streams:
  - stream_id: alpaca:trades:sip
    data_kind: TRADES
    affects_real_time: true
    affects_baseline: false
    symbol_count: 500
";
    let config = load_config_from_string(yaml).unwrap();
    let alerts = AlertBus::new();
    let (tracker, _notices) =
        ConnectionHealthTracker::new(config.health.clone(), &config.reconnect, alerts);

    for spec in config.streams.clone() {
        tracker.register_stream(spec).unwrap();
    }

    let health = tracker.stream_health("alpaca:trades:sip").unwrap();
    assert_eq!(health.state, StreamState::Disconnected);
    assert_eq!(tracker.connected_stream_count(), 0);
}

// =============================================================================
// Live coordinator pipeline
// =============================================================================

struct InstantReconnect;

#[async_trait]
impl ReconnectHandler for InstantReconnect {
    async fn attempt(&self, _stream_id: &str) -> Result<(), ReconnectError> {
        Ok(())
    }
}

struct RecordingExecutor {
    executed: Mutex<Vec<String>>,
}

#[async_trait]
impl BackfillExecutorPort for RecordingExecutor {
    async fn execute(
        &self,
        request: &RemediationRequest,
    ) -> Result<BackfillOutcome, BackfillError> {
        self.executed.lock().push(request.request_id.clone());
        Ok(BackfillOutcome {
            actual_cost: dec!(0.25),
            records_retrieved: 1_000,
        })
    }
}

#[tokio::test]
async fn coordinator_completes_an_outage_remediation_end_to_end() {
    let mut config = Config::default();
    config.reconnect.backoff_floor_secs = 0.01;
    config.reconnect.backoff_ceiling_secs = 0.05;
    config.reconnect.jitter_factor = 0.0;
    config.gaps.min_gap_duration_secs = 0.0;
    config.remediation.sweep_interval_secs = 1;

    let ledger = Arc::new(InMemoryBudgetLedger::new());
    let executor = Arc::new(RecordingExecutor {
        executed: Mutex::new(Vec::new()),
    });
    let coordinator = Arc::new(ResilienceCoordinator::new(
        &config,
        None,
        Arc::clone(&ledger) as Arc<dyn BudgetLedgerPort>,
        Arc::clone(&executor) as Arc<dyn BackfillExecutorPort>,
    ));

    let spec = StreamSpec {
        stream_id: "alpaca:trades:sip".to_string(),
        data_kind: DataKind::Trades,
        affects_real_time: true,
        affects_baseline: false,
        symbol_count: 100,
        max_reconnect_attempts: None,
    };
    coordinator.register_stream(spec).unwrap();
    coordinator.register_reconnect_handler("alpaca:trades:sip", Arc::new(InstantReconnect));
    coordinator.start();

    coordinator
        .report_event("alpaca:trades:sip", StreamEvent::Connected, None)
        .unwrap();
    coordinator
        .report_event(
            "alpaca:trades:sip",
            StreamEvent::Disconnected,
            Some("socket closed"),
        )
        .unwrap();

    wait_until("the backfill to execute", || {
        executor.executed.lock().len() == 1
    })
    .await;
    wait_until("the request to reach a terminal state", || {
        let snapshot = coordinator.health_snapshot();
        snapshot.pending_remediation_count == 0 && snapshot.in_progress_remediation_count == 0
    })
    .await;
    wait_until("the spend to land in the ledger", || {
        ledger.spend_in_period_at(BudgetPeriod::Daily, Utc::now()) == dec!(0.25)
    })
    .await;

    let snapshot = coordinator.health_snapshot();
    assert_eq!(snapshot.open_gap_count, 0);
    assert_eq!(snapshot.connected_stream_count(), 1);

    coordinator.stop().await;
}
