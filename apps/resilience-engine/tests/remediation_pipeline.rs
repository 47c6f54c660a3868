//! Remediation Dispatch Loop Tests
//!
//! Runs the dispatcher's real sweep loop against stub executors to pin down
//! the concurrency bound, the dispatch ordering, and the way a budget denial
//! parks the queue.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use resilience_engine::alert::{AlertBus, AlertKind};
use resilience_engine::config::RemediationConfig;
use resilience_engine::health::{ConnectionGap, DataKind, RemediationPriority, StreamSpec};
use resilience_engine::remediation::{
    BackfillError, BackfillExecutorPort, BackfillOutcome, BudgetLedgerPort, BudgetPeriod,
    InMemoryBudgetLedger, RemediationDispatcher, RemediationQueue, RemediationRequest,
    RemediationStatus,
};

// =============================================================================
// Helpers
// =============================================================================

fn aged_request(
    stream_id: &str,
    priority: RemediationPriority,
    cost: Decimal,
    age: TimeDelta,
) -> RemediationRequest {
    let spec = StreamSpec {
        stream_id: stream_id.to_string(),
        data_kind: DataKind::Trades,
        affects_real_time: true,
        affects_baseline: false,
        symbol_count: 10,
        max_reconnect_attempts: None,
    };
    let start = Utc::now() - age;
    let mut gap = ConnectionGap::open(&spec, start);
    gap.close(start + TimeDelta::seconds(60));
    RemediationRequest::new(&gap, priority, cost, dec!(50), false, Utc::now())
}

fn pipeline(
    config: &RemediationConfig,
    executor: Arc<dyn BackfillExecutorPort>,
    ledger: Arc<InMemoryBudgetLedger>,
) -> (Arc<RemediationDispatcher>, Arc<RemediationQueue>, AlertBus) {
    let queue = Arc::new(RemediationQueue::new(config));
    let alerts = AlertBus::new();
    let dispatcher = Arc::new(RemediationDispatcher::new(
        config.clone(),
        Arc::clone(&queue),
        ledger,
        executor,
        alerts.clone(),
    ));
    (dispatcher, queue, alerts)
}

fn spawn_run(
    dispatcher: &Arc<RemediationDispatcher>,
    cancel: &CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let dispatcher = Arc::clone(dispatcher);
    let cancel = cancel.clone();
    tokio::spawn(async move { dispatcher.run(cancel).await })
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
// Concurrency bound
// =============================================================================

/// Holds every backfill for a beat while counting how many run at once.
struct BlockingExecutor {
    current: AtomicUsize,
    max_seen: AtomicUsize,
}

#[async_trait]
impl BackfillExecutorPort for BlockingExecutor {
    async fn execute(
        &self,
        request: &RemediationRequest,
    ) -> Result<BackfillOutcome, BackfillError> {
        let live = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(live, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(250)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(BackfillOutcome {
            actual_cost: request.estimated_cost,
            records_retrieved: 500,
        })
    }
}

#[tokio::test]
async fn parallel_dispatch_respects_the_concurrency_bound() {
    let config = RemediationConfig {
        sweep_interval_secs: 1,
        ..RemediationConfig::default()
    };

    let ledger = Arc::new(InMemoryBudgetLedger::new());
    let executor = Arc::new(BlockingExecutor {
        current: AtomicUsize::new(0),
        max_seen: AtomicUsize::new(0),
    });
    let (dispatcher, queue, _alerts) = pipeline(
        &config,
        Arc::clone(&executor) as Arc<dyn BackfillExecutorPort>,
        Arc::clone(&ledger),
    );

    for i in 0..30 {
        queue.submit(aged_request(
            &format!("feed-{i}"),
            RemediationPriority::High,
            dec!(0.05),
            TimeDelta::minutes(10),
        ));
    }

    let cancel = CancellationToken::new();
    let run_task = spawn_run(&dispatcher, &cancel);

    wait_until("three full waves of backfills to complete", || {
        queue
            .counts_by_status()
            .get(&RemediationStatus::Completed)
            .copied()
            .unwrap_or(0)
            >= 9
    })
    .await;

    cancel.cancel();
    run_task.await.unwrap();

    // Thirty queued against three permits, never more than three live.
    assert_eq!(executor.max_seen.load(Ordering::SeqCst), 3);

    let completed = queue
        .counts_by_status()
        .get(&RemediationStatus::Completed)
        .copied()
        .unwrap_or(0) as u64;
    assert!(completed >= 9);
    assert_eq!(
        ledger.current_spend(BudgetPeriod::Daily).await.unwrap(),
        Decimal::from(completed) * dec!(0.05)
    );
}

// =============================================================================
// Dispatch ordering
// =============================================================================

struct RecordingExecutor {
    executed: Mutex<Vec<String>>,
}

#[async_trait]
impl BackfillExecutorPort for RecordingExecutor {
    async fn execute(
        &self,
        request: &RemediationRequest,
    ) -> Result<BackfillOutcome, BackfillError> {
        self.executed.lock().push(request.stream_id.clone());
        Ok(BackfillOutcome {
            actual_cost: Decimal::ZERO,
            records_retrieved: 100,
        })
    }
}

#[tokio::test]
async fn dispatch_order_follows_priority_then_cost() {
    let config = RemediationConfig {
        sweep_interval_secs: 1,
        max_concurrent: 1,
        ..RemediationConfig::default()
    };

    let ledger = Arc::new(InMemoryBudgetLedger::new());
    let executor = Arc::new(RecordingExecutor {
        executed: Mutex::new(Vec::new()),
    });
    let (dispatcher, queue, _alerts) = pipeline(
        &config,
        Arc::clone(&executor) as Arc<dyn BackfillExecutorPort>,
        ledger,
    );

    // Submitted cheapest-first so score, not insertion order, decides.
    queue.submit(aged_request(
        "low-feed",
        RemediationPriority::Low,
        dec!(0.10),
        TimeDelta::hours(2),
    ));
    queue.submit(aged_request(
        "medium-feed",
        RemediationPriority::Medium,
        dec!(0.50),
        TimeDelta::hours(1),
    ));
    queue.submit(aged_request(
        "critical-feed",
        RemediationPriority::Critical,
        dec!(2),
        TimeDelta::minutes(30),
    ));

    let cancel = CancellationToken::new();
    let run_task = spawn_run(&dispatcher, &cancel);

    wait_until("all three backfills to execute", || {
        executor.executed.lock().len() == 3
    })
    .await;

    cancel.cancel();
    run_task.await.unwrap();

    assert_eq!(
        *executor.executed.lock(),
        vec![
            "critical-feed".to_string(),
            "medium-feed".to_string(),
            "low-feed".to_string(),
        ]
    );
}

// =============================================================================
// Budget denial
// =============================================================================

#[tokio::test]
async fn budget_denial_parks_the_whole_queue() {
    let config = RemediationConfig {
        sweep_interval_secs: 1,
        ..RemediationConfig::default()
    };

    // $1 of daily headroom left.
    let ledger = Arc::new(InMemoryBudgetLedger::new());
    ledger
        .record_spend(dec!(149), "backfill:trades")
        .await
        .unwrap();

    let executor = Arc::new(RecordingExecutor {
        executed: Mutex::new(Vec::new()),
    });
    let (dispatcher, queue, alerts) = pipeline(
        &config,
        Arc::clone(&executor) as Arc<dyn BackfillExecutorPort>,
        Arc::clone(&ledger),
    );
    let mut alert_rx = alerts.subscribe();

    // The critical is the top candidate and does not fit; the medium would
    // fit but must not jump past it.
    let critical_id = queue.submit(aged_request(
        "critical-feed",
        RemediationPriority::Critical,
        dec!(5),
        TimeDelta::minutes(30),
    ));
    let medium_id = queue.submit(aged_request(
        "medium-feed",
        RemediationPriority::Medium,
        dec!(0.50),
        TimeDelta::hours(1),
    ));

    let cancel = CancellationToken::new();
    let run_task = spawn_run(&dispatcher, &cancel);

    let alert = tokio::time::timeout(Duration::from_secs(5), alert_rx.recv())
        .await
        .expect("deferral alert within the first sweeps")
        .unwrap();
    assert_eq!(alert.kind, AlertKind::BudgetDeferred);
    assert!(alert.message.contains(&critical_id));

    cancel.cancel();
    run_task.await.unwrap();

    assert_eq!(
        queue.request(&critical_id).unwrap().status,
        RemediationStatus::Approved
    );
    assert_eq!(
        queue.request(&medium_id).unwrap().status,
        RemediationStatus::Approved
    );
    assert_eq!(queue.in_progress_count(), 0);
    assert!(executor.executed.lock().is_empty());
}
