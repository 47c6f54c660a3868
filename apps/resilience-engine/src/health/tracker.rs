//! Per-stream liveness bookkeeping and the connection-gap lifecycle.
//!
//! The tracker owns every `StreamHealth` and open `ConnectionGap` record.
//! Other components see copies through snapshot accessors, or act on
//! `HealthNotice` values the tracker emits when a state change needs a
//! reaction elsewhere (reconnection, gap classification). Notices are sent
//! on an unbounded channel so ingest calls never block.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::alert::{Alert, AlertBus, AlertKind};
use crate::config::{HealthTrackerConfig, ReconnectConfig};
use crate::health::types::{
    ConnectionGap, HealthNotice, StreamEvent, StreamHealth, StreamSpec, StreamState,
};
use crate::observability;
use crate::reconnect::BackoffSchedule;

/// Errors from health tracker calls.
#[derive(Debug, Error)]
pub enum HealthTrackerError {
    /// The stream was never registered.
    #[error("unknown stream '{0}'")]
    UnknownStream(String),
    /// A stream with this id is already registered.
    #[error("stream '{0}' is already registered")]
    DuplicateStream(String),
}

/// Reconnect bookkeeping after a failed attempt.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectProgress {
    /// Failed attempts since the last success.
    pub attempt: u32,
    /// Delay to wait before the next attempt.
    pub backoff: Duration,
    /// The attempt limit was reached; the stream is now failed.
    pub exhausted: bool,
}

struct StreamEntry {
    spec: StreamSpec,
    health: StreamHealth,
}

#[derive(Default)]
struct TrackerState {
    streams: HashMap<String, StreamEntry>,
    /// Open gaps keyed by stream id. One entry per stream enforces the
    /// single-open-gap invariant structurally.
    open_gaps: HashMap<String, ConnectionGap>,
}

/// Tracks liveness for every registered stream.
pub struct ConnectionHealthTracker {
    config: HealthTrackerConfig,
    schedule: BackoffSchedule,
    default_max_attempts: u32,
    state: Mutex<TrackerState>,
    alerts: AlertBus,
    notice_tx: mpsc::UnboundedSender<HealthNotice>,
}

impl ConnectionHealthTracker {
    // ============================================
    // Construction & Registration
    // ============================================

    /// Create a tracker and the receiving end of its notice channel.
    #[must_use]
    pub fn new(
        config: HealthTrackerConfig,
        reconnect: &ReconnectConfig,
        alerts: AlertBus,
    ) -> (Self, mpsc::UnboundedReceiver<HealthNotice>) {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let tracker = Self {
            config,
            schedule: reconnect.to_schedule(),
            default_max_attempts: reconnect.max_attempts,
            state: Mutex::new(TrackerState::default()),
            alerts,
            notice_tx,
        };
        (tracker, notice_rx)
    }

    /// Register a stream for monitoring.
    ///
    /// Streams start out `Disconnected` with no gap; the first connect event
    /// brings them live. Registering the same id twice is an error.
    pub fn register_stream(&self, spec: StreamSpec) -> Result<(), HealthTrackerError> {
        let mut state = self.state.lock();
        if state.streams.contains_key(&spec.stream_id) {
            return Err(HealthTrackerError::DuplicateStream(spec.stream_id));
        }

        let health = StreamHealth {
            stream_id: spec.stream_id.clone(),
            state: StreamState::Disconnected,
            last_data_at: Utc::now(),
            reconnect_attempts: 0,
            backoff_seconds: self.schedule.floor().as_secs_f64(),
            max_reconnect_attempts: spec
                .max_reconnect_attempts
                .unwrap_or(self.default_max_attempts),
            last_error: None,
        };

        tracing::info!(
            stream_id = %spec.stream_id,
            data_kind = spec.data_kind.as_str(),
            symbol_count = spec.symbol_count,
            "Stream registered"
        );

        state
            .streams
            .insert(spec.stream_id.clone(), StreamEntry { spec, health });
        Ok(())
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
        self.report_event_at(stream_id, event, error_message, Utc::now())
    }

    /// Report a connection event with an explicit clock.
    pub fn report_event_at(
        &self,
        stream_id: &str,
        event: StreamEvent,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), HealthTrackerError> {
        let mut notices = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let entry = state
                .streams
                .get_mut(stream_id)
                .ok_or_else(|| HealthTrackerError::UnknownStream(stream_id.to_string()))?;

            if let Some(message) = error_message {
                entry.health.last_error = Some(message.to_string());
            }

            if event.is_outage() {
                begin_outage(entry, &mut state.open_gaps, event, now, &mut notices);
            } else {
                close_outage(entry, &mut state.open_gaps, now, &mut notices, &self.schedule);
            }
        }
        self.dispatch_notices(notices);
        Ok(())
    }

    /// Record that a message arrived on a stream.
    ///
    /// Message arrival is proof of liveness: it refreshes `last_data_at` and
    /// closes any open gap the same way an explicit reconnect event would.
    pub fn report_message_received(&self, stream_id: &str) -> Result<(), HealthTrackerError> {
        self.report_message_received_at(stream_id, Utc::now())
    }

    /// Record a message arrival with an explicit clock.
    pub fn report_message_received_at(
        &self,
        stream_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), HealthTrackerError> {
        let mut notices = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let entry = state
                .streams
                .get_mut(stream_id)
                .ok_or_else(|| HealthTrackerError::UnknownStream(stream_id.to_string()))?;

            if entry.health.is_connected() {
                entry.health.last_data_at = now;
            } else {
                close_outage(entry, &mut state.open_gaps, now, &mut notices, &self.schedule);
            }
        }
        self.dispatch_notices(notices);
        Ok(())
    }

    // ============================================
    // Liveness Sweep
    // ============================================

    /// Mark silent streams as disconnected.
    ///
    /// Returns the number of streams newly marked stale.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Run the liveness sweep with an explicit clock.
    ///
    /// A connected stream with no data inside the stale threshold is routed
    /// through the same outage path an explicit disconnect event takes. This
    /// catches silent failures where no disconnect event ever fires.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let threshold = self.config.stale_threshold();
        let mut notices = Vec::new();
        let mut alerts = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            for entry in state.streams.values_mut() {
                if !entry.health.is_connected() {
                    continue;
                }
                let silent_for = now - entry.health.last_data_at;
                if silent_for.to_std().unwrap_or(Duration::ZERO) <= threshold {
                    continue;
                }

                let silent_secs = silent_for.num_seconds();
                entry.health.last_error =
                    Some(format!("no data received for {silent_secs}s"));
                alerts.push(Alert::new(
                    AlertKind::StreamStale,
                    entry.spec.stream_id.clone(),
                    format!("no data received for {silent_secs}s, treating as disconnect"),
                ));
                begin_outage(
                    entry,
                    &mut state.open_gaps,
                    StreamEvent::Disconnected,
                    now,
                    &mut notices,
                );
            }
        }

        let stale_count = alerts.len();
        for alert in alerts {
            self.alerts.publish(alert);
        }
        self.dispatch_notices(notices);
        stale_count
    }

    // ============================================
    // Reconnect Bookkeeping
    // ============================================

    /// Move a disconnected stream into `Reconnecting`.
    ///
    /// Returns `Ok(false)` when the stream is in any other state, which tells
    /// the supervisor the stream recovered on its own or already failed.
    pub fn begin_reconnect(&self, stream_id: &str) -> Result<bool, HealthTrackerError> {
        let mut state = self.state.lock();
        let entry = state
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| HealthTrackerError::UnknownStream(stream_id.to_string()))?;

        if entry.health.state != StreamState::Disconnected {
            return Ok(false);
        }
        entry.health.state = StreamState::Reconnecting;
        Ok(true)
    }

    /// Current recorded backoff for a stream.
    pub fn current_backoff(&self, stream_id: &str) -> Result<Duration, HealthTrackerError> {
        let state = self.state.lock();
        let entry = state
            .streams
            .get(stream_id)
            .ok_or_else(|| HealthTrackerError::UnknownStream(stream_id.to_string()))?;
        Ok(Duration::from_secs_f64(
            entry.health.backoff_seconds.max(0.0),
        ))
    }

    /// Record a failed reconnect attempt.
    ///
    /// Increments the attempt counter and grows the recorded backoff. When
    /// the attempt limit is reached the stream transitions to `Failed` and a
    /// critical alert is published; automatic retries stop there.
    pub fn record_reconnect_failure(
        &self,
        stream_id: &str,
        error: &str,
    ) -> Result<ReconnectProgress, HealthTrackerError> {
        let mut escalation = None;
        let progress = {
            let mut state = self.state.lock();
            let entry = state
                .streams
                .get_mut(stream_id)
                .ok_or_else(|| HealthTrackerError::UnknownStream(stream_id.to_string()))?;

            if entry.health.state != StreamState::Reconnecting {
                // The stream recovered or failed while the attempt ran.
                return Ok(ReconnectProgress {
                    attempt: entry.health.reconnect_attempts,
                    backoff: Duration::from_secs_f64(entry.health.backoff_seconds.max(0.0)),
                    exhausted: entry.health.state.is_failed(),
                });
            }

            entry.health.reconnect_attempts += 1;
            entry.health.last_error = Some(error.to_string());
            let next = self
                .schedule
                .next(Duration::from_secs_f64(entry.health.backoff_seconds.max(0.0)));
            entry.health.backoff_seconds = next.as_secs_f64();

            let exhausted =
                entry.health.reconnect_attempts >= entry.health.max_reconnect_attempts;
            if exhausted {
                entry.health.state = StreamState::Failed;
                escalation = Some(Alert::new(
                    AlertKind::StreamFailed,
                    stream_id.to_string(),
                    format!(
                        "reconnect attempts exhausted after {} tries: {error}",
                        entry.health.reconnect_attempts
                    ),
                ));
            }

            ReconnectProgress {
                attempt: entry.health.reconnect_attempts,
                backoff: next,
                exhausted,
            }
        };

        observability::record_reconnect_failure();
        if let Some(alert) = escalation {
            self.alerts.publish(alert);
        }
        Ok(progress)
    }

    // ============================================
    // Snapshots
    // ============================================

    /// Copy of one stream's health record.
    #[must_use]
    pub fn stream_health(&self, stream_id: &str) -> Option<StreamHealth> {
        let state = self.state.lock();
        state.streams.get(stream_id).map(|e| e.health.clone())
    }

    /// Copies of every stream's health record, sorted by stream id.
    #[must_use]
    pub fn all_stream_health(&self) -> Vec<StreamHealth> {
        let state = self.state.lock();
        let mut streams: Vec<StreamHealth> =
            state.streams.values().map(|e| e.health.clone()).collect();
        streams.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        streams
    }

    /// Returns true if the stream is currently live. Unknown streams are not.
    #[must_use]
    pub fn is_connected(&self, stream_id: &str) -> bool {
        let state = self.state.lock();
        state
            .streams
            .get(stream_id)
            .is_some_and(|e| e.health.is_connected())
    }

    /// Number of streams currently live.
    #[must_use]
    pub fn connected_stream_count(&self) -> usize {
        let state = self.state.lock();
        state
            .streams
            .values()
            .filter(|e| e.health.is_connected())
            .count()
    }

    /// Number of gaps currently open.
    #[must_use]
    pub fn open_gap_count(&self) -> usize {
        self.state.lock().open_gaps.len()
    }

    /// Copy of the open gap for a stream, if any.
    #[must_use]
    pub fn open_gap(&self, stream_id: &str) -> Option<ConnectionGap> {
        self.state.lock().open_gaps.get(stream_id).cloned()
    }

    fn dispatch_notices(&self, notices: Vec<HealthNotice>) {
        // Send fails only after the router shut down; nothing left to do then.
        for notice in notices {
            let _ = self.notice_tx.send(notice);
        }
    }
}

/// Transition a live stream into an outage and open its gap.
fn begin_outage(
    entry: &mut StreamEntry,
    open_gaps: &mut HashMap<String, ConnectionGap>,
    event: StreamEvent,
    now: DateTime<Utc>,
    notices: &mut Vec<HealthNotice>,
) {
    if !entry.health.state.is_connected() {
        tracing::debug!(
            stream_id = %entry.spec.stream_id,
            state = %entry.health.state,
            event = %event,
            "Outage event ignored, stream already down"
        );
        return;
    }

    entry.health.state = StreamState::Disconnected;
    let gap = ConnectionGap::open(&entry.spec, now);
    tracing::warn!(
        stream_id = %entry.spec.stream_id,
        gap_id = %gap.gap_id,
        event = %event,
        "Stream outage began"
    );
    observability::record_gap_opened(entry.spec.data_kind);

    open_gaps.insert(entry.spec.stream_id.clone(), gap);
    observability::set_open_gap_count(open_gaps.len());
    notices.push(HealthNotice::StreamDisconnected {
        stream_id: entry.spec.stream_id.clone(),
    });
}

/// Bring a stream back to `Connected`, closing any open gap and resetting
/// reconnect bookkeeping to its floor.
fn close_outage(
    entry: &mut StreamEntry,
    open_gaps: &mut HashMap<String, ConnectionGap>,
    now: DateTime<Utc>,
    notices: &mut Vec<HealthNotice>,
    schedule: &BackoffSchedule,
) {
    if let Some(mut gap) = open_gaps.remove(&entry.spec.stream_id) {
        gap.close(now);
        let duration = gap.duration_seconds.unwrap_or(0.0);
        tracing::info!(
            stream_id = %entry.spec.stream_id,
            gap_id = %gap.gap_id,
            duration_seconds = duration,
            "Stream outage ended"
        );
        observability::record_gap_closed(gap.data_kind, duration);
        observability::set_open_gap_count(open_gaps.len());
        notices.push(HealthNotice::GapClosed {
            gap,
            symbol_count: entry.spec.symbol_count,
        });
    }

    entry.health.state = StreamState::Connected;
    entry.health.last_data_at = now;
    entry.health.reconnect_attempts = 0;
    entry.health.backoff_seconds = schedule.floor().as_secs_f64();
}
