//! Domain types for stream liveness and connection gaps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of a monitored stream.
///
/// Lifecycle: `Connected -> Disconnected -> Reconnecting -> {Connected | Failed}`.
/// `Failed` means automatic reconnection gave up; only an external connect
/// event or message arrival revives the stream from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    /// Stream is live and delivering data.
    Connected,
    /// Stream dropped; reconnection has not started yet.
    Disconnected,
    /// Reconnection attempts are in progress.
    Reconnecting,
    /// Reconnect attempts exhausted; manual intervention required.
    Failed,
}

impl StreamState {
    /// Returns true if the stream is live.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true if automatic recovery is still possible.
    #[must_use]
    pub const fn is_recovering(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Reconnecting)
    }

    /// Returns true if automatic reconnection gave up.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Validates a state transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connected, Self::Disconnected)
                | (Self::Disconnected, Self::Reconnecting | Self::Connected)
                | (Self::Reconnecting, Self::Connected | Self::Failed)
                | (Self::Failed, Self::Connected)
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "CONNECTED"),
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Reconnecting => write!(f, "RECONNECTING"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Connection event reported by a stream adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamEvent {
    /// Initial connection established.
    Connected,
    /// Connection dropped.
    Disconnected,
    /// Connection-level error; treated as a drop.
    Error,
    /// Connection re-established after a drop.
    Reconnected,
}

impl StreamEvent {
    /// Returns true if this event means the stream is live.
    #[must_use]
    pub const fn is_recovery(&self) -> bool {
        matches!(self, Self::Connected | Self::Reconnected)
    }

    /// Returns true if this event means the stream dropped.
    #[must_use]
    pub const fn is_outage(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "CONNECTED"),
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Error => write!(f, "ERROR"),
            Self::Reconnected => write!(f, "RECONNECTED"),
        }
    }
}

/// Category of records a stream delivers.
///
/// Drives the per-kind volume and size assumptions used when pricing a
/// backfill, so the variants double as config map keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataKind {
    /// Individual trade prints.
    Trades,
    /// Top-of-book quote updates.
    Quotes,
    /// Aggregated OHLCV bars.
    Bars,
}

impl DataKind {
    /// Snake-case label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trades => "trades",
            Self::Quotes => "quotes",
            Self::Bars => "bars",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Urgency tier of a gap and the remediation it produces.
///
/// Variant order matters: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemediationPriority {
    /// Neither real-time nor baseline consumers depend on the window.
    Low,
    /// The window feeds baseline datasets.
    Medium,
    /// The window feeds real-time consumers.
    High,
    /// Outage long enough to threaten downstream correctness.
    Critical,
}

impl RemediationPriority {
    /// Base weight for dispatch scoring. Each tier dominates the one below.
    #[must_use]
    pub const fn base_weight(self) -> f64 {
        match self {
            Self::Critical => 1000.0,
            Self::High => 100.0,
            Self::Medium => 10.0,
            Self::Low => 1.0,
        }
    }

    /// Returns true if approval is waived regardless of estimated cost.
    #[must_use]
    pub const fn is_urgent(self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }

    /// Snake-case label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for RemediationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Registration record describing a monitored stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSpec {
    /// Unique stream identifier (e.g. "alpaca:trades:sip").
    pub stream_id: String,
    /// Category of records the stream delivers.
    pub data_kind: DataKind,
    /// Real-time consumers read this stream directly.
    pub affects_real_time: bool,
    /// Baseline datasets are built from this stream.
    pub affects_baseline: bool,
    /// Symbols subscribed on the stream; scales backfill volume.
    pub symbol_count: u32,
    /// Per-stream override of the reconnect attempt limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,
}

/// Live health record for one stream. Owned by the health tracker;
/// callers only ever see copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamHealth {
    /// Stream this record describes.
    pub stream_id: String,
    /// Current connection state.
    pub state: StreamState,
    /// Last time a message arrived (or liveness was otherwise proven).
    pub last_data_at: DateTime<Utc>,
    /// Consecutive failed reconnect attempts since the last success.
    pub reconnect_attempts: u32,
    /// Current reconnect delay. Grows exponentially, resets on success.
    pub backoff_seconds: f64,
    /// Attempt limit before the stream is marked failed.
    pub max_reconnect_attempts: u32,
    /// Message from the most recent error event, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl StreamHealth {
    /// Returns true if the stream is live.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}

/// One contiguous outage window for one stream.
///
/// Opened when a live stream drops, closed when the stream proves liveness
/// again. `duration_seconds` is populated only at closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionGap {
    /// Unique gap identifier.
    pub gap_id: String,
    /// Stream the outage occurred on.
    pub stream_id: String,
    /// When the outage began.
    pub start_time: DateTime<Utc>,
    /// When the outage ended. `None` while the gap is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Outage length in seconds. Defined iff the gap is closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Category of records lost during the outage.
    pub data_kind: DataKind,
    /// Real-time consumers were affected.
    pub affects_real_time: bool,
    /// Baseline datasets were affected.
    pub affects_baseline: bool,
    /// Urgency assigned at classification. `Low` until classified.
    pub priority: RemediationPriority,
    /// Whether the outage has ended.
    pub is_closed: bool,
}

impl ConnectionGap {
    /// Open a new gap for `spec` starting at `start_time`.
    #[must_use]
    pub fn open(spec: &StreamSpec, start_time: DateTime<Utc>) -> Self {
        Self {
            gap_id: uuid::Uuid::new_v4().to_string(),
            stream_id: spec.stream_id.clone(),
            start_time,
            end_time: None,
            duration_seconds: None,
            data_kind: spec.data_kind,
            affects_real_time: spec.affects_real_time,
            affects_baseline: spec.affects_baseline,
            priority: RemediationPriority::Low,
            is_closed: false,
        }
    }

    /// Close the gap at `end_time` and compute its duration.
    ///
    /// A closed gap stays closed; calling this again is a no-op. Clock
    /// regressions clamp the duration at zero so `end_time >= start_time`
    /// holds in the record.
    pub fn close(&mut self, end_time: DateTime<Utc>) {
        if self.is_closed {
            return;
        }
        let end_time = end_time.max(self.start_time);
        let elapsed = (end_time - self.start_time).num_milliseconds() as f64 / 1000.0;
        self.end_time = Some(end_time);
        self.duration_seconds = Some(elapsed);
        self.is_closed = true;
    }

    /// Returns true once the outage has ended.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.is_closed
    }
}

/// Internal notification emitted by the health tracker when stream state
/// changes require another component to act.
#[derive(Debug, Clone)]
pub enum HealthNotice {
    /// A live stream dropped; the reconnection supervisor should take over.
    StreamDisconnected {
        /// Stream that dropped.
        stream_id: String,
    },
    /// An outage ended; the gap analyzer should classify it.
    GapClosed {
        /// The closed gap record.
        gap: ConnectionGap,
        /// Symbols subscribed on the stream, for volume estimation.
        symbol_count: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn spec(stream_id: &str) -> StreamSpec {
        StreamSpec {
            stream_id: stream_id.to_string(),
            data_kind: DataKind::Trades,
            affects_real_time: false,
            affects_baseline: true,
            symbol_count: 50,
            max_reconnect_attempts: None,
        }
    }

    #[test]
    fn stream_state_is_connected() {
        assert!(StreamState::Connected.is_connected());
        assert!(!StreamState::Disconnected.is_connected());
        assert!(!StreamState::Reconnecting.is_connected());
        assert!(!StreamState::Failed.is_connected());
    }

    #[test]
    fn stream_state_is_recovering() {
        assert!(!StreamState::Connected.is_recovering());
        assert!(StreamState::Disconnected.is_recovering());
        assert!(StreamState::Reconnecting.is_recovering());
        assert!(!StreamState::Failed.is_recovering());
    }

    #[test]
    fn stream_state_transitions() {
        assert!(StreamState::Connected.can_transition_to(StreamState::Disconnected));
        assert!(StreamState::Disconnected.can_transition_to(StreamState::Reconnecting));
        assert!(StreamState::Disconnected.can_transition_to(StreamState::Connected));
        assert!(StreamState::Reconnecting.can_transition_to(StreamState::Connected));
        assert!(StreamState::Reconnecting.can_transition_to(StreamState::Failed));
        assert!(StreamState::Failed.can_transition_to(StreamState::Connected));

        assert!(!StreamState::Connected.can_transition_to(StreamState::Reconnecting));
        assert!(!StreamState::Connected.can_transition_to(StreamState::Failed));
        assert!(!StreamState::Disconnected.can_transition_to(StreamState::Failed));
        assert!(!StreamState::Failed.can_transition_to(StreamState::Reconnecting));
    }

    #[test]
    fn stream_state_display() {
        assert_eq!(format!("{}", StreamState::Connected), "CONNECTED");
        assert_eq!(format!("{}", StreamState::Reconnecting), "RECONNECTING");
        assert_eq!(format!("{}", StreamState::Failed), "FAILED");
    }

    #[test]
    fn stream_event_classification() {
        assert!(StreamEvent::Connected.is_recovery());
        assert!(StreamEvent::Reconnected.is_recovery());
        assert!(!StreamEvent::Disconnected.is_recovery());

        assert!(StreamEvent::Disconnected.is_outage());
        assert!(StreamEvent::Error.is_outage());
        assert!(!StreamEvent::Connected.is_outage());
    }

    #[test]
    fn priority_ordering() {
        assert!(RemediationPriority::Critical > RemediationPriority::High);
        assert!(RemediationPriority::High > RemediationPriority::Medium);
        assert!(RemediationPriority::Medium > RemediationPriority::Low);
    }

    #[test]
    fn priority_base_weights_dominate_by_tier() {
        assert!(
            RemediationPriority::Critical.base_weight()
                > RemediationPriority::High.base_weight() * 2.0
        );
        assert!(
            RemediationPriority::High.base_weight()
                > RemediationPriority::Medium.base_weight() * 2.0
        );
    }

    #[test]
    fn priority_urgency() {
        assert!(RemediationPriority::Critical.is_urgent());
        assert!(RemediationPriority::High.is_urgent());
        assert!(!RemediationPriority::Medium.is_urgent());
        assert!(!RemediationPriority::Low.is_urgent());
    }

    #[test]
    fn priority_serde_round_trip() {
        let json = serde_json::to_string(&RemediationPriority::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
        let parsed: RemediationPriority = serde_json::from_str("\"MEDIUM\"").unwrap();
        assert_eq!(parsed, RemediationPriority::Medium);
    }

    #[test]
    fn gap_open_captures_stream_facts() {
        let now = Utc::now();
        let gap = ConnectionGap::open(&spec("feedA"), now);

        assert_eq!(gap.stream_id, "feedA");
        assert_eq!(gap.data_kind, DataKind::Trades);
        assert!(gap.affects_baseline);
        assert!(!gap.is_closed());
        assert!(gap.end_time.is_none());
        assert!(gap.duration_seconds.is_none());
    }

    #[test]
    fn gap_close_computes_duration() {
        let start = Utc::now();
        let mut gap = ConnectionGap::open(&spec("feedA"), start);
        gap.close(start + TimeDelta::seconds(45));

        assert!(gap.is_closed());
        assert_eq!(gap.duration_seconds, Some(45.0));
        assert_eq!(gap.end_time, Some(start + TimeDelta::seconds(45)));
    }

    #[test]
    fn gap_close_is_idempotent() {
        let start = Utc::now();
        let mut gap = ConnectionGap::open(&spec("feedA"), start);
        gap.close(start + TimeDelta::seconds(10));
        gap.close(start + TimeDelta::seconds(99));

        assert_eq!(gap.duration_seconds, Some(10.0));
    }

    #[test]
    fn gap_close_clamps_clock_regression() {
        let start = Utc::now();
        let mut gap = ConnectionGap::open(&spec("feedA"), start);
        gap.close(start - TimeDelta::seconds(5));

        assert_eq!(gap.duration_seconds, Some(0.0));
        assert_eq!(gap.end_time, Some(start));
    }

    #[test]
    fn gap_ids_are_unique() {
        let now = Utc::now();
        let a = ConnectionGap::open(&spec("feedA"), now);
        let b = ConnectionGap::open(&spec("feedA"), now);
        assert_ne!(a.gap_id, b.gap_id);
    }
}
