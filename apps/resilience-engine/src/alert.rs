//! Operational alerts raised by the resilience core.
//!
//! Failures fall into three operator-visible classes: transient faults are
//! retried and logged without alerting, degraded conditions raise a `Warning`,
//! and escalations (retries exhausted, component offline) raise a `Critical`
//! alert for the ops channel. Nothing in this core is fatal to the process.
//!
//! Alerts fan out on a broadcast bus; publishing never fails and never blocks,
//! even with no subscribers. Rate limiting is the consumer's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Buffered alerts per subscriber before lagging.
const ALERT_BUS_CAPACITY: usize = 256;

/// Severity of an operational alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    /// Recovery or other state change worth surfacing.
    Info,
    /// Degraded but still functional.
    Warning,
    /// Escalation requiring manual intervention.
    Critical,
}

impl AlertSeverity {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The condition an alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    /// A stream stopped delivering data without a disconnect event.
    StreamStale,
    /// Reconnect attempts exhausted; the stream needs manual intervention.
    StreamFailed,
    /// A backfill run ended in failure.
    RemediationFailed,
    /// A remediation was deferred because a spend limit would be exceeded.
    BudgetDeferred,
    /// A component tripped and is running on its fallback.
    ComponentDegraded,
    /// A component tripped and its fallback could not be activated.
    ComponentOffline,
    /// A component returned to healthy operation.
    ComponentRecovered,
    /// A record scored below the acceptable quality threshold.
    LowQualityRecord,
}

impl AlertKind {
    /// Default severity for this condition.
    #[must_use]
    pub const fn severity(self) -> AlertSeverity {
        match self {
            Self::StreamFailed | Self::RemediationFailed | Self::ComponentOffline => {
                AlertSeverity::Critical
            }
            Self::StreamStale
            | Self::BudgetDeferred
            | Self::ComponentDegraded
            | Self::LowQualityRecord => AlertSeverity::Warning,
            Self::ComponentRecovered => AlertSeverity::Info,
        }
    }

    /// Snake-case label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StreamStale => "stream_stale",
            Self::StreamFailed => "stream_failed",
            Self::RemediationFailed => "remediation_failed",
            Self::BudgetDeferred => "budget_deferred",
            Self::ComponentDegraded => "component_degraded",
            Self::ComponentOffline => "component_offline",
            Self::ComponentRecovered => "component_recovered",
            Self::LowQualityRecord => "low_quality_record",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single operational alert.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    /// What happened.
    pub kind: AlertKind,
    /// How urgent it is.
    pub severity: AlertSeverity,
    /// Stream or component the alert concerns.
    pub subject: String,
    /// Human-readable detail.
    pub message: String,
    /// When the alert was raised.
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    /// Build an alert with the kind's default severity.
    #[must_use]
    pub fn new(kind: AlertKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            subject: subject.into(),
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Fan-out bus for operational alerts.
///
/// Publishing logs the alert at its severity and broadcasts it to whoever is
/// subscribed. A full or empty subscriber set never blocks the publisher.
#[derive(Debug, Clone)]
pub struct AlertBus {
    tx: broadcast::Sender<Alert>,
}

impl AlertBus {
    /// Create a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(ALERT_BUS_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all alerts published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an alert to the log and to all subscribers.
    pub fn publish(&self, alert: Alert) {
        match alert.severity {
            AlertSeverity::Critical => tracing::error!(
                kind = alert.kind.as_str(),
                subject = %alert.subject,
                message = %alert.message,
                "Alert raised"
            ),
            AlertSeverity::Warning => tracing::warn!(
                kind = alert.kind.as_str(),
                subject = %alert.subject,
                message = %alert.message,
                "Alert raised"
            ),
            AlertSeverity::Info => tracing::info!(
                kind = alert.kind.as_str(),
                subject = %alert.subject,
                message = %alert.message,
                "Alert raised"
            ),
        }

        crate::observability::record_alert(alert.kind, alert.severity);

        // Send fails only when there are no receivers; that is fine.
        let _ = self.tx.send(alert);
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
