//! Read-only snapshot of subsystem state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::failover::ComponentHealth;
use crate::health::StreamHealth;

/// Point-in-time copy of everything the subsystem supervises.
///
/// Safe for dashboards and alerting to poll: nothing in it aliases live
/// state, and it always reflects the worst known truth.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
    /// Health of every registered stream, ordered by stream id.
    pub streams: Vec<StreamHealth>,
    /// Health of every registered component, ordered by component id.
    pub components: Vec<ComponentHealth>,
    /// Gaps currently open.
    pub open_gap_count: usize,
    /// Remediation requests awaiting approval.
    pub pending_remediation_count: usize,
    /// Remediation requests currently executing.
    pub in_progress_remediation_count: usize,
}

impl HealthSnapshot {
    /// Streams currently delivering data.
    #[must_use]
    pub fn connected_stream_count(&self) -> usize {
        self.streams.iter().filter(|s| s.is_connected()).count()
    }

    /// True when any stream has failed or any component is offline.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.streams.iter().any(|s| s.state.is_failed())
            || self.components.iter().any(|c| c.status.is_offline())
    }
}
