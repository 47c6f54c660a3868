//! Prometheus metrics.
//!
//! # Metric Categories
//!
//! - **Gaps**: open count, open/close/skip totals, duration distribution
//! - **Reconnects**: attempt, success, and failure totals
//! - **Remediations**: lifecycle totals, in-flight gauge, budget deferrals
//! - **Components**: numeric status per supervised component
//! - **Quality**: score distribution per source
//!
//! Metrics are exposed at `/metrics` on the ops server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::alert::{AlertKind, AlertSeverity};
use crate::failover::ComponentStatus;
use crate::health::{DataKind, RemediationPriority};
use crate::remediation::RemediationStatus;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Alerts
    describe_counter!(
        "resilience_alerts_total",
        "Alerts published, by kind and severity"
    );

    // Gaps
    describe_counter!(
        "resilience_gaps_opened_total",
        "Connection gaps opened, by data kind"
    );
    describe_counter!(
        "resilience_gaps_closed_total",
        "Connection gaps closed, by data kind"
    );
    describe_counter!(
        "resilience_gaps_skipped_total",
        "Closed gaps the analyzer declined to remediate, by reason"
    );
    describe_gauge!("resilience_open_gaps", "Gaps currently open");
    describe_histogram!(
        "resilience_gap_duration_seconds",
        "Duration of closed gaps in seconds"
    );

    // Reconnects
    describe_counter!(
        "resilience_reconnect_attempts_total",
        "Reconnect attempts started"
    );
    describe_counter!(
        "resilience_reconnect_successes_total",
        "Reconnect attempts that restored the stream"
    );
    describe_counter!(
        "resilience_reconnect_failures_total",
        "Reconnect attempts that failed"
    );

    // Remediations
    describe_counter!(
        "resilience_remediations_submitted_total",
        "Remediation requests submitted, by priority"
    );
    describe_counter!(
        "resilience_remediations_dispatched_total",
        "Remediation requests handed to a worker"
    );
    describe_counter!(
        "resilience_remediations_terminal_total",
        "Remediation requests reaching a terminal status"
    );
    describe_gauge!(
        "resilience_remediations_in_progress",
        "Remediation requests currently executing"
    );
    describe_counter!(
        "resilience_budget_deferrals_total",
        "Dispatch cycles stopped by a budget denial"
    );

    // Components
    describe_gauge!(
        "resilience_component_status",
        "Component status (0=healthy 1=degraded 2=unhealthy 3=offline)"
    );

    // Quality
    describe_histogram!(
        "resilience_quality_score",
        "Record quality scores, by source"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a published alert.
pub fn record_alert(kind: AlertKind, severity: AlertSeverity) {
    counter!(
        "resilience_alerts_total",
        "kind" => kind.as_str(),
        "severity" => severity.as_str()
    )
    .increment(1);
}

/// Record an opened connection gap.
pub fn record_gap_opened(data_kind: DataKind) {
    counter!(
        "resilience_gaps_opened_total",
        "data_kind" => data_kind.as_str()
    )
    .increment(1);
}

/// Record a closed connection gap and its duration.
pub fn record_gap_closed(data_kind: DataKind, duration_seconds: f64) {
    counter!(
        "resilience_gaps_closed_total",
        "data_kind" => data_kind.as_str()
    )
    .increment(1);
    histogram!(
        "resilience_gap_duration_seconds",
        "data_kind" => data_kind.as_str()
    )
    .record(duration_seconds);
}

/// Update the open gap gauge.
pub fn set_open_gap_count(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("resilience_open_gaps").set(count as f64);
}

/// Record a gap the analyzer declined to remediate.
pub fn record_gap_skipped(reason: &'static str) {
    counter!(
        "resilience_gaps_skipped_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record the start of a reconnect attempt.
pub fn record_reconnect_attempt() {
    counter!("resilience_reconnect_attempts_total").increment(1);
}

/// Record a reconnect attempt that restored the stream.
pub fn record_reconnect_success() {
    counter!("resilience_reconnect_successes_total").increment(1);
}

/// Record a failed reconnect attempt.
pub fn record_reconnect_failure() {
    counter!("resilience_reconnect_failures_total").increment(1);
}

/// Record a submitted remediation request.
pub fn record_remediation_submitted(priority: RemediationPriority) {
    counter!(
        "resilience_remediations_submitted_total",
        "priority" => priority.as_str()
    )
    .increment(1);
}

/// Record a remediation handed to a worker.
pub fn record_remediation_dispatched() {
    counter!("resilience_remediations_dispatched_total").increment(1);
}

/// Record a remediation reaching a terminal status.
pub fn record_remediation_terminal(status: RemediationStatus) {
    counter!(
        "resilience_remediations_terminal_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Update the in-flight remediation gauge.
pub fn set_remediations_in_progress(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("resilience_remediations_in_progress").set(count as f64);
}

/// Record a dispatch cycle stopped by a budget denial.
pub fn record_budget_deferral() {
    counter!("resilience_budget_deferrals_total").increment(1);
}

/// Update a component's numeric status gauge.
pub fn record_component_status(component_id: &str, status: ComponentStatus) {
    gauge!(
        "resilience_component_status",
        "component" => component_id.to_string()
    )
    .set(f64::from(status_value(status)));
}

/// Record a quality score observation.
pub fn record_quality_score(source: &str, score: f64) {
    histogram!(
        "resilience_quality_score",
        "source" => source.to_string()
    )
    .record(score);
}

const fn status_value(status: ComponentStatus) -> u8 {
    match status {
        ComponentStatus::Healthy => 0,
        ComponentStatus::Degraded => 1,
        ComponentStatus::Unhealthy => 2,
        ComponentStatus::Offline => 3,
    }
}
