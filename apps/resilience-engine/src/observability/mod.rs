//! Logging and metrics plumbing.

mod logging;
mod metrics;

pub use logging::init_tracing;
pub use metrics::{
    get_metrics_handle, init_metrics, record_alert, record_budget_deferral, record_component_status,
    record_gap_closed, record_gap_opened, record_gap_skipped, record_quality_score,
    record_reconnect_attempt, record_reconnect_failure, record_reconnect_success,
    record_remediation_dispatched, record_remediation_submitted, record_remediation_terminal,
    set_open_gap_count, set_remediations_in_progress,
};
