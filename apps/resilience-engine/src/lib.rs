#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Resilience Engine - Stream Supervision Core
//!
//! Keeps market data flowing: tracks per-stream liveness, records every
//! outage as a gap, drives exponential-backoff reconnection, prices and
//! queues backfill remediation under daily and monthly spend limits,
//! supervises component failover, and scores record quality.
//!
//! # Modules
//!
//! - `health`: Per-stream liveness and the gap lifecycle
//! - `reconnect`: Exponential-backoff reconnection supervision
//! - `gap`: Gap classification and backfill pricing
//! - `remediation`: Approval workflow, budget gating, and dispatch
//! - `failover`: Component circuit breakers and fallback activation
//! - `quality`: Record quality scoring
//! - `coordinator`: Composition root and public operations
//! - `server`: Ops HTTP endpoint (health probes and metrics)
//!
//! # Data Flow
//!
//! ```text
//! stream events ──► Health Tracker ──┬──► Reconnect Supervisor
//!                                    │
//!                              gap closed
//!                                    │
//!                                    ▼
//!                              Gap Analyzer ──► Remediation Queue
//!                                                      │
//!                                                      ▼
//!                                          Budget-Gated Dispatcher ──► backfill
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Alert taxonomy and the broadcast bus.
pub mod alert;

/// Configuration loading, validation, and env interpolation.
pub mod config;

/// Composition root wiring the subsystem together.
pub mod coordinator;

/// Component circuit breakers and fallback activation.
pub mod failover;

/// Gap classification and backfill pricing.
pub mod gap;

/// Per-stream liveness tracking and the gap lifecycle.
pub mod health;

/// Logging and Prometheus metrics.
pub mod observability;

/// Record quality scoring.
pub mod quality;

/// Exponential-backoff reconnection supervision.
pub mod reconnect;

/// Remediation approval, budget gating, and dispatch.
pub mod remediation;

/// Ops HTTP endpoint.
pub mod server;

// =============================================================================
// Re-exports
// =============================================================================

// Coordinator
pub use coordinator::{HealthSnapshot, ResilienceCoordinator};

// Configuration
pub use config::{Config, ConfigError, load_config, load_config_from_string};

// Stream health types
pub use health::{
    ConnectionGap, DataKind, RemediationPriority, StreamEvent, StreamHealth, StreamSpec,
    StreamState,
};

// Alerts
pub use alert::{Alert, AlertBus, AlertKind, AlertSeverity};

// Failover
pub use failover::{ComponentHealth, ComponentStatus, FailoverHook, FailoverManager};

// Remediation ports (for wiring real providers)
pub use remediation::{
    BackfillExecutorPort, BackfillOutcome, BudgetLedgerPort, InMemoryBudgetLedger,
    NoOpBackfillExecutor, RemediationRequest, RemediationStatus,
};

// Gap analysis ports
pub use gap::{CostEstimate, CostEstimatorPort, CostQuery};

// Reconnection
pub use reconnect::{ReconnectError, ReconnectHandler};

// Quality
pub use quality::{QualityAlertSink, QualityReport, QualityScorer};

// Ops server
pub use server::{OpsServer, OpsServerError, OpsServerState};

// Observability
pub use observability::{init_metrics, init_tracing};
