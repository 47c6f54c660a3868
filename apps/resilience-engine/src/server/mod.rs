//! Ops HTTP Endpoint
//!
//! HTTP endpoint for health checks, subsystem status reporting, and
//! Prometheus metrics. Used by container orchestrators, load balancers,
//! and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks stream connections)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::coordinator::{HealthSnapshot, ResilienceCoordinator};
use crate::failover::ComponentHealth;
use crate::health::StreamHealth;
use crate::observability::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Engine version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Per-stream connection health.
    pub streams: Vec<StreamHealth>,
    /// Per-component failover health.
    pub components: Vec<ComponentHealth>,
    /// Outage and remediation counters.
    pub remediation: RemediationCounts,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All streams live, no component offline.
    Healthy,
    /// Some streams down or a component degraded.
    Degraded,
    /// No stream is delivering data.
    Unhealthy,
}

/// Outage and remediation counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RemediationCounts {
    /// Gaps currently open.
    pub open_gaps: usize,
    /// Requests awaiting approval.
    pub pending: usize,
    /// Requests currently executing.
    pub in_progress: usize,
}

// =============================================================================
// Ops Server State
// =============================================================================

/// Shared state for the ops server.
pub struct OpsServerState {
    version: String,
    started_at: Instant,
    coordinator: Arc<ResilienceCoordinator>,
}

impl OpsServerState {
    /// Create new ops server state.
    #[must_use]
    pub fn new(version: String, coordinator: Arc<ResilienceCoordinator>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            coordinator,
        }
    }
}

// =============================================================================
// Ops Server
// =============================================================================

/// Ops HTTP server.
pub struct OpsServer {
    host: String,
    port: u16,
    state: Arc<OpsServerState>,
    cancel: CancellationToken,
}

impl OpsServer {
    /// Create a new ops server.
    #[must_use]
    pub fn new(
        config: &ServerConfig,
        state: Arc<OpsServerState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            host: config.host.clone(),
            port: config.health_port,
            state,
            cancel,
        }
    }

    /// Run the ops server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `OpsServerError` if the bind address is invalid, binding
    /// fails, or the HTTP server encounters a fatal error while running.
    pub async fn run(self) -> Result<(), OpsServerError> {
        let app = build_router(self.state);

        let addr: SocketAddr = format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| OpsServerError::InvalidAddress(self.host.clone(), self.port))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| OpsServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Ops server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| OpsServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Ops server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

fn build_router(state: Arc<OpsServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<OpsServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<OpsServerState>>) -> impl IntoResponse {
    let snapshot = state.coordinator.health_snapshot();

    // Ready once at least one stream is delivering data
    if snapshot.connected_stream_count() > 0 {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &OpsServerState) -> HealthResponse {
    let snapshot = state.coordinator.health_snapshot();
    let status = determine_health_status(&snapshot);

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: snapshot.generated_at,
        remediation: RemediationCounts {
            open_gaps: snapshot.open_gap_count,
            pending: snapshot.pending_remediation_count,
            in_progress: snapshot.in_progress_remediation_count,
        },
        streams: snapshot.streams,
        components: snapshot.components,
    }
}

fn determine_health_status(snapshot: &HealthSnapshot) -> HealthStatus {
    let connected = snapshot.connected_stream_count();
    let total = snapshot.streams.len();

    if total > 0 && connected == 0 {
        return HealthStatus::Unhealthy;
    }
    if connected < total || snapshot.is_degraded() {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

// =============================================================================
// Errors
// =============================================================================

/// Ops server errors.
#[derive(Debug, thiserror::Error)]
pub enum OpsServerError {
    /// Bind address could not be parsed.
    #[error("invalid bind address {0}:{1}")]
    InvalidAddress(String, u16),

    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
