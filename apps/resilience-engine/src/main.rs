//! Resilience Engine Binary
//!
//! Starts the stream supervision service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin resilience-engine
//! ```
//!
//! # Environment Variables
//!
//! - `RESILIENCE_CONFIG`: Path to the YAML config file (default: config.yaml)
//! - `RUST_LOG`: Log filter (default: info)
//!
//! Stream adapters and backfill providers attach through the library API;
//! the binary runs the supervision core with the streams listed in config.

use std::sync::Arc;
use std::time::Duration;

use resilience_engine::coordinator::ResilienceCoordinator;
use resilience_engine::remediation::{InMemoryBudgetLedger, NoOpBackfillExecutor};
use resilience_engine::server::{OpsServer, OpsServerState};
use resilience_engine::{Config, load_config, observability};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let config_path = std::env::var("RESILIENCE_CONFIG").ok();
    let config = load_config(config_path.as_deref())?;

    observability::init_tracing(&config.observability.logging);
    observability::init_metrics();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting resilience engine"
    );
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // The binary runs with the in-memory ledger and the no-op backfill
    // executor; real providers are wired in by the embedding service.
    let coordinator = Arc::new(ResilienceCoordinator::new(
        &config,
        None,
        Arc::new(InMemoryBudgetLedger::new()),
        Arc::new(NoOpBackfillExecutor),
    ));

    for spec in config.streams.clone() {
        coordinator.register_stream(spec)?;
    }

    coordinator.start();

    let ops_state = Arc::new(OpsServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&coordinator),
    ));
    let ops_server = OpsServer::new(&config.server, ops_state, shutdown_token.clone());
    let ops_task = tokio::spawn(async move {
        if let Err(error) = ops_server.run().await {
            tracing::error!(%error, "Ops server failed");
        }
    });

    await_shutdown(shutdown_token).await;

    coordinator.stop().await;
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, ops_task).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => tracing::error!(%error, "Ops server task panicked"),
        Err(_) => tracing::warn!("Ops server did not stop within timeout"),
    }

    tracing::info!("Resilience engine stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &Config) {
    tracing::info!(
        stale_threshold_secs = config.health.stale_threshold_secs,
        sweep_interval_secs = config.health.sweep_interval_secs,
        max_reconnect_attempts = config.reconnect.max_attempts,
        max_concurrent_remediations = config.remediation.max_concurrent,
        daily_spend_limit = config.remediation.daily_spend_limit,
        monthly_spend_limit = config.remediation.monthly_spend_limit,
        health_port = config.server.health_port,
        streams = config.streams.len(),
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
