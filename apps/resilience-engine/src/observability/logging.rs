//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the configured level applies to
/// this crate and `info` to everything else.
///
/// # Panics
///
/// Panics if a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("info,resilience_engine={}", config.level))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.format == "compact" {
        builder.compact().init();
    } else {
        builder.pretty().init();
    }
}
