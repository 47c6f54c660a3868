//! Per-stream reconnection tasks.
//!
//! The supervisor owns one recovery task per disconnected stream. Each task
//! sleeps the stream's recorded backoff (jittered), asks the registered
//! [`ReconnectHandler`] to re-establish the connection, and reports the
//! outcome to the health tracker, which escalates to `Failed` when the
//! attempt limit runs out. Tasks end on success, exhaustion, independent
//! recovery, or cancellation.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ReconnectConfig;
use crate::health::{ConnectionHealthTracker, StreamEvent};
use crate::observability;
use crate::reconnect::backoff::BackoffSchedule;

/// Errors returned by reconnect handlers.
#[derive(Debug, Clone, Error)]
pub enum ReconnectError {
    /// The endpoint refused or dropped the attempt.
    #[error("connection attempt failed: {message}")]
    AttemptFailed {
        /// Error details.
        message: String,
    },
    /// The handler has no way to reconnect this stream.
    #[error("no reconnect route for stream {stream_id}")]
    Unsupported {
        /// Stream the handler could not route.
        stream_id: String,
    },
}

/// Port to whatever can re-establish a stream's upstream connection.
#[async_trait]
pub trait ReconnectHandler: Send + Sync {
    /// Try to bring the stream back. Resolves `Ok` once data can flow again.
    async fn attempt(&self, stream_id: &str) -> Result<(), ReconnectError>;
}

/// Spawns and tracks one recovery task per disconnected stream.
pub struct ReconnectSupervisor {
    tracker: Arc<ConnectionHealthTracker>,
    handler: Arc<dyn ReconnectHandler>,
    schedule: BackoffSchedule,
    cancel: CancellationToken,
    active: Arc<parking_lot::Mutex<HashSet<String>>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl ReconnectSupervisor {
    /// Create a supervisor over the tracker and handler.
    #[must_use]
    pub fn new(
        config: &ReconnectConfig,
        tracker: Arc<ConnectionHealthTracker>,
        handler: Arc<dyn ReconnectHandler>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tracker,
            handler,
            schedule: config.to_schedule(),
            cancel,
            active: Arc::new(parking_lot::Mutex::new(HashSet::new())),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Start recovery for a stream unless one is already running.
    pub fn watch(&self, stream_id: &str) {
        {
            let mut active = self.active.lock();
            if !active.insert(stream_id.to_string()) {
                tracing::debug!(stream_id, "Recovery already in progress");
                return;
            }
        }
        self.tasks.lock().retain(|h| !h.is_finished());

        let tracker = Arc::clone(&self.tracker);
        let handler = Arc::clone(&self.handler);
        let schedule = self.schedule.clone();
        let cancel = self.cancel.clone();
        let active = Arc::clone(&self.active);
        let stream_id = stream_id.to_string();
        let handle = tokio::spawn(async move {
            recover_stream(&tracker, &*handler, &schedule, &cancel, &stream_id).await;
            active.lock().remove(&stream_id);
        });
        self.tasks.lock().push(handle);
    }

    /// Streams with a recovery task currently running.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Wait for every recovery task to finish.
    ///
    /// Callers cancel the token first; tasks notice at their next sleep.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Recovery task panicked");
            }
        }
    }
}

/// Drive one stream from `Disconnected` back to `Connected`, or stop on
/// exhaustion, cancellation, or independent recovery.
async fn recover_stream(
    tracker: &ConnectionHealthTracker,
    handler: &dyn ReconnectHandler,
    schedule: &BackoffSchedule,
    cancel: &CancellationToken,
    stream_id: &str,
) {
    let proceed = match tracker.begin_reconnect(stream_id) {
        Ok(proceed) => proceed,
        Err(err) => {
            tracing::error!(stream_id, error = %err, "Cannot start recovery");
            return;
        }
    };
    if !proceed {
        tracing::debug!(stream_id, "Stream no longer disconnected, skipping recovery");
        return;
    }

    let mut delay = match tracker.current_backoff(stream_id) {
        Ok(delay) => delay,
        Err(err) => {
            tracing::error!(stream_id, error = %err, "Cannot read backoff");
            return;
        }
    };

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!(stream_id, "Recovery cancelled");
                return;
            }
            () = tokio::time::sleep(schedule.jittered(delay)) => {}
        }

        // Data may have started flowing again while we slept.
        if tracker.is_connected(stream_id) {
            tracing::info!(stream_id, "Stream recovered before retry");
            return;
        }

        observability::record_reconnect_attempt();
        match handler.attempt(stream_id).await {
            Ok(()) => {
                observability::record_reconnect_success();
                if let Err(err) = tracker.report_event(stream_id, StreamEvent::Reconnected, None)
                {
                    tracing::error!(stream_id, error = %err, "Failed to record recovery");
                }
                tracing::info!(stream_id, "Stream reconnected");
                return;
            }
            Err(err) => {
                let progress =
                    match tracker.record_reconnect_failure(stream_id, &err.to_string()) {
                        Ok(progress) => progress,
                        Err(track_err) => {
                            tracing::error!(
                                stream_id,
                                error = %track_err,
                                "Failed to record reconnect failure"
                            );
                            return;
                        }
                    };
                tracing::warn!(
                    stream_id,
                    attempt = progress.attempt,
                    next_delay_ms = progress.backoff.as_millis(),
                    error = %err,
                    "Reconnect attempt failed"
                );
                if progress.exhausted {
                    // The tracker marked the stream failed and raised the
                    // critical alert; manual intervention takes over.
                    return;
                }
                delay = progress.backoff;
            }
        }
    }
}
