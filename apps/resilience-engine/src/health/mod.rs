//! Connection health tracking.
//!
//! Owns per-stream liveness state and the gap lifecycle: a gap opens when a
//! live stream drops and closes when the stream proves liveness again.

mod tracker;
mod types;

pub use tracker::{ConnectionHealthTracker, HealthTrackerError, ReconnectProgress};
pub use types::{
    ConnectionGap, DataKind, HealthNotice, RemediationPriority, StreamEvent, StreamHealth,
    StreamSpec, StreamState,
};
