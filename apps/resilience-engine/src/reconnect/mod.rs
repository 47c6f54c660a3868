//! Exponential-backoff reconnection.

mod backoff;
mod supervisor;

pub use backoff::BackoffSchedule;
pub use supervisor::{ReconnectError, ReconnectHandler, ReconnectSupervisor};
