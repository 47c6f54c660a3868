//! Component-level circuit breaking and fallback activation.

mod manager;

pub use manager::{
    ComponentHealth, ComponentStatus, FailoverError, FailoverHook, FailoverManager, HookError,
};
