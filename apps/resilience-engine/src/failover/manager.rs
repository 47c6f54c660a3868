//! Circuit-breaker failover for named components.
//!
//! Supervises arbitrary components (an algorithm, an API client, a database)
//! through one call: [`FailoverManager::record_result`]. Trip conditions move
//! a component from `Healthy` to `Degraded` by activating its registered
//! fallback hook, to `Offline` when that activation fails, and to `Unhealthy`
//! when a degraded component keeps tripping. Sustained good results walk it
//! back to `Healthy`.
//!
//! # State Machine
//!
//! ```text
//! HEALTHY → DEGRADED   (trip, hook activated or absent)
//! HEALTHY → OFFLINE    (trip, hook activation failed)
//! DEGRADED → UNHEALTHY (trip while already on fallback)
//! DEGRADED | UNHEALTHY → HEALTHY (sustained recovery)
//! OFFLINE → DEGRADED   (success prompts one hook re-attempt)
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alert::{Alert, AlertBus, AlertKind};
use crate::config::FailoverConfig;
use crate::observability;

/// Errors from the failover manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailoverError {
    /// The component was never registered.
    #[error("unknown component: {0}")]
    UnknownComponent(String),
    /// The component is already registered.
    #[error("component already registered: {0}")]
    DuplicateComponent(String),
}

/// Error returned by a failover hook that could not activate its fallback.
#[derive(Debug, Clone, Error)]
#[error("failover activation failed: {message}")]
pub struct HookError {
    /// What went wrong.
    pub message: String,
}

/// Fallback activation callback, registered per component.
///
/// Invoked synchronously when a trip occurs, after the manager lock is
/// released; an implementation may call back into the manager.
pub trait FailoverHook: Send + Sync {
    /// Switch the component to its fallback. `Ok` means traffic can keep
    /// flowing in degraded mode.
    fn activate(&self) -> Result<(), HookError>;
}

/// Component circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentStatus {
    /// Operating normally.
    Healthy,
    /// Running on its fallback.
    Degraded,
    /// Tripped again while already degraded.
    Unhealthy,
    /// Fallback activation failed; no capacity left.
    Offline,
}

impl ComponentStatus {
    /// Whether the component is operating normally.
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Whether the component has no remaining capacity.
    #[must_use]
    pub const fn is_offline(self) -> bool {
        matches!(self, Self::Offline)
    }

    /// Status as its wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Unhealthy => "UNHEALTHY",
            Self::Offline => "OFFLINE",
        }
    }
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time copy of one component's health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component identifier.
    pub component_id: String,
    /// Current circuit state.
    pub status: ComponentStatus,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Success rate over the rolling window.
    pub success_rate: f64,
    /// Average response time over the rolling window, in milliseconds.
    pub avg_response_time_ms: f64,
    /// Whether the fallback is currently serving.
    pub fallback_active: bool,
    /// When the component last reported a success.
    pub last_healthy_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct CallSample {
    success: bool,
    response_time_ms: f64,
}

struct ComponentEntry {
    status: ComponentStatus,
    consecutive_failures: u32,
    window: VecDeque<CallSample>,
    fallback_active: bool,
    last_healthy_at: Option<DateTime<Utc>>,
    hook: Option<Arc<dyn FailoverHook>>,
    activation_in_flight: bool,
}

impl ComponentEntry {
    fn push_sample(&mut self, sample: CallSample, window_size: usize) {
        self.window.push_back(sample);
        while self.window.len() > window_size {
            self.window.pop_front();
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let successes = self.window.iter().filter(|s| s.success).count();
        successes as f64 / self.window.len() as f64
    }

    #[allow(clippy::cast_precision_loss)]
    fn avg_response_time_ms(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let total: f64 = self.window.iter().map(|s| s.response_time_ms).sum();
        total / self.window.len() as f64
    }
}

/// Why a fallback hook is about to run.
#[derive(Clone, Copy)]
enum ActivationReason {
    /// Trip out of `Healthy`; the outcome decides `Degraded` or `Offline`.
    Trip,
    /// Success while `Offline`; the single permitted re-attempt.
    OfflineRecovery,
}

/// Tracks component health and drives fallback activation.
pub struct FailoverManager {
    config: FailoverConfig,
    components: parking_lot::Mutex<HashMap<String, ComponentEntry>>,
    alerts: AlertBus,
}

impl FailoverManager {
    /// Create a manager publishing state changes on the alert bus.
    #[must_use]
    pub fn new(config: FailoverConfig, alerts: AlertBus) -> Self {
        Self {
            config,
            components: parking_lot::Mutex::new(HashMap::new()),
            alerts,
        }
    }

    /// Register a component, optionally with a fallback hook.
    ///
    /// A component without a hook still trips to `Degraded`; there is just
    /// no fallback to activate.
    pub fn register_component(
        &self,
        component_id: impl Into<String>,
        hook: Option<Arc<dyn FailoverHook>>,
    ) -> Result<(), FailoverError> {
        let component_id = component_id.into();
        let mut components = self.components.lock();
        if components.contains_key(&component_id) {
            return Err(FailoverError::DuplicateComponent(component_id));
        }
        tracing::info!(
            component_id,
            has_hook = hook.is_some(),
            "Component registered"
        );
        components.insert(
            component_id,
            ComponentEntry {
                status: ComponentStatus::Healthy,
                consecutive_failures: 0,
                window: VecDeque::new(),
                fallback_active: false,
                last_healthy_at: None,
                hook,
                activation_in_flight: false,
            },
        );
        Ok(())
    }

    /// Record one call outcome for a component.
    ///
    /// Successes reset the consecutive-failure counter and may recover the
    /// component; failures evaluate the trip conditions. Returns the status
    /// after the result is applied.
    pub fn record_result(
        &self,
        component_id: &str,
        success: bool,
        response_time_ms: f64,
    ) -> Result<ComponentStatus, FailoverError> {
        self.record_result_at(component_id, success, response_time_ms, Utc::now())
    }

    /// Record a call outcome with an explicit clock.
    pub fn record_result_at(
        &self,
        component_id: &str,
        success: bool,
        response_time_ms: f64,
        now: DateTime<Utc>,
    ) -> Result<ComponentStatus, FailoverError> {
        let mut alerts = Vec::new();
        let (mut status, activation) = {
            let mut components = self.components.lock();
            let entry = components
                .get_mut(component_id)
                .ok_or_else(|| FailoverError::UnknownComponent(component_id.to_string()))?;

            entry.push_sample(
                CallSample {
                    success,
                    response_time_ms,
                },
                self.config.sliding_window_size,
            );

            let activation = if success {
                entry.consecutive_failures = 0;
                entry.last_healthy_at = Some(now);
                self.handle_success(component_id, entry, &mut alerts)
            } else {
                entry.consecutive_failures += 1;
                self.handle_failure(component_id, entry, response_time_ms, &mut alerts)
            };
            (entry.status, activation)
        };

        // The hook runs with the lock released, so it may call back into the
        // manager. The outcome is applied once the lock is re-taken.
        if let Some((reason, hook)) = activation {
            let outcome = hook.activate();
            status = self.settle_activation(component_id, reason, outcome, &mut alerts);
        }

        observability::record_component_status(component_id, status);
        for alert in alerts {
            self.alerts.publish(alert);
        }
        Ok(status)
    }

    /// Copy of one component's health.
    #[must_use]
    pub fn component_health(&self, component_id: &str) -> Option<ComponentHealth> {
        let components = self.components.lock();
        components
            .get(component_id)
            .map(|entry| snapshot(component_id, entry))
    }

    /// Copies of every component's health, ordered by identifier.
    #[must_use]
    pub fn all_component_health(&self) -> Vec<ComponentHealth> {
        let components = self.components.lock();
        let mut all: Vec<ComponentHealth> = components
            .iter()
            .map(|(id, entry)| snapshot(id, entry))
            .collect();
        all.sort_by(|a, b| a.component_id.cmp(&b.component_id));
        all
    }

    fn handle_failure(
        &self,
        component_id: &str,
        entry: &mut ComponentEntry,
        response_time_ms: f64,
        alerts: &mut Vec<Alert>,
    ) -> Option<(ActivationReason, Arc<dyn FailoverHook>)> {
        match entry.status {
            // Failures past this point carry no new information and must
            // not re-activate the hook.
            ComponentStatus::Offline | ComponentStatus::Unhealthy => return None,
            ComponentStatus::Healthy | ComponentStatus::Degraded => {}
        }

        let rate_tripped = entry.window.len() >= self.config.minimum_calls
            && entry.success_rate() < self.config.success_rate_floor;
        let tripped = entry.consecutive_failures >= self.config.failure_threshold
            || response_time_ms > self.config.slow_call_threshold_ms
            || rate_tripped;
        if !tripped {
            return None;
        }

        if entry.status == ComponentStatus::Degraded {
            entry.status = ComponentStatus::Unhealthy;
            tracing::warn!(
                component_id,
                consecutive_failures = entry.consecutive_failures,
                "Component worsened while on fallback"
            );
            alerts.push(Alert::new(
                AlertKind::ComponentDegraded,
                component_id.to_string(),
                format!(
                    "worsened to UNHEALTHY after {} consecutive failures on fallback",
                    entry.consecutive_failures
                ),
            ));
            return None;
        }

        if entry.activation_in_flight {
            // A concurrent trip already handed the hook off.
            return None;
        }
        let Some(hook) = entry.hook.as_ref().map(Arc::clone) else {
            entry.status = ComponentStatus::Degraded;
            entry.fallback_active = false;
            tracing::warn!(component_id, "Component tripped, no fallback registered");
            alerts.push(Alert::new(
                AlertKind::ComponentDegraded,
                component_id.to_string(),
                "tripped; no fallback registered".to_string(),
            ));
            return None;
        };
        entry.activation_in_flight = true;
        Some((ActivationReason::Trip, hook))
    }

    /// Apply a finished hook activation. The lock was released while the
    /// hook ran, so the entry is re-read rather than assumed unchanged.
    fn settle_activation(
        &self,
        component_id: &str,
        reason: ActivationReason,
        outcome: Result<(), HookError>,
        alerts: &mut Vec<Alert>,
    ) -> ComponentStatus {
        let mut components = self.components.lock();
        let Some(entry) = components.get_mut(component_id) else {
            // Components are never unregistered.
            return ComponentStatus::Offline;
        };
        entry.activation_in_flight = false;

        match (reason, outcome) {
            (ActivationReason::Trip, Ok(())) => {
                entry.status = ComponentStatus::Degraded;
                entry.fallback_active = true;
                tracing::warn!(component_id, "Component tripped, fallback activated");
                alerts.push(Alert::new(
                    AlertKind::ComponentDegraded,
                    component_id.to_string(),
                    "tripped; fallback activated".to_string(),
                ));
            }
            (ActivationReason::Trip, Err(err)) => {
                entry.status = ComponentStatus::Offline;
                entry.fallback_active = false;
                tracing::error!(
                    component_id,
                    error = %err,
                    "Component tripped and fallback activation failed"
                );
                alerts.push(Alert::new(
                    AlertKind::ComponentOffline,
                    component_id.to_string(),
                    format!("tripped and fallback activation failed: {err}"),
                ));
            }
            (ActivationReason::OfflineRecovery, Ok(())) => {
                entry.status = ComponentStatus::Degraded;
                entry.fallback_active = true;
                tracing::info!(component_id, "Fallback activated after offline period");
                alerts.push(Alert::new(
                    AlertKind::ComponentDegraded,
                    component_id.to_string(),
                    "fallback activated after offline period".to_string(),
                ));
            }
            (ActivationReason::OfflineRecovery, Err(err)) => {
                tracing::warn!(
                    component_id,
                    error = %err,
                    "Fallback re-activation failed, component stays offline"
                );
            }
        }
        entry.status
    }

    fn handle_success(
        &self,
        component_id: &str,
        entry: &mut ComponentEntry,
        alerts: &mut Vec<Alert>,
    ) -> Option<(ActivationReason, Arc<dyn FailoverHook>)> {
        match entry.status {
            ComponentStatus::Healthy => None,
            ComponentStatus::Degraded | ComponentStatus::Unhealthy => {
                if self.recovery_met(entry) {
                    entry.status = ComponentStatus::Healthy;
                    entry.fallback_active = false;
                    tracing::info!(component_id, "Component recovered");
                    alerts.push(Alert::new(
                        AlertKind::ComponentRecovered,
                        component_id.to_string(),
                        "sustained recovery; primary restored".to_string(),
                    ));
                }
                None
            }
            ComponentStatus::Offline => {
                // Leaving OFFLINE requires a successful fallback activation.
                if entry.activation_in_flight {
                    return None;
                }
                let hook = entry.hook.as_ref().map(Arc::clone)?;
                entry.activation_in_flight = true;
                Some((ActivationReason::OfflineRecovery, hook))
            }
        }
    }

    /// Recovery needs a full window of sustained good results.
    fn recovery_met(&self, entry: &ComponentEntry) -> bool {
        entry.consecutive_failures == 0
            && entry.window.len() >= self.config.sliding_window_size
            && entry.success_rate() > self.config.recovery_success_rate
            && entry.avg_response_time_ms() < self.config.recovery_response_time_ms
    }
}

fn snapshot(component_id: &str, entry: &ComponentEntry) -> ComponentHealth {
    ComponentHealth {
        component_id: component_id.to_string(),
        status: entry.status,
        consecutive_failures: entry.consecutive_failures,
        success_rate: entry.success_rate(),
        avg_response_time_ms: entry.avg_response_time_ms(),
        fallback_active: entry.fallback_active,
        last_healthy_at: entry.last_healthy_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertSeverity;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedHook {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    impl ScriptedHook {
        fn always_ok() -> Arc<Self> {
            Arc::new(Self {
                failures_before_success: 0,
                calls: AtomicU32::new(0),
            })
        }

        fn failing(failures_before_success: u32) -> Arc<Self> {
            Arc::new(Self {
                failures_before_success,
                calls: AtomicU32::new(0),
            })
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FailoverHook for ScriptedHook {
        fn activate(&self) -> Result<(), HookError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(HookError {
                    message: "secondary also down".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn manager() -> (FailoverManager, AlertBus) {
        let bus = AlertBus::new();
        (FailoverManager::new(FailoverConfig::default(), bus.clone()), bus)
    }

    #[test]
    fn stays_healthy_below_failure_threshold() {
        let (manager, _bus) = manager();
        manager.register_component("priceFeed", None).unwrap();

        manager.record_result("priceFeed", false, 100.0).unwrap();
        let status = manager.record_result("priceFeed", false, 100.0).unwrap();

        assert_eq!(status, ComponentStatus::Healthy);
    }

    #[test]
    fn consecutive_failures_trip_to_degraded_with_fallback() {
        let (manager, _bus) = manager();
        let hook = ScriptedHook::always_ok();
        manager
            .register_component("priceFeed", Some(hook.clone()))
            .unwrap();

        manager.record_result("priceFeed", false, 100.0).unwrap();
        manager.record_result("priceFeed", false, 100.0).unwrap();
        let status = manager.record_result("priceFeed", false, 100.0).unwrap();

        assert_eq!(status, ComponentStatus::Degraded);
        assert_eq!(hook.call_count(), 1);

        let health = manager.component_health("priceFeed").unwrap();
        assert!(health.fallback_active);
        assert_eq!(health.consecutive_failures, 3);
    }

    #[test]
    fn slow_failure_trips_on_first_call() {
        let (manager, _bus) = manager();
        manager
            .register_component("priceFeed", Some(ScriptedHook::always_ok()))
            .unwrap();

        let status = manager.record_result("priceFeed", false, 6000.0).unwrap();

        assert_eq!(status, ComponentStatus::Degraded);
    }

    #[test]
    fn low_success_rate_trips_without_consecutive_failures() {
        let (manager, _bus) = manager();
        manager
            .register_component("priceFeed", Some(ScriptedHook::always_ok()))
            .unwrap();

        manager.record_result("priceFeed", true, 100.0).unwrap();
        manager.record_result("priceFeed", true, 100.0).unwrap();
        manager.record_result("priceFeed", true, 100.0).unwrap();
        // Four calls: below minimum, no rate evaluation yet
        let status = manager.record_result("priceFeed", false, 100.0).unwrap();
        assert_eq!(status, ComponentStatus::Healthy);
        // Fifth call: 3/5 success rate drops under the 0.8 floor
        let status = manager.record_result("priceFeed", false, 100.0).unwrap();
        assert_eq!(status, ComponentStatus::Degraded);
    }

    #[test]
    fn hook_failure_goes_offline_and_is_never_reinvoked_by_failures() {
        let (manager, bus) = manager();
        let mut alert_rx = bus.subscribe();
        let hook = ScriptedHook::failing(u32::MAX);
        manager
            .register_component("priceFeed", Some(hook.clone()))
            .unwrap();

        for _ in 0..3 {
            manager.record_result("priceFeed", false, 100.0).unwrap();
        }
        assert_eq!(
            manager.component_health("priceFeed").unwrap().status,
            ComponentStatus::Offline
        );
        assert_eq!(hook.call_count(), 1);

        let alert = alert_rx.try_recv().unwrap();
        assert_eq!(alert.kind, AlertKind::ComponentOffline);
        assert_eq!(alert.severity, AlertSeverity::Critical);

        // Further failures leave the hook alone
        for _ in 0..10 {
            let status = manager.record_result("priceFeed", false, 100.0).unwrap();
            assert_eq!(status, ComponentStatus::Offline);
        }
        assert_eq!(hook.call_count(), 1);
    }

    #[test]
    fn trip_without_hook_degrades_without_fallback() {
        let (manager, _bus) = manager();
        manager.register_component("scorer", None).unwrap();

        for _ in 0..3 {
            manager.record_result("scorer", false, 100.0).unwrap();
        }

        let health = manager.component_health("scorer").unwrap();
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(!health.fallback_active);
    }

    #[test]
    fn degraded_component_worsens_to_unhealthy_without_reactivating_hook() {
        let (manager, _bus) = manager();
        let hook = ScriptedHook::always_ok();
        manager
            .register_component("priceFeed", Some(hook.clone()))
            .unwrap();

        for _ in 0..3 {
            manager.record_result("priceFeed", false, 100.0).unwrap();
        }
        assert_eq!(
            manager.component_health("priceFeed").unwrap().status,
            ComponentStatus::Degraded
        );

        // Keep failing on the fallback
        for _ in 0..3 {
            manager.record_result("priceFeed", false, 100.0).unwrap();
        }
        assert_eq!(
            manager.component_health("priceFeed").unwrap().status,
            ComponentStatus::Unhealthy
        );
        assert_eq!(hook.call_count(), 1);
    }

    #[test]
    fn sustained_successes_recover_a_degraded_component() {
        let (manager, bus) = manager();
        let mut alert_rx = bus.subscribe();
        manager
            .register_component("priceFeed", Some(ScriptedHook::always_ok()))
            .unwrap();

        for _ in 0..3 {
            manager.record_result("priceFeed", false, 100.0).unwrap();
        }
        assert_eq!(
            manager.component_health("priceFeed").unwrap().status,
            ComponentStatus::Degraded
        );

        let mut status = ComponentStatus::Degraded;
        for _ in 0..20 {
            status = manager.record_result("priceFeed", true, 500.0).unwrap();
        }

        // Twenty clean calls push the failures out of the window
        assert_eq!(status, ComponentStatus::Healthy);
        let health = manager.component_health("priceFeed").unwrap();
        assert!(!health.fallback_active);
        assert!(health.last_healthy_at.is_some());
        assert!((health.success_rate - 1.0).abs() < f64::EPSILON);

        let kinds: Vec<AlertKind> = std::iter::from_fn(|| alert_rx.try_recv().ok())
            .map(|a| a.kind)
            .collect();
        assert!(kinds.contains(&AlertKind::ComponentRecovered));
    }

    #[test]
    fn offline_component_reactivates_fallback_on_success() {
        let (manager, _bus) = manager();
        let hook = ScriptedHook::failing(1);
        manager
            .register_component("priceFeed", Some(hook.clone()))
            .unwrap();

        for _ in 0..3 {
            manager.record_result("priceFeed", false, 100.0).unwrap();
        }
        assert_eq!(
            manager.component_health("priceFeed").unwrap().status,
            ComponentStatus::Offline
        );

        // First success retries the hook, which now works
        let status = manager.record_result("priceFeed", true, 200.0).unwrap();
        assert_eq!(status, ComponentStatus::Degraded);
        assert!(manager.component_health("priceFeed").unwrap().fallback_active);
        assert_eq!(hook.call_count(), 2);
    }

    struct ReentrantHook {
        manager: Arc<FailoverManager>,
        observed: parking_lot::Mutex<Option<ComponentHealth>>,
    }

    impl FailoverHook for ReentrantHook {
        fn activate(&self) -> Result<(), HookError> {
            *self.observed.lock() = self.manager.component_health("priceFeed");
            Ok(())
        }
    }

    #[test]
    fn activation_hook_can_call_back_into_the_manager() {
        let manager = Arc::new(FailoverManager::new(
            FailoverConfig::default(),
            AlertBus::new(),
        ));
        let hook = Arc::new(ReentrantHook {
            manager: Arc::clone(&manager),
            observed: parking_lot::Mutex::new(None),
        });
        manager
            .register_component("priceFeed", Some(hook.clone()))
            .unwrap();

        for _ in 0..3 {
            manager.record_result("priceFeed", false, 100.0).unwrap();
        }

        // The callback ran to completion and saw the tripping component.
        let seen = hook.observed.lock().clone().unwrap();
        assert_eq!(seen.consecutive_failures, 3);

        let health = manager.component_health("priceFeed").unwrap();
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.fallback_active);
    }

    #[test]
    fn unknown_component_is_rejected() {
        let (manager, _bus) = manager();
        let err = manager.record_result("ghost", true, 10.0).unwrap_err();
        assert_eq!(err, FailoverError::UnknownComponent("ghost".to_string()));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let (manager, _bus) = manager();
        manager.register_component("priceFeed", None).unwrap();
        let err = manager.register_component("priceFeed", None).unwrap_err();
        assert_eq!(
            err,
            FailoverError::DuplicateComponent("priceFeed".to_string())
        );
    }

    #[test]
    fn snapshots_are_ordered_by_component_id() {
        let (manager, _bus) = manager();
        manager.register_component("zeta", None).unwrap();
        manager.register_component("alpha", None).unwrap();

        let all = manager.all_component_health();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].component_id, "alpha");
        assert_eq!(all[1].component_id, "zeta");
    }
}
