//! Per-provider circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to stop calling a provider that
//! keeps failing. The circuit has three states:
//!
//! - **Closed**: Normal operation, requests are allowed through.
//! - **Open**: Provider is failing, requests are refused until the cooldown ends.
//! - **HalfOpen**: Cooldown ended, exactly one trial request is let through.
//!
//! Failures are counted inside a rolling window. Admission hands out a
//! [`CircuitPermit`]; the outcome is recorded by consuming it. The breaker is
//! in-memory and resets on process restart.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::Instant;

/// Default number of failures inside the window that opens the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default rolling window for counting failures.
pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(120);

/// Default time to wait in Open before letting a trial through.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(120);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests are allowed.
    Closed,
    /// Provider is failing - requests are blocked.
    Open,
    /// Testing recovery - one trial allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failures inside `failure_window` that open the circuit.
    pub failure_threshold: u32,
    /// Rolling window for failure counting.
    pub failure_window: Duration,
    /// Time to wait in Open before probing.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_window: DEFAULT_FAILURE_WINDOW,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// Failure times, oldest first, pruned to the window.
    failures: VecDeque<Instant>,
    /// Set whenever the circuit enters Open.
    opened_at: Option<Instant>,
    /// A HalfOpen trial has been admitted and not yet resolved.
    trial_in_flight: bool,
    config: CircuitBreakerConfig,
}

impl Circuit {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            trial_in_flight: false,
            config,
        }
    }

    fn prune(&mut self, now: Instant) {
        let window = self.config.failure_window;
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failures.clear();
        self.opened_at = None;
        self.trial_in_flight = false;
    }
}

/// Circuit breaker for a single provider.
///
/// Shared as `Arc<CircuitBreaker>` so permits can outlive the borrow that
/// created them.
pub struct CircuitBreaker {
    provider: &'static str,
    circuit: Mutex<Circuit>,
    /// Global switch shared by every breaker in a registry.
    enabled: Arc<AtomicBool>,
}

impl CircuitBreaker {
    pub fn new(provider: &'static str, config: CircuitBreakerConfig) -> Self {
        Self::with_switch(provider, config, Arc::new(AtomicBool::new(true)))
    }

    /// Create a breaker controlled by a shared enable switch.
    pub fn with_switch(
        provider: &'static str,
        config: CircuitBreakerConfig,
        enabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            provider,
            circuit: Mutex::new(Circuit::new(config)),
            enabled,
        }
    }

    /// Lock the circuit mutex, recovering from poison if necessary.
    ///
    /// The worst case after a poisoned lock is a slightly stale circuit,
    /// which is better than panicking.
    fn lock_circuit(&self) -> MutexGuard<'_, Circuit> {
        self.circuit.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Ask to call the provider.
    ///
    /// Returns `None` while Open and during an in-flight HalfOpen trial.
    /// The Open -> HalfOpen transition happens here once the cooldown has
    /// elapsed; the caller that triggers it holds the trial.
    pub fn try_acquire(self: &Arc<Self>) -> Option<CircuitPermit> {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(self: &Arc<Self>, now: Instant) -> Option<CircuitPermit> {
        if !self.is_enabled() {
            return Some(CircuitPermit::new(Arc::clone(self), PermitKind::Unchecked));
        }

        let mut circuit = self.lock_circuit();
        match circuit.state {
            CircuitState::Closed => Some(CircuitPermit::new(Arc::clone(self), PermitKind::Normal)),
            CircuitState::Open => {
                let opened_at = circuit.opened_at.unwrap_or(now);
                if now.saturating_duration_since(opened_at) >= circuit.config.cooldown {
                    info!(
                        "Circuit breaker: transitioning '{}' from Open to HalfOpen",
                        self.provider
                    );
                    circuit.state = CircuitState::HalfOpen;
                    circuit.trial_in_flight = true;
                    Some(CircuitPermit::new(Arc::clone(self), PermitKind::Trial))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if circuit.trial_in_flight {
                    debug!(
                        "Circuit breaker: trial already in flight for '{}'",
                        self.provider
                    );
                    None
                } else {
                    circuit.trial_in_flight = true;
                    Some(CircuitPermit::new(Arc::clone(self), PermitKind::Trial))
                }
            }
        }
    }

    fn record_success_at(&self, trial: bool, now: Instant) {
        let mut circuit = self.lock_circuit();
        match circuit.state {
            CircuitState::HalfOpen if trial => {
                info!(
                    "Circuit breaker: trial succeeded, closing circuit for '{}'",
                    self.provider
                );
                circuit.reset();
            }
            CircuitState::Closed => {
                circuit.prune(now);
                debug!(
                    "Circuit breaker: success for '{}' ({} failures in window)",
                    self.provider,
                    circuit.failures.len()
                );
            }
            _ => {
                debug!(
                    "Circuit breaker: late success for '{}' in {} state ignored",
                    self.provider, circuit.state
                );
            }
        }
    }

    fn record_failure_at(&self, trial: bool, now: Instant) {
        let mut circuit = self.lock_circuit();
        match circuit.state {
            CircuitState::HalfOpen if trial => {
                info!(
                    "Circuit breaker: trial failed, reopening circuit for '{}'",
                    self.provider
                );
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(now);
                circuit.trial_in_flight = false;
            }
            CircuitState::Closed => {
                circuit.failures.push_back(now);
                circuit.prune(now);
                let count = circuit.failures.len() as u32;
                if count >= circuit.config.failure_threshold {
                    info!(
                        "Circuit breaker: opening circuit for '{}' after {} failures",
                        self.provider, count
                    );
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(now);
                } else {
                    debug!(
                        "Circuit breaker: failure for '{}' ({}/{})",
                        self.provider, count, circuit.config.failure_threshold
                    );
                }
            }
            _ => {
                debug!(
                    "Circuit breaker: additional failure for '{}' (already {})",
                    self.provider, circuit.state
                );
            }
        }
    }

    fn release_trial(&self) {
        let mut circuit = self.lock_circuit();
        if circuit.state == CircuitState::HalfOpen && circuit.trial_in_flight {
            debug!(
                "Circuit breaker: trial for '{}' released without outcome",
                self.provider
            );
            circuit.trial_in_flight = false;
        }
    }

    /// Current state. Does not advance Open -> HalfOpen.
    pub fn state(&self) -> CircuitState {
        self.lock_circuit().state
    }

    /// Replace thresholds and timings. The state and failure log are kept.
    pub fn update_config(&self, config: CircuitBreakerConfig) {
        let mut circuit = self.lock_circuit();
        if circuit.config != config {
            debug!(
                "Circuit breaker: new settings for '{}': {:?}",
                self.provider, config
            );
            circuit.config = config;
        }
    }

    /// Reset the circuit to Closed with an empty failure window.
    pub fn reset(&self) {
        let mut circuit = self.lock_circuit();
        info!(
            "Circuit breaker: manually resetting circuit for '{}'",
            self.provider
        );
        circuit.reset();
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> CircuitSnapshot {
        let mut circuit = self.lock_circuit();
        circuit.prune(now);
        let cooldown_remaining = match (circuit.state, circuit.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                circuit
                    .config
                    .cooldown
                    .saturating_sub(now.saturating_duration_since(opened_at)),
            ),
            _ => None,
        };
        CircuitSnapshot {
            provider: self.provider.to_string(),
            state: circuit.state,
            failures_in_window: circuit.failures.len() as u32,
            threshold: circuit.config.failure_threshold,
            cooldown_remaining,
        }
    }
}

/// Read-only view of a breaker for status reporting.
#[derive(Clone, Debug, Serialize)]
pub struct CircuitSnapshot {
    pub provider: String,
    pub state: CircuitState,
    pub failures_in_window: u32,
    pub threshold: u32,
    /// Time left before a trial is allowed, only while Open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining: Option<Duration>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PermitKind {
    /// Breaker disabled: outcomes are not recorded.
    Unchecked,
    Normal,
    Trial,
}

/// Admission ticket for one provider call.
///
/// Consume it with [`succeed`](Self::succeed) or [`fail`](Self::fail). A trial
/// permit dropped without an outcome frees the trial slot so the circuit can
/// admit another trial.
#[must_use = "record the outcome with succeed() or fail()"]
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    kind: PermitKind,
    resolved: bool,
}

impl CircuitPermit {
    fn new(breaker: Arc<CircuitBreaker>, kind: PermitKind) -> Self {
        Self {
            breaker,
            kind,
            resolved: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.kind == PermitKind::Trial
    }

    pub fn succeed(self) {
        self.succeed_at(Instant::now());
    }

    pub fn succeed_at(mut self, now: Instant) {
        self.resolved = true;
        if self.kind != PermitKind::Unchecked {
            self.breaker
                .record_success_at(self.kind == PermitKind::Trial, now);
        }
    }

    pub fn fail(self) {
        self.fail_at(Instant::now());
    }

    pub fn fail_at(mut self, now: Instant) {
        self.resolved = true;
        if self.kind != PermitKind::Unchecked {
            self.breaker
                .record_failure_at(self.kind == PermitKind::Trial, now);
        }
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.resolved && self.kind == PermitKind::Trial {
            self.breaker.release_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, window_secs: u64, cooldown_secs: u64) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "TEST_PROVIDER",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                failure_window: Duration::from_secs(window_secs),
                cooldown: Duration::from_secs(cooldown_secs),
            },
        ))
    }

    fn fail_at(cb: &Arc<CircuitBreaker>, now: Instant) {
        cb.try_acquire_at(now).unwrap().fail_at(now);
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = breaker(3, 120, 120);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_some());
    }

    #[test]
    fn test_circuit_opens_at_threshold_within_window() {
        let cb = breaker(3, 120, 120);
        let t0 = Instant::now();

        fail_at(&cb, t0);
        fail_at(&cb, t0 + Duration::from_secs(10));
        assert_eq!(cb.state(), CircuitState::Closed);

        fail_at(&cb, t0 + Duration::from_secs(20));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire_at(t0 + Duration::from_secs(21)).is_none());
    }

    #[test]
    fn test_failures_spread_across_window_do_not_open() {
        let cb = breaker(3, 120, 120);
        let t0 = Instant::now();

        fail_at(&cb, t0);
        fail_at(&cb, t0 + Duration::from_secs(100));
        // The first failure has aged out by now
        fail_at(&cb, t0 + Duration::from_secs(125));

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(
            cb.snapshot_at(t0 + Duration::from_secs(125))
                .failures_in_window,
            2
        );
    }

    #[test]
    fn test_success_in_closed_keeps_window() {
        let cb = breaker(3, 120, 120);
        let t0 = Instant::now();

        fail_at(&cb, t0);
        fail_at(&cb, t0 + Duration::from_secs(1));
        cb.try_acquire_at(t0 + Duration::from_secs(2))
            .unwrap()
            .succeed_at(t0 + Duration::from_secs(2));
        fail_at(&cb, t0 + Duration::from_secs(3));

        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_cooldown_then_single_trial() {
        let cb = breaker(1, 120, 60);
        let t0 = Instant::now();
        fail_at(&cb, t0);

        assert!(cb.try_acquire_at(t0 + Duration::from_secs(59)).is_none());

        let trial = cb.try_acquire_at(t0 + Duration::from_secs(60)).unwrap();
        assert!(trial.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Everyone else is refused while the trial is out
        assert!(cb.try_acquire_at(t0 + Duration::from_secs(61)).is_none());
        assert!(cb.try_acquire_at(t0 + Duration::from_secs(62)).is_none());

        trial.succeed_at(t0 + Duration::from_secs(63));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(
            cb.snapshot_at(t0 + Duration::from_secs(63))
                .failures_in_window,
            0
        );
        assert!(cb.try_acquire_at(t0 + Duration::from_secs(64)).is_some());
    }

    #[test]
    fn test_trial_failure_reopens_with_fresh_cooldown() {
        let cb = breaker(1, 120, 60);
        let t0 = Instant::now();
        fail_at(&cb, t0);

        let trial_time = t0 + Duration::from_secs(60);
        cb.try_acquire_at(trial_time).unwrap().fail_at(trial_time);
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.try_acquire_at(trial_time + Duration::from_secs(59)).is_none());
        assert!(cb.try_acquire_at(trial_time + Duration::from_secs(60)).is_some());
    }

    #[test]
    fn test_dropped_trial_frees_slot() {
        let cb = breaker(1, 120, 60);
        let t0 = Instant::now();
        fail_at(&cb, t0);

        let trial = cb.try_acquire_at(t0 + Duration::from_secs(60)).unwrap();
        drop(trial);

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let next = cb.try_acquire_at(t0 + Duration::from_secs(61)).unwrap();
        assert!(next.is_trial());
    }

    #[test]
    fn test_open_implies_opened_at() {
        let cb = breaker(1, 120, 60);
        let t0 = Instant::now();
        fail_at(&cb, t0);

        let snapshot = cb.snapshot_at(t0 + Duration::from_secs(20));
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.cooldown_remaining, Some(Duration::from_secs(40)));
    }

    #[test]
    fn test_disabled_breaker_admits_and_records_nothing() {
        let switch = Arc::new(AtomicBool::new(false));
        let cb = Arc::new(CircuitBreaker::with_switch(
            "TEST_PROVIDER",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            Arc::clone(&switch),
        ));

        for _ in 0..5 {
            cb.try_acquire().unwrap().fail();
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        switch.store(true, Ordering::Relaxed);
        cb.try_acquire().unwrap().fail();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset_closes_circuit() {
        let cb = breaker(1, 120, 600);
        fail_at(&cb, Instant::now());
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_some());
    }

    #[test]
    fn test_update_config_keeps_state() {
        let cb = breaker(1, 120, 600);
        let t0 = Instant::now();
        fail_at(&cb, t0);

        cb.update_config(CircuitBreakerConfig {
            failure_threshold: 5,
            failure_window: Duration::from_secs(120),
            cooldown: Duration::from_secs(10),
        });

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire_at(t0 + Duration::from_secs(10)).is_some());
    }
}
