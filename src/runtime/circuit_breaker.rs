// SPDX-License-Identifier: MIT OR Apache-2.0

//! Circuit breaker pattern implementation for guarded dependency calls.
//!
//! The circuit breaker prevents cascading failures by temporarily stopping
//! calls to a failing dependency and allowing it to recover.
//!
//! # States
//!
//! - **Closed**: Normal operation, calls pass through and their outcomes fill
//!   a count-based sliding window
//! - **Open**: Calls immediately fail with [`CircuitOpenError`]
//! - **Half-Open**: A limited number of trial calls test whether the
//!   dependency has recovered
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use storefront_resilience::runtime::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//!
//! let config = CircuitBreakerConfig::default()
//!     .with_failure_rate_threshold(50.0)
//!     .with_minimum_calls(2)
//!     .with_wait_duration_in_open(Duration::from_secs(30));
//!
//! let breaker = CircuitBreaker::new("payment", config);
//!
//! breaker.try_acquire().unwrap().record_failure();
//! breaker.try_acquire().unwrap().record_failure();
//!
//! assert_eq!(breaker.state(), CircuitState::Open);
//! assert!(breaker.try_acquire().is_err());
//! ```

use crate::error::{CircuitOpenError, ResilienceError, Result};
use crate::runtime::DependencyCategory;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;

const TARGET: &str = "storefront_resilience::circuit";
const ADMIN_TARGET: &str = "storefront_resilience::admin";

/// Transitions buffered for a slow consumer before new ones are dropped.
pub const TRANSITION_CHANNEL_CAPACITY: usize = 256;

/// Name of the auth provider breaker.
pub const AUTH_PROVIDER_CIRCUIT: &str = "auth-provider";
/// Name of the payment gateway breaker.
pub const PAYMENT_CIRCUIT: &str = "payment";
/// Name of the notification service breaker.
pub const NOTIFICATION_CIRCUIT: &str = "notification";

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally.
    Closed,
    /// Circuit is open, calls fail immediately.
    Open,
    /// Circuit is half-open, testing if the dependency has recovered.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure rate, in percent, at or above which the circuit opens.
    pub failure_rate_threshold: f64,
    /// Number of most recent outcomes kept in the window.
    pub sliding_window_size: usize,
    /// Outcomes required before the failure rate is evaluated.
    pub minimum_calls: usize,
    /// Duration to wait before transitioning from open to half-open.
    #[serde(with = "humantime_serde")]
    pub wait_duration_in_open: Duration,
    /// Trial calls admitted while half-open.
    pub permitted_calls_in_half_open: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_size: 10,
            minimum_calls: 5,
            wait_duration_in_open: Duration::from_secs(30),
            permitted_calls_in_half_open: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure rate threshold (percent).
    #[must_use]
    pub fn with_failure_rate_threshold(mut self, percent: f64) -> Self {
        self.failure_rate_threshold = percent;
        self
    }

    /// Set the sliding window size.
    #[must_use]
    pub fn with_sliding_window_size(mut self, size: usize) -> Self {
        self.sliding_window_size = size;
        self
    }

    /// Set the minimum number of calls.
    #[must_use]
    pub fn with_minimum_calls(mut self, calls: usize) -> Self {
        self.minimum_calls = calls;
        self
    }

    /// Set the wait duration in the open state.
    #[must_use]
    pub fn with_wait_duration_in_open(mut self, wait: Duration) -> Self {
        self.wait_duration_in_open = wait;
        self
    }

    /// Set the number of half-open trial calls.
    #[must_use]
    pub fn with_permitted_calls_in_half_open(mut self, calls: u32) -> Self {
        self.permitted_calls_in_half_open = calls;
        self
    }

    /// Check the configuration for values the state machine cannot use.
    ///
    /// # Errors
    ///
    /// Returns `ResilienceError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 100.0) {
            return Err(ResilienceError::Config(format!(
                "failure_rate_threshold must be in (0, 100], got {}",
                self.failure_rate_threshold
            )));
        }
        if self.sliding_window_size == 0 {
            return Err(ResilienceError::Config(
                "sliding_window_size must be >= 1".to_string(),
            ));
        }
        if self.minimum_calls == 0 {
            return Err(ResilienceError::Config(
                "minimum_calls must be >= 1".to_string(),
            ));
        }
        if self.permitted_calls_in_half_open == 0 {
            return Err(ResilienceError::Config(
                "permitted_calls_in_half_open must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    fn effective_minimum_calls(&self) -> usize {
        self.minimum_calls.clamp(1, self.sliding_window_size.max(1))
    }
}

/// A state change, pushed to the alert dispatcher for the edges that matter
/// (into OPEN, and HALF_OPEN back to CLOSED).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitTransition {
    pub circuit: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: SystemTime,
    /// Caused by an operator rather than by call outcomes.
    pub forced: bool,
}

/// Publishes breaker transitions to the current consumer, if any.
///
/// Nothing is buffered while no consumer is subscribed. A full channel drops
/// the transition with a warning instead of blocking the breaker.
#[derive(Debug, Default)]
pub struct TransitionSink {
    sender: RwLock<Option<mpsc::Sender<CircuitTransition>>>,
}

impl TransitionSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new bounded channel and make it the only consumer.
    ///
    /// A previous consumer's channel is closed.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<CircuitTransition> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        *self.sender.write().unwrap_or_else(PoisonError::into_inner) = Some(sender);
        receiver
    }

    /// Whether a consumer is currently listening.
    #[must_use]
    pub fn has_subscriber(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    /// Hand a transition to the consumer. Returns `false` if it was dropped.
    pub fn publish(&self, transition: CircuitTransition) -> bool {
        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            tracing::trace!(
                target: TARGET,
                circuit = %transition.circuit,
                "no transition consumer"
            );
            return false;
        };
        match sender.try_send(transition) {
            Ok(()) => true,
            Err(TrySendError::Full(transition)) => {
                tracing::warn!(
                    target: TARGET,
                    circuit = %transition.circuit,
                    to = %transition.to,
                    "transition channel full, notification dropped"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Transition counters of one breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionCounts {
    pub opened: u64,
    pub half_opened: u64,
    pub closed: u64,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    /// Failure rate of the window in percent; 0.0 while the window is empty.
    pub failure_rate: f64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    /// How long the circuit has been open.
    #[serde(with = "humantime_serde")]
    pub open_for: Option<Duration>,
    pub forced: bool,
    pub transitions: TransitionCounts,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// `true` marks a failure.
    window: VecDeque<bool>,
    failures: usize,
    opened_at: Option<Instant>,
    forced: bool,
    generation: u64,
}

impl Inner {
    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.failures as f64 * 100.0 / self.window.len() as f64
        }
    }

    fn push(&mut self, failure: bool, capacity: usize) {
        if self.window.len() == capacity {
            if let Some(true) = self.window.pop_front() {
                self.failures -= 1;
            }
        }
        self.window.push_back(failure);
        if failure {
            self.failures += 1;
        }
    }

    fn clear_window(&mut self) {
        self.window.clear();
        self.failures = 0;
    }
}

/// Circuit breaker guarding one dependency.
///
/// State and window live behind one mutex that is never held across an
/// `.await`. Half-open trial slots are handed out by compare-and-swap on an
/// atomic counter.
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    half_open_permits: AtomicU32,
    opened: AtomicU64,
    half_opened: AtomicU64,
    closed: AtomicU64,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
    events: OnceLock<Arc<TransitionSink>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: Arc::from(name.into()),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                failures: 0,
                opened_at: None,
                forced: false,
                generation: 0,
            }),
            half_open_permits: AtomicU32::new(0),
            opened: AtomicU64::new(0),
            half_opened: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            events: OnceLock::new(),
        }
    }

    /// Create a circuit breaker with default configuration.
    #[must_use]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Publish transitions into OPEN and HALF_OPEN→CLOSED to `events`.
    ///
    /// Only the first sink attached is kept.
    pub fn attach_events(&self, events: Arc<TransitionSink>) {
        let _ = self.events.set(events);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The breaker's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the circuit breaker configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current circuit state.
    ///
    /// An OPEN circuit whose wait has elapsed is still reported OPEN; the
    /// move to HALF_OPEN happens on the next [`try_acquire`](Self::try_acquire).
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Ask to make a call.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitOpenError`] while the circuit is open, or while it is
    /// half-open and every trial slot is taken.
    pub fn try_acquire(&self) -> std::result::Result<CallPermit<'_>, CircuitOpenError> {
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner.opened_at.map(|at| at.elapsed());
            let waited = elapsed.is_some_and(|e| e >= self.config.wait_duration_in_open);
            if inner.forced || !waited {
                let retry_after = if inner.forced {
                    None
                } else {
                    elapsed.map(|e| self.config.wait_duration_in_open.saturating_sub(e))
                };
                return Err(self.reject(retry_after));
            }
            self.transition(&mut inner, CircuitState::HalfOpen, false);
        }

        let trial = inner.state == CircuitState::HalfOpen;
        if trial
            && self
                .half_open_permits
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_err()
        {
            return Err(self.reject(None));
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        Ok(CallPermit {
            breaker: self,
            generation: inner.generation,
            trial,
            settled: false,
        })
    }

    fn reject(&self, retry_after: Option<Duration>) -> CircuitOpenError {
        self.total_rejections.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: TARGET, circuit = %self.name, "call rejected");
        CircuitOpenError::new(self.name.clone(), retry_after)
    }

    fn on_outcome(&self, generation: u64, failure: bool) {
        if failure {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut inner = self.lock();
        if inner.generation != generation {
            // admitted under an earlier state
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.push(failure, self.config.sliding_window_size.max(1));
                if inner.window.len() >= self.config.effective_minimum_calls()
                    && inner.failure_rate() >= self.config.failure_rate_threshold
                {
                    self.transition(&mut inner, CircuitState::Open, false);
                }
            }
            CircuitState::HalfOpen => {
                let to = if failure {
                    CircuitState::Open
                } else {
                    CircuitState::Closed
                };
                self.transition(&mut inner, to, false);
            }
            CircuitState::Open => {}
        }
    }

    fn release_trial(&self, generation: u64) {
        let inner = self.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            self.half_open_permits.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, forced: bool) {
        let from = inner.state;
        let failure_rate = inner.failure_rate();
        inner.state = to;
        inner.generation += 1;
        inner.forced = forced && to == CircuitState::Open;

        match to {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                self.opened.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target: TARGET,
                    circuit = %self.name,
                    %from,
                    %to,
                    failure_rate,
                    forced,
                    "circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                self.half_open_permits
                    .store(self.config.permitted_calls_in_half_open, Ordering::Release);
                self.half_opened.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    target: TARGET,
                    circuit = %self.name,
                    %from,
                    %to,
                    "circuit half-open"
                );
            }
            CircuitState::Closed => {
                inner.clear_window();
                inner.opened_at = None;
                self.closed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    target: TARGET,
                    circuit = %self.name,
                    %from,
                    %to,
                    forced,
                    "circuit closed"
                );
            }
        }

        let notify = to == CircuitState::Open
            || (from == CircuitState::HalfOpen && to == CircuitState::Closed);
        if notify {
            if let Some(events) = self.events.get() {
                events.publish(CircuitTransition {
                    circuit: self.name.to_string(),
                    from,
                    to,
                    at: SystemTime::now(),
                    forced,
                });
            }
        }
    }

    /// Force the circuit CLOSED and clear the window.
    ///
    /// Returns `true` if the state changed. Resetting a closed circuit only
    /// clears its window.
    pub fn reset(&self, actor: &str) -> bool {
        let mut inner = self.lock();
        if inner.state == CircuitState::Closed {
            inner.clear_window();
            tracing::info!(
                target: ADMIN_TARGET,
                circuit = %self.name,
                actor,
                "reset: already closed"
            );
            return false;
        }
        tracing::warn!(
            target: ADMIN_TARGET,
            circuit = %self.name,
            actor,
            from = %inner.state,
            "reset"
        );
        self.transition(&mut inner, CircuitState::Closed, true);
        true
    }

    /// Force the circuit OPEN until the next [`reset`](Self::reset).
    ///
    /// Returns `true` if the state changed.
    pub fn force_open(&self, actor: &str) -> bool {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            inner.forced = true;
            tracing::info!(
                target: ADMIN_TARGET,
                circuit = %self.name,
                actor,
                "force open: already open"
            );
            return false;
        }
        tracing::warn!(
            target: ADMIN_TARGET,
            circuit = %self.name,
            actor,
            from = %inner.state,
            "force open"
        );
        self.transition(&mut inner, CircuitState::Open, true);
        true
    }

    /// How long the circuit has been OPEN, if it is.
    #[must_use]
    pub fn open_duration(&self) -> Option<Duration> {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open => inner.opened_at.map(|at| at.elapsed()),
            _ => None,
        }
    }

    /// Get failure rate of the window in percent.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        self.lock().failure_rate()
    }

    /// Transition counters.
    #[must_use]
    pub fn transition_counts(&self) -> TransitionCounts {
        TransitionCounts {
            opened: self.opened.load(Ordering::Relaxed),
            half_opened: self.half_opened.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }

    /// Get total number of admitted calls.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Get total number of recorded failures.
    #[must_use]
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Get total number of rejections.
    #[must_use]
    pub fn total_rejections(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }

    /// Point-in-time view of the breaker.
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        let failed = inner.failures as u64;
        CircuitSnapshot {
            name: self.name.to_string(),
            state: inner.state,
            failure_rate: inner.failure_rate(),
            successful_calls: inner.window.len() as u64 - failed,
            failed_calls: failed,
            open_for: match inner.state {
                CircuitState::Open => inner.opened_at.map(|at| at.elapsed()),
                _ => None,
            },
            forced: inner.forced,
            transitions: self.transition_counts(),
        }
    }
}

/// Permission to make one call through a [`CircuitBreaker`].
///
/// Record the outcome with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). Dropping the permit without
/// recording leaves the window untouched and returns a half-open trial slot.
#[must_use = "a permit records nothing unless its outcome is reported"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl fmt::Debug for CallPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("circuit", &self.breaker.name())
            .field("trial", &self.trial)
            .finish()
    }
}

impl CallPermit<'_> {
    /// Whether this is a half-open trial call.
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Record a successful call.
    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_outcome(self.generation, false);
    }

    /// Record a failed call.
    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_outcome(self.generation, true);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial(self.generation);
        }
    }
}

/// The named breakers of the process, one instance per dependency.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: BTreeMap<String, Arc<CircuitBreaker>>,
    events: Arc<TransitionSink>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            breakers: BTreeMap::new(),
            events: Arc::new(TransitionSink::new()),
        }
    }

    /// The default breaker configurations: auth-provider, payment and
    /// notification.
    #[must_use]
    pub fn default_configs() -> Vec<(String, CircuitBreakerConfig)> {
        vec![
            (
                AUTH_PROVIDER_CIRCUIT.to_string(),
                CircuitBreakerConfig::default(),
            ),
            (
                PAYMENT_CIRCUIT.to_string(),
                CircuitBreakerConfig::default()
                    .with_wait_duration_in_open(Duration::from_secs(60))
                    .with_sliding_window_size(20)
                    .with_minimum_calls(10),
            ),
            (
                NOTIFICATION_CIRCUIT.to_string(),
                CircuitBreakerConfig::default().with_failure_rate_threshold(60.0),
            ),
        ]
    }

    /// Create a registry holding the default breakers.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (name, config) in Self::default_configs() {
            let breaker = Arc::new(CircuitBreaker::new(name.clone(), config));
            breaker.attach_events(registry.events.clone());
            registry.breakers.insert(name, breaker);
        }
        registry
    }

    /// Register a new breaker.
    ///
    /// # Errors
    ///
    /// Returns `ResilienceError::Config` if the name is taken or the
    /// configuration is invalid.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<Arc<CircuitBreaker>> {
        let name = name.into();
        Self::check_name(&name)?;
        config
            .validate()
            .map_err(|e| ResilienceError::Config(format!("circuit `{name}`: {e}")))?;
        if self.breakers.contains_key(&name) {
            return Err(ResilienceError::Config(format!(
                "circuit `{name}` registered twice"
            )));
        }
        let breaker = Arc::new(CircuitBreaker::new(name.clone(), config));
        breaker.attach_events(self.events.clone());
        self.breakers.insert(name, breaker.clone());
        Ok(breaker)
    }

    /// Reject names the health report cannot key a breaker under: empty
    /// names and dependency category names.
    ///
    /// # Errors
    ///
    /// Returns `ResilienceError::Config` for such a name.
    pub fn check_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ResilienceError::Config("circuit name must not be empty".into()));
        }
        if DependencyCategory::ALL.iter().any(|c| c.to_string() == name) {
            return Err(ResilienceError::Config(format!(
                "circuit `{name}` clashes with a dependency category name"
            )));
        }
        Ok(())
    }

    /// Look up a breaker.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }

    /// Look up a breaker that must exist.
    ///
    /// # Errors
    ///
    /// Returns `ResilienceError::UnknownCircuit` if it does not.
    pub fn require(&self, name: &str) -> Result<Arc<CircuitBreaker>> {
        self.get(name)
            .ok_or_else(|| ResilienceError::UnknownCircuit(name.to_string()))
    }

    /// All breakers, by name.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CircuitBreaker>> {
        self.breakers.values()
    }

    /// Number of breakers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Snapshots of every breaker.
    #[must_use]
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        self.breakers.values().map(|b| b.snapshot()).collect()
    }

    /// Start receiving the transitions of every breaker in the registry.
    ///
    /// Replaces the previous consumer, whose receiver then sees the channel
    /// closed. Transitions made while nobody is subscribed are not kept.
    pub fn subscribe_transitions(&self) -> mpsc::Receiver<CircuitTransition> {
        self.events.subscribe(TRANSITION_CHANNEL_CAPACITY)
    }

    /// The sink shared by the registry's breakers.
    #[must_use]
    pub fn transition_sink(&self) -> &Arc<TransitionSink> {
        &self.events
    }
}
