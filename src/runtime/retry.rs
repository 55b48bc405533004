// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry policies, backoff and the retry executor.
//!
//! A [`RetryPolicy`] exists per [`DependencyCategory`] and is looked up in a
//! [`PolicyTable`]. The [`RetryExecutor`] runs any async operation under a
//! policy, reporting every attempt to the [`MetricsSink`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use storefront_resilience::error::{DependencyError, ErrorKind};
//! use storefront_resilience::runtime::{
//!     DependencyCategory, MetricsSink, RetryExecutor, RetryPolicy,
//! };
//!
//! # async fn run() {
//! let policy = RetryPolicy::builder(DependencyCategory::Database)
//!     .max_attempts(3)
//!     .base_delay(Duration::from_millis(50))
//!     .ignore(ErrorKind::Validation)
//!     .build()
//!     .unwrap();
//!
//! let executor = RetryExecutor::new(Arc::new(MetricsSink::default()));
//! let total: Result<u32, _> = executor
//!     .execute("orders.total", &policy, || async { Ok::<_, DependencyError>(42) })
//!     .await;
//! assert_eq!(total.unwrap(), 42);
//! # }
//! ```

use crate::error::{AsErrorKind, ErrorKind, ResilienceError, Result, RetryError};
use crate::runtime::classifier::{Classification, ErrorClassifier};
use crate::runtime::logging::{log_at, LoggingConfig};
use crate::runtime::metrics::{AttemptOutcome, AttemptRecord, MetricsSink};
use crate::runtime::tracing::AttemptSpan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const TARGET: &str = "storefront_resilience::retry";

// =============================================================================
// Dependency categories
// =============================================================================

/// The kind of dependency a call goes to; one retry policy per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyCategory {
    /// Relational database.
    Database,
    /// Identity / token provider.
    AuthProvider,
    /// Key-value cache.
    Cache,
    /// Third-party HTTP services (payments, shipping, notifications).
    ExternalService,
}

impl DependencyCategory {
    /// Every category, in declaration order.
    pub const ALL: [DependencyCategory; 4] = [
        DependencyCategory::Database,
        DependencyCategory::AuthProvider,
        DependencyCategory::Cache,
        DependencyCategory::ExternalService,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Snake-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DependencyCategory::Database => "database",
            DependencyCategory::AuthProvider => "auth_provider",
            DependencyCategory::Cache => "cache",
            DependencyCategory::ExternalService => "external_service",
        }
    }
}

impl fmt::Display for DependencyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Retry predicates
// =============================================================================

/// Determines whether a failure kind may be retried.
pub trait RetryPredicate: Send + Sync + 'static {
    /// Returns `true` if another attempt may follow this failure.
    fn should_retry(&self, kind: ErrorKind) -> bool;
}

impl<F> RetryPredicate for F
where
    F: Fn(ErrorKind) -> bool + Send + Sync + 'static,
{
    fn should_retry(&self, kind: ErrorKind) -> bool {
        self(kind)
    }
}

/// Retries timeouts, connection resets, unavailability and rate limiting.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientErrors;

impl RetryPredicate for TransientErrors {
    fn should_retry(&self, kind: ErrorKind) -> bool {
        kind.is_transient()
    }
}

/// Never retry - fail after the first attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPredicate for NoRetry {
    fn should_retry(&self, _kind: ErrorKind) -> bool {
        false
    }
}

/// Retries an explicit set of kinds.
#[derive(Debug, Clone)]
pub struct RetryOnKinds {
    kinds: BTreeSet<ErrorKind>,
}

impl RetryOnKinds {
    /// Create a predicate that retries on the given kinds.
    pub fn new(kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }
}

impl RetryPredicate for RetryOnKinds {
    fn should_retry(&self, kind: ErrorKind) -> bool {
        self.kinds.contains(&kind)
    }
}

// =============================================================================
// Backoff
// =============================================================================

/// Exponential backoff with additive jitter.
///
/// `delay_for(n) = base * multiplier^(n-1) + U[0, that * jitter_fraction]`,
/// where `n = 1` is the wait before the second attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffStrategy {
    base_delay: Duration,
    multiplier: f64,
    jitter_fraction: f64,
    max_delay: Option<Duration>,
}

impl BackoffStrategy {
    /// Doubling backoff from `base_delay` with 10% jitter and no cap.
    #[must_use]
    pub fn exponential(base_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: 2.0,
            jitter_fraction: 0.1,
            max_delay: None,
        }
    }

    /// Set the multiplier for exponential growth.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the jitter as a fraction of the computed delay.
    #[must_use]
    pub fn with_jitter_fraction(mut self, jitter_fraction: f64) -> Self {
        self.jitter_fraction = jitter_fraction;
        self
    }

    /// Cap the exponential part of the delay.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// The delay of the first retry.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// The growth factor.
    #[must_use]
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// The jitter fraction.
    #[must_use]
    pub fn jitter_fraction(&self) -> f64 {
        self.jitter_fraction
    }

    /// The cap, if any.
    #[must_use]
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// The delay before retry number `attempt` without jitter.
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        // float-to-int casts saturate, so huge attempt numbers end at u64::MAX
        let delay = Duration::from_nanos(nanos as u64);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// The delay before retry number `attempt`, jitter included.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.jittered(self.base_delay_for(attempt), rand::random::<f64>())
    }

    fn jittered(&self, delay: Duration, sample: f64) -> Duration {
        let jitter = delay.as_nanos() as f64 * self.jitter_fraction * sample;
        delay.saturating_add(Duration::from_nanos(jitter as u64))
    }

    fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ResilienceError::Config(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..1.0).contains(&self.jitter_fraction) {
            return Err(ResilienceError::Config(format!(
                "jitter fraction must be in [0, 1), got {}",
                self.jitter_fraction
            )));
        }
        Ok(())
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(500))
    }
}

// =============================================================================
// Retry policy
// =============================================================================

/// Immutable retry policy of one dependency category.
#[derive(Clone)]
pub struct RetryPolicy {
    category: DependencyCategory,
    max_attempts: u32,
    backoff: BackoffStrategy,
    retryable: Arc<dyn RetryPredicate>,
    ignored: BTreeSet<ErrorKind>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("category", &self.category)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("ignored", &self.ignored)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Create a policy builder for a category.
    #[must_use]
    pub fn builder(category: DependencyCategory) -> RetryPolicyBuilder {
        RetryPolicyBuilder::new(category)
    }

    /// The built-in policy of a category.
    #[must_use]
    pub fn for_category(category: DependencyCategory) -> Self {
        let (attempts, base, jitter, ignored): (u32, u64, f64, &[ErrorKind]) = match category {
            DependencyCategory::Database => (
                3,
                500,
                0.1,
                &[ErrorKind::Validation, ErrorKind::NotFound, ErrorKind::Conflict],
            ),
            DependencyCategory::AuthProvider => (
                3,
                1_000,
                0.2,
                &[ErrorKind::Unauthorized, ErrorKind::Validation],
            ),
            DependencyCategory::Cache => (2, 100, 0.1, &[ErrorKind::NotFound]),
            DependencyCategory::ExternalService => (
                4,
                1_000,
                0.25,
                &[ErrorKind::Validation, ErrorKind::NotFound],
            ),
        };
        Self {
            category,
            max_attempts: attempts,
            backoff: BackoffStrategy::exponential(Duration::from_millis(base))
                .with_jitter_fraction(jitter),
            retryable: Arc::new(TransientErrors),
            ignored: ignored.iter().copied().collect(),
        }
    }

    /// The category this policy belongs to.
    #[must_use]
    pub fn category(&self) -> DependencyCategory {
        self.category
    }

    /// Maximum number of attempts, the first call included.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The backoff strategy.
    #[must_use]
    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    /// Kinds that short-circuit the loop.
    #[must_use]
    pub fn ignored(&self) -> &BTreeSet<ErrorKind> {
        &self.ignored
    }

    /// Whether `kind` is on the ignore list.
    #[must_use]
    pub fn is_ignored(&self, kind: ErrorKind) -> bool {
        self.ignored.contains(&kind)
    }

    /// Whether the predicate allows retrying `kind`.
    #[must_use]
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.should_retry(kind)
    }

    /// The jittered wait before retry number `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay_for(attempt)
    }

    /// A copy of this policy with more ignored kinds.
    #[must_use]
    pub fn with_extra_ignored(&self, kinds: &BTreeSet<ErrorKind>) -> Self {
        let mut policy = self.clone();
        policy.ignored.extend(kinds.iter().copied());
        policy
    }

    /// Start a builder pre-filled with this policy.
    #[must_use]
    pub fn to_builder(&self) -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            category: self.category,
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            retryable: self.retryable.clone(),
            ignored: self.ignored.clone(),
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryPolicyBuilder {
    category: DependencyCategory,
    max_attempts: u32,
    backoff: BackoffStrategy,
    retryable: Arc<dyn RetryPredicate>,
    ignored: BTreeSet<ErrorKind>,
}

impl RetryPolicyBuilder {
    /// Create a builder with 3 attempts, 500ms doubling backoff and transient retries.
    #[must_use]
    pub fn new(category: DependencyCategory) -> Self {
        Self {
            category,
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
            retryable: Arc::new(TransientErrors),
            ignored: BTreeSet::new(),
        }
    }

    /// Set the maximum number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Replace the backoff strategy.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the first retry delay.
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.backoff.base_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.backoff.multiplier = multiplier;
        self
    }

    /// Set the jitter fraction.
    #[must_use]
    pub fn jitter_fraction(mut self, fraction: f64) -> Self {
        self.backoff.jitter_fraction = fraction;
        self
    }

    /// Cap the exponential delay.
    #[must_use]
    pub fn max_delay(mut self, cap: Duration) -> Self {
        self.backoff.max_delay = Some(cap);
        self
    }

    /// Set the retry predicate.
    #[must_use]
    pub fn retry_on<P: RetryPredicate>(mut self, predicate: P) -> Self {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Retry only the given kinds.
    #[must_use]
    pub fn retry_on_kinds(self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retry_on(RetryOnKinds::new(kinds))
    }

    /// Add a kind to the ignore list.
    #[must_use]
    pub fn ignore(mut self, kind: ErrorKind) -> Self {
        self.ignored.insert(kind);
        self
    }

    /// Replace the ignore list.
    #[must_use]
    pub fn ignored(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.ignored = kinds.into_iter().collect();
        self
    }

    /// Build the policy.
    ///
    /// # Errors
    ///
    /// Returns `ResilienceError::Config` if `max_attempts` is zero, the
    /// multiplier is below 1.0 or the jitter fraction is outside `[0, 1)`.
    pub fn build(self) -> Result<RetryPolicy> {
        if self.max_attempts == 0 {
            return Err(ResilienceError::Config(format!(
                "{} policy: max_attempts must be >= 1",
                self.category
            )));
        }
        self.backoff.validate()?;
        Ok(RetryPolicy {
            category: self.category,
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            retryable: self.retryable,
            ignored: self.ignored,
        })
    }
}

// =============================================================================
// Policy table
// =============================================================================

/// One retry policy per dependency category.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: [RetryPolicy; 4],
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            policies: DependencyCategory::ALL.map(RetryPolicy::for_category),
        }
    }
}

impl PolicyTable {
    /// Create a table with the built-in policies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the policy of the category `policy` belongs to.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.set(policy);
        self
    }

    /// Replace the policy of the category `policy` belongs to.
    pub fn set(&mut self, policy: RetryPolicy) {
        let index = policy.category.index();
        self.policies[index] = policy;
    }

    /// The policy of a category.
    #[must_use]
    pub fn get(&self, category: DependencyCategory) -> &RetryPolicy {
        &self.policies[category.index()]
    }

    /// All policies, in category order.
    pub fn iter(&self) -> impl Iterator<Item = &RetryPolicy> {
        self.policies.iter()
    }
}

// =============================================================================
// Retry executor
// =============================================================================

/// Runs operations under a [`RetryPolicy`] and reports every attempt.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    metrics: Arc<MetricsSink>,
    logging: LoggingConfig,
    classifier: ErrorClassifier,
}

impl RetryExecutor {
    /// Create an executor reporting to `metrics`.
    #[must_use]
    pub fn new(metrics: Arc<MetricsSink>) -> Self {
        Self {
            metrics,
            logging: LoggingConfig::default(),
            classifier: ErrorClassifier,
        }
    }

    /// Set the log levels of retry events.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// The sink attempts are reported to.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsSink> {
        &self.metrics
    }

    /// Execute an async operation with retry logic.
    ///
    /// # Errors
    ///
    /// - `RetryError::Ignored` with the original error if its kind is ignored.
    /// - `RetryError::Exhausted` when no further attempt is allowed.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: AsErrorKind + fmt::Display,
    {
        self.run(operation, policy, None, op).await
    }

    /// Like [`execute`](Self::execute), but checks `cancel` before every attempt.
    ///
    /// # Errors
    ///
    /// Additionally returns `RetryError::Cancelled` once `cancel` fires.
    pub async fn execute_with_cancel<T, E, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: AsErrorKind + fmt::Display,
    {
        self.run(operation, policy, Some(cancel), op).await
    }

    /// Like [`execute`](Self::execute), but returns `default` instead of an
    /// exhausted error. Ignored errors are still returned.
    ///
    /// # Errors
    ///
    /// Returns `RetryError::Ignored` for ignored kinds.
    pub async fn execute_or<T, E, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        default: T,
        op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: AsErrorKind + fmt::Display,
    {
        let result = self.run(operation, policy, None, op).await;
        self.fallback(result, default)
    }

    /// Swap an exhausted error for `default`, logging the swallowed error.
    pub(crate) fn fallback<T, E: fmt::Display>(
        &self,
        result: std::result::Result<T, RetryError<E>>,
        default: T,
    ) -> std::result::Result<T, RetryError<E>> {
        match result {
            Err(RetryError::Exhausted {
                operation,
                attempts,
                source,
            }) => {
                log_at!(
                    self.logging.fallback_level,
                    target: TARGET,
                    operation = %operation,
                    attempts,
                    error = %source,
                    "retries exhausted, returning fallback value"
                );
                Ok(default)
            }
            other => other,
        }
    }

    pub(crate) async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        cancel: Option<&CancellationToken>,
        mut op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: AsErrorKind + fmt::Display,
    {
        let category = policy.category();
        let first_start = Instant::now();
        let mut attempt: u32 = 1;

        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                let completed = attempt - 1;
                self.metrics.record_cancelled(operation, completed);
                log_at!(
                    self.logging.cancelled_level,
                    target: TARGET,
                    operation,
                    attempts = completed,
                    "operation cancelled between attempts"
                );
                return Err(RetryError::Cancelled {
                    operation: operation.to_string(),
                    attempts: completed,
                });
            }

            let span = AttemptSpan::new(operation, category, attempt);
            let started_at = SystemTime::now();
            let start = Instant::now();
            let result = op().instrument(span.span().clone()).await;
            let duration = start.elapsed();

            let error = match result {
                Ok(value) => {
                    span.record_success(duration);
                    self.metrics.record_attempt(&AttemptRecord {
                        operation,
                        category,
                        attempt,
                        started_at,
                        outcome: AttemptOutcome::Success,
                        error_kind: None,
                        duration,
                    });
                    if attempt > 1 {
                        let elapsed = first_start.elapsed();
                        self.metrics.record_retry_success(operation, attempt, elapsed);
                        log_at!(
                            self.logging.success_level,
                            target: TARGET,
                            operation,
                            attempts = attempt,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let kind = error.error_kind();
            let mut record = AttemptRecord {
                operation,
                category,
                attempt,
                started_at,
                outcome: AttemptOutcome::Failure,
                error_kind: Some(kind),
                duration,
            };

            match self.classifier.classify(kind, policy, attempt) {
                Classification::Ignore => {
                    span.record_failure(kind, "ignored", duration);
                    record.outcome = AttemptOutcome::Ignored;
                    self.metrics.record_attempt(&record);
                    log_at!(
                        self.logging.ignored_level,
                        target: TARGET,
                        operation,
                        attempt,
                        error.kind = %kind,
                        "ignored error, not retrying"
                    );
                    return Err(RetryError::Ignored(error));
                }
                Classification::Fatal => {
                    span.record_failure(kind, "exhausted", duration);
                    self.metrics.record_attempt(&record);
                    self.metrics.record_exhausted(operation, attempt, kind);
                    log_at!(
                        self.logging.exhausted_level,
                        target: TARGET,
                        operation,
                        attempts = attempt,
                        error.kind = %kind,
                        error = %error,
                        "operation failed, no attempts left"
                    );
                    return Err(RetryError::Exhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: error,
                    });
                }
                Classification::Retry => {
                    span.record_failure(kind, "retry", duration);
                    self.metrics.record_attempt(&record);
                    let delay = policy.delay_for(attempt);
                    log_at!(
                        self.logging.retry_level,
                        target: TARGET,
                        operation,
                        attempt,
                        max_attempts = policy.max_attempts(),
                        error.kind = %kind,
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DependencyError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter(category: DependencyCategory, attempts: u32, base_ms: u64) -> RetryPolicy {
        RetryPolicy::builder(category)
            .max_attempts(attempts)
            .base_delay(Duration::from_millis(base_ms))
            .jitter_fraction(0.0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_backoff_without_jitter() {
        let backoff =
            BackoffStrategy::exponential(Duration::from_millis(100)).with_jitter_fraction(0.0);

        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let backoff = BackoffStrategy::exponential(Duration::from_millis(500))
            .with_multiplier(2.0)
            .with_jitter_fraction(0.5);

        for attempt in 1..=8 {
            let floor = Duration::from_millis(500) * 2u32.pow(attempt - 1);
            let ceiling = floor.mul_f64(1.5);
            for _ in 0..50 {
                let delay = backoff.delay_for(attempt);
                assert!(delay >= floor, "attempt {attempt}: {delay:?} < {floor:?}");
                assert!(delay <= ceiling, "attempt {attempt}: {delay:?} > {ceiling:?}");
            }
        }
    }

    #[test]
    fn test_backoff_jitter_extremes() {
        let backoff =
            BackoffStrategy::exponential(Duration::from_millis(200)).with_jitter_fraction(0.25);
        let base = backoff.base_delay_for(1);
        assert_eq!(backoff.jittered(base, 0.0), Duration::from_millis(200));
        assert_eq!(backoff.jittered(base, 1.0), Duration::from_millis(250));
    }

    #[test]
    fn test_backoff_cap_and_saturation() {
        let capped = BackoffStrategy::exponential(Duration::from_millis(100))
            .with_jitter_fraction(0.0)
            .with_max_delay(Duration::from_millis(500));
        assert_eq!(capped.delay_for(10), Duration::from_millis(500));

        let uncapped =
            BackoffStrategy::exponential(Duration::from_secs(1)).with_jitter_fraction(0.0);
        assert_eq!(uncapped.delay_for(u32::MAX), Duration::from_nanos(u64::MAX));
    }

    #[test]
    fn test_policy_builder_validation() {
        let zero = RetryPolicy::builder(DependencyCategory::Cache)
            .max_attempts(0)
            .build();
        assert!(matches!(zero, Err(ResilienceError::Config(_))));

        let shrinking = RetryPolicy::builder(DependencyCategory::Cache)
            .multiplier(0.5)
            .build();
        assert!(shrinking.is_err());

        let full_jitter = RetryPolicy::builder(DependencyCategory::Cache)
            .jitter_fraction(1.0)
            .build();
        assert!(full_jitter.is_err());
    }

    #[test]
    fn test_policy_predicates() {
        let policy = RetryPolicy::builder(DependencyCategory::ExternalService)
            .retry_on(|kind: ErrorKind| kind == ErrorKind::RateLimited)
            .build()
            .unwrap();
        assert!(policy.is_retryable(ErrorKind::RateLimited));
        assert!(!policy.is_retryable(ErrorKind::Timeout));

        let never = RetryPolicy::builder(DependencyCategory::ExternalService)
            .retry_on(NoRetry)
            .build()
            .unwrap();
        assert!(!never.is_retryable(ErrorKind::Timeout));

        let kinds = RetryPolicy::builder(DependencyCategory::Database)
            .retry_on_kinds([ErrorKind::Conflict])
            .build()
            .unwrap();
        assert!(kinds.is_retryable(ErrorKind::Conflict));
        assert!(!kinds.is_retryable(ErrorKind::Unavailable));
    }

    #[test]
    fn test_policy_table_defaults() {
        let table = PolicyTable::new();
        for category in DependencyCategory::ALL {
            assert_eq!(table.get(category).category(), category);
        }
        assert_eq!(table.get(DependencyCategory::Database).max_attempts(), 3);
        assert_eq!(table.get(DependencyCategory::Cache).max_attempts(), 2);
        assert!(table
            .get(DependencyCategory::Database)
            .is_ignored(ErrorKind::Validation));

        let table = table.with_policy(no_jitter(DependencyCategory::Cache, 5, 10));
        assert_eq!(table.get(DependencyCategory::Cache).max_attempts(), 5);
        assert_eq!(table.get(DependencyCategory::Database).max_attempts(), 3);
    }

    #[test]
    fn test_with_extra_ignored() {
        let policy = RetryPolicy::for_category(DependencyCategory::Cache);
        let extra: BTreeSet<_> = [ErrorKind::Timeout].into_iter().collect();
        let merged = policy.with_extra_ignored(&extra);
        assert!(merged.is_ignored(ErrorKind::Timeout));
        assert!(merged.is_ignored(ErrorKind::NotFound));
        assert!(!policy.is_ignored(ErrorKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_invokes_exactly_max_attempts() {
        for max in 1..=5 {
            let metrics = Arc::new(MetricsSink::default());
            let executor = RetryExecutor::new(metrics.clone());
            let policy = no_jitter(DependencyCategory::Database, max, 10);
            let calls = AtomicU32::new(0);

            let result: std::result::Result<(), _> = executor
                .execute("orders.load", &policy, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(DependencyError::unavailable("db down")) }
                })
                .await;

            assert_eq!(calls.load(Ordering::SeqCst), max);
            match result {
                Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, max),
                other => panic!("unexpected result: {other:?}"),
            }
            let snapshot = metrics.snapshot("orders.load");
            assert_eq!(snapshot.attempts, u64::from(max));
            assert_eq!(snapshot.exhausted, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_error_single_attempt() {
        let metrics = Arc::new(MetricsSink::default());
        let executor = RetryExecutor::new(metrics.clone());
        let policy = RetryPolicy::builder(DependencyCategory::Database)
            .max_attempts(10)
            .ignore(ErrorKind::Validation)
            .build()
            .unwrap();
        let calls = AtomicU32::new(0);

        let result: std::result::Result<(), _> = executor
            .execute("orders.create", &policy, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DependencyError::validation("quantity must be positive")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(RetryError::Ignored(e)) => assert_eq!(e.message(), "quantity must be positive"),
            other => panic!("unexpected result: {other:?}"),
        }
        let snapshot = metrics.snapshot("orders.create");
        assert_eq!(snapshot.ignored, 1);
        assert_eq!(snapshot.exhausted, 0);
        assert_eq!(snapshot.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retry_scenario() {
        let metrics = Arc::new(MetricsSink::default());
        let executor = RetryExecutor::new(metrics.clone());
        let policy = RetryPolicy::builder(DependencyCategory::Database)
            .max_attempts(3)
            .base_delay(Duration::from_millis(500))
            .multiplier(2.0)
            .build()
            .unwrap();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = executor
            .execute("inventory.reserve", &policy, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(DependencyError::timeout("lock wait"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert!(start.elapsed() >= Duration::from_millis(1500));

        let snapshot = metrics.snapshot("inventory.reserve");
        assert_eq!(snapshot.attempts, 3);
        assert_eq!(snapshot.failures, 2);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.successes_after_retry, 1);
        assert_eq!(snapshot.retry_success_attempts, 3);
        assert!(snapshot.retry_success_elapsed_ms >= 1500);
        assert_eq!(snapshot.failures_by_kind.get(&ErrorKind::Timeout), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_fallback_returns_default() {
        let metrics = Arc::new(MetricsSink::default());
        let executor = RetryExecutor::new(metrics.clone());
        let policy = no_jitter(DependencyCategory::Cache, 2, 10);

        let result = executor
            .execute_or("recommendations.fetch", &policy, Vec::<u32>::new(), || async {
                Err::<Vec<u32>, _>(DependencyError::timeout("cache"))
            })
            .await;

        assert_eq!(result.unwrap(), Vec::<u32>::new());
        let snapshot = metrics.snapshot("recommendations.fetch");
        assert_eq!(snapshot.attempts, 2);
        assert_eq!(snapshot.exhausted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_fallback_keeps_ignored_errors() {
        let executor = RetryExecutor::new(Arc::new(MetricsSink::default()));
        let policy = RetryPolicy::builder(DependencyCategory::Cache)
            .ignore(ErrorKind::NotFound)
            .build()
            .unwrap();

        let result = executor
            .execute_or("session.get", &policy, 0u32, || async {
                Err::<u32, _>(DependencyError::new(ErrorKind::NotFound, "no session"))
            })
            .await;

        assert!(matches!(result, Err(RetryError::Ignored(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_between_attempts() {
        let metrics = Arc::new(MetricsSink::default());
        let executor = RetryExecutor::new(metrics.clone());
        let policy = no_jitter(DependencyCategory::ExternalService, 5, 100);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: std::result::Result<(), _> = executor
            .execute_with_cancel("shipping.quote", &policy, &cancel, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 2 {
                    cancel.cancel();
                }
                async { Err(DependencyError::unavailable("carrier api")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result {
            Err(RetryError::Cancelled { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("unexpected result: {other:?}"),
        }
        let snapshot = metrics.snapshot("shipping.quote");
        assert_eq!(snapshot.cancelled, 1);
        assert_eq!(snapshot.exhausted, 0);
    }

    #[tokio::test]
    async fn test_first_attempt_success_records_no_retry() {
        let metrics = Arc::new(MetricsSink::default());
        let executor = RetryExecutor::new(metrics.clone());
        let policy = RetryPolicy::for_category(DependencyCategory::Cache);

        let result = executor
            .execute("catalog.get", &policy, || async {
                Ok::<_, DependencyError>("sku-1")
            })
            .await;

        assert_eq!(result.unwrap(), "sku-1");
        let snapshot = metrics.snapshot("catalog.get");
        assert_eq!(snapshot.attempts, 1);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.successes_after_retry, 0);
        assert_eq!(snapshot.category, Some(DependencyCategory::Cache));
    }
}
