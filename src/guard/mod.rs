// SPDX-License-Identifier: MIT OR Apache-2.0

//! The process-wide entry point for guarded dependency calls.
//!
//! A [`Resilience`] owns the policy table, the circuit breakers and the
//! metrics sink. Call sites describe themselves with a [`CallSite`] and hand
//! the fallible operation to [`Resilience::call`]:
//!
//! ```no_run
//! use storefront_resilience::error::{DependencyError, ErrorKind};
//! use storefront_resilience::guard::Resilience;
//! use storefront_resilience::runtime::{DependencyCategory, PAYMENT_CIRCUIT};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let resilience = Resilience::new();
//! let site = resilience
//!     .site_with_circuit("payment.capture", DependencyCategory::ExternalService, PAYMENT_CIRCUIT)?
//!     .ignore(ErrorKind::Conflict);
//!
//! let receipt = resilience
//!     .call(&site, || async { Ok::<_, DependencyError>("rcpt-1") })
//!     .await?;
//! println!("{receipt}");
//! # Ok(())
//! # }
//! ```

use crate::config::ResilienceConfig;
use crate::error::{AsErrorKind, ErrorKind, ResilienceError, Result, RetryError};
use crate::monitor::{
    AlertEvaluator, AlertNotifier, AlertThresholds, BackgroundTasks, HealthAggregator,
    HealthReport, LogNotifier, ScheduleConfig,
};
use crate::runtime::{
    CircuitBreaker, CircuitBreakerRegistry, DependencyCategory, LoggingConfig, MetricsConfig,
    MetricsSink, PolicyTable, RetryExecutor, RetryPolicy,
};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const TARGET: &str = "storefront_resilience::admin";

/// The person or system issuing an admin command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub name: String,
    /// Whether the operator may change circuit state.
    pub elevated: bool,
}

impl Operator {
    /// An operator without admin rights.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elevated: false,
        }
    }

    /// An operator with admin rights.
    pub fn elevated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elevated: true,
        }
    }
}

/// How one place in the code calls a dependency.
#[derive(Debug, Clone)]
pub struct CallSite {
    operation: String,
    category: DependencyCategory,
    ignored: BTreeSet<ErrorKind>,
    circuit: Option<Arc<CircuitBreaker>>,
}

impl CallSite {
    pub fn new(operation: impl Into<String>, category: DependencyCategory) -> Self {
        Self {
            operation: operation.into(),
            category,
            ignored: BTreeSet::new(),
            circuit: None,
        }
    }

    /// Hand `kind` straight back, on top of the category's ignore list.
    #[must_use]
    pub fn ignore(mut self, kind: ErrorKind) -> Self {
        self.ignored.insert(kind);
        self
    }

    /// Gate the call behind `breaker`.
    #[must_use]
    pub fn with_circuit(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit = Some(breaker);
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn category(&self) -> DependencyCategory {
        self.category
    }

    pub fn ignored(&self) -> &BTreeSet<ErrorKind> {
        &self.ignored
    }

    pub fn circuit(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit.as_ref()
    }
}

/// Owner of policies, breakers and metrics for the whole process.
///
/// Cloning is cheap; every clone shares the same state.
#[derive(Clone)]
pub struct Resilience {
    policies: Arc<PolicyTable>,
    circuits: Arc<CircuitBreakerRegistry>,
    metrics: Arc<MetricsSink>,
    executor: RetryExecutor,
    thresholds: AlertThresholds,
    schedule: ScheduleConfig,
    notifier: Arc<dyn AlertNotifier>,
}

impl fmt::Debug for Resilience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resilience")
            .field("policies", &self.policies)
            .field("circuits", &self.circuits.len())
            .field("thresholds", &self.thresholds)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl Default for Resilience {
    fn default() -> Self {
        Self::new()
    }
}

impl Resilience {
    /// Built-in policies, the default breakers and a logging notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> ResilienceBuilder {
        ResilienceBuilder::default()
    }

    /// Build from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `ResilienceError::Config` if a policy or breaker is invalid.
    pub fn from_config(config: &ResilienceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::builder()
            .policies(config.policy_table()?)
            .circuits(config.circuit_registry()?)
            .metrics_config(config.metrics.clone())
            .logging(config.logging.clone())
            .thresholds(config.alerts.clone())
            .schedule(config.schedule.clone())
            .build())
    }

    /// A call site without a breaker.
    pub fn site(&self, operation: impl Into<String>, category: DependencyCategory) -> CallSite {
        CallSite::new(operation, category)
    }

    /// A call site gated by the named breaker.
    ///
    /// # Errors
    ///
    /// Returns `ResilienceError::UnknownCircuit` if no breaker has that name.
    pub fn site_with_circuit(
        &self,
        operation: impl Into<String>,
        category: DependencyCategory,
        circuit: &str,
    ) -> Result<CallSite> {
        let breaker = self.circuits.require(circuit)?;
        Ok(CallSite::new(operation, category).with_circuit(breaker))
    }

    /// Run `op` under the site's policy and breaker.
    ///
    /// # Errors
    ///
    /// - `RetryError::CircuitOpen` if the breaker rejected the call
    /// - `RetryError::Ignored` with the original error for ignored kinds
    /// - `RetryError::Exhausted` when no further attempt was allowed
    pub async fn call<T, E, F, Fut>(
        &self,
        site: &CallSite,
        op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: AsErrorKind + fmt::Display,
    {
        self.guarded(site, None, op).await
    }

    /// Like [`call`](Self::call), stopping between attempts once `cancel`
    /// fires.
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), plus `RetryError::Cancelled`.
    pub async fn call_with_cancel<T, E, F, Fut>(
        &self,
        site: &CallSite,
        cancel: &CancellationToken,
        op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: AsErrorKind + fmt::Display,
    {
        self.guarded(site, Some(cancel), op).await
    }

    /// Like [`call`](Self::call), returning `default` once retries are
    /// exhausted.
    ///
    /// # Errors
    ///
    /// `RetryError::Ignored` and `RetryError::CircuitOpen` still propagate.
    pub async fn call_or<T, E, F, Fut>(
        &self,
        site: &CallSite,
        default: T,
        op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: AsErrorKind + fmt::Display,
    {
        let result = self.guarded(site, None, op).await;
        self.executor.fallback(result, default)
    }

    async fn guarded<T, E, F, Fut>(
        &self,
        site: &CallSite,
        cancel: Option<&CancellationToken>,
        op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: AsErrorKind + fmt::Display,
    {
        let merged: RetryPolicy;
        let mut policy = self.policies.get(site.category);
        if !site.ignored.is_subset(policy.ignored()) {
            merged = policy.with_extra_ignored(&site.ignored);
            policy = &merged;
        }

        let Some(breaker) = &site.circuit else {
            return self.executor.run(&site.operation, policy, cancel, op).await;
        };

        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(rejected) => {
                self.metrics.record_rejected(&site.operation);
                return Err(RetryError::CircuitOpen(rejected));
            }
        };

        let result = self.executor.run(&site.operation, policy, cancel, op).await;
        match &result {
            Ok(_) => permit.record_success(),
            Err(RetryError::Exhausted { .. }) => permit.record_failure(),
            Err(_) => drop(permit),
        }
        result
    }

    pub fn metrics(&self) -> &Arc<MetricsSink> {
        &self.metrics
    }

    pub fn circuits(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.circuits
    }

    pub fn policies(&self) -> &Arc<PolicyTable> {
        &self.policies
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Current health of every breaker and dependency category.
    pub fn health(&self) -> HealthReport {
        HealthAggregator::new(
            self.metrics.clone(),
            self.circuits.clone(),
            self.policies.clone(),
            self.thresholds.healthy_success_rate,
        )
        .health()
    }

    pub fn alert_evaluator(&self) -> AlertEvaluator {
        AlertEvaluator::new(
            self.metrics.clone(),
            self.circuits.clone(),
            self.thresholds.clone(),
            self.notifier.clone(),
        )
    }

    /// Start the alert sweeps, the metrics flush and transition alerts.
    ///
    /// Each call subscribes anew to breaker transitions, so tasks started
    /// after an earlier [`BackgroundTasks::shutdown`] still alert. Starting
    /// twice without a shutdown moves transition alerts to the newer tasks.
    pub fn start_background(&self) -> BackgroundTasks {
        BackgroundTasks::spawn(
            &self.schedule,
            self.alert_evaluator(),
            self.metrics.clone(),
            Some(self.circuits.subscribe_transitions()),
        )
    }

    /// Force a breaker CLOSED and clear its window.
    ///
    /// Returns `true` if the state changed.
    ///
    /// # Errors
    ///
    /// - `ResilienceError::PermissionDenied` for non-elevated operators
    /// - `ResilienceError::UnknownCircuit` for unknown names
    pub fn reset_circuit(&self, name: &str, operator: &Operator) -> Result<bool> {
        let breaker = self.admin_target("reset", name, operator)?;
        Ok(breaker.reset(&operator.name))
    }

    /// Force a breaker OPEN until the next reset.
    ///
    /// Returns `true` if the state changed.
    ///
    /// # Errors
    ///
    /// - `ResilienceError::PermissionDenied` for non-elevated operators
    /// - `ResilienceError::UnknownCircuit` for unknown names
    pub fn force_open_circuit(&self, name: &str, operator: &Operator) -> Result<bool> {
        let breaker = self.admin_target("force open", name, operator)?;
        Ok(breaker.force_open(&operator.name))
    }

    fn admin_target(
        &self,
        action: &str,
        name: &str,
        operator: &Operator,
    ) -> Result<Arc<CircuitBreaker>> {
        if !operator.elevated {
            tracing::warn!(
                target: TARGET,
                circuit = name,
                actor = %operator.name,
                action,
                "admin command refused"
            );
            return Err(ResilienceError::PermissionDenied(format!(
                "{} may not {action} circuits",
                operator.name
            )));
        }
        self.circuits.require(name)
    }
}

/// Builder for [`Resilience`]; unset parts take their defaults.
#[derive(Default)]
pub struct ResilienceBuilder {
    policies: Option<PolicyTable>,
    circuits: Option<CircuitBreakerRegistry>,
    metrics_config: MetricsConfig,
    logging: LoggingConfig,
    thresholds: AlertThresholds,
    schedule: ScheduleConfig,
    notifier: Option<Arc<dyn AlertNotifier>>,
}

impl ResilienceBuilder {
    /// Replace the whole policy table.
    pub fn policies(mut self, policies: PolicyTable) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Replace the policy of one category.
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policies
            .get_or_insert_with(PolicyTable::new)
            .set(policy);
        self
    }

    /// Replace the breaker registry.
    pub fn circuits(mut self, circuits: CircuitBreakerRegistry) -> Self {
        self.circuits = Some(circuits);
        self
    }

    pub fn metrics_config(mut self, config: MetricsConfig) -> Self {
        self.metrics_config = config;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    pub fn thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    /// Where alerts go; defaults to [`LogNotifier`].
    pub fn notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Resilience {
        let metrics = Arc::new(MetricsSink::new(self.metrics_config));
        let executor = RetryExecutor::new(metrics.clone()).with_logging(self.logging);
        Resilience {
            policies: Arc::new(self.policies.unwrap_or_default()),
            circuits: Arc::new(
                self.circuits
                    .unwrap_or_else(CircuitBreakerRegistry::with_defaults),
            ),
            metrics,
            executor,
            thresholds: self.thresholds,
            schedule: self.schedule,
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
        }
    }
}
