// SPDX-License-Identifier: MIT OR Apache-2.0

//! Threshold alerts over metrics and circuit state.
//!
//! The [`AlertEvaluator`] is driven by the scheduler: a fast sweep checks
//! success rates, exhausted counts and circuits stuck open; a slow sweep
//! looks for operations that are healthy but slow. Circuit transitions into
//! OPEN and back to CLOSED are dispatched as soon as they happen.
//!
//! Delivery goes through an [`AlertNotifier`]. A failed delivery is logged
//! and dropped; it never reaches the sweep that produced the alert.

use crate::error::ResilienceError;
use crate::runtime::{CircuitBreakerRegistry, CircuitState, CircuitTransition, MetricsSink};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

const TARGET: &str = "storefront_resilience::alerts";

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// What an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    LowSuccessRate,
    HighFailureCount,
    SlowOperation,
    CircuitStuckOpen,
    CircuitOpened,
    CircuitRecovered,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertType::LowSuccessRate => "LOW_SUCCESS_RATE",
            AlertType::HighFailureCount => "HIGH_FAILURE_COUNT",
            AlertType::SlowOperation => "SLOW_OPERATION",
            AlertType::CircuitStuckOpen => "CIRCUIT_STUCK_OPEN",
            AlertType::CircuitOpened => "CIRCUIT_OPENED",
            AlertType::CircuitRecovered => "CIRCUIT_RECOVERED",
        };
        f.write_str(name)
    }
}

/// A single alert, handed to the notifier and then dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    /// Operation or circuit name.
    pub subject: String,
    pub message: String,
    pub timestamp: SystemTime,
}

impl Alert {
    /// Create an alert stamped with the current time.
    pub fn new(
        alert_type: AlertType,
        severity: Severity,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            severity,
            subject: subject.into(),
            message: message.into(),
            timestamp: SystemTime::now(),
        }
    }

    /// The immediate alert for a circuit transition, if the edge warrants one.
    pub fn from_transition(transition: &CircuitTransition) -> Option<Self> {
        let (alert_type, severity, verb) = match (transition.from, transition.to) {
            (_, CircuitState::Open) => (AlertType::CircuitOpened, Severity::Critical, "opened"),
            (CircuitState::HalfOpen, CircuitState::Closed) => {
                (AlertType::CircuitRecovered, Severity::Warning, "recovered")
            }
            _ => return None,
        };
        let cause = if transition.forced { " by an operator" } else { "" };
        Some(Self {
            alert_type,
            severity,
            subject: transition.circuit.clone(),
            message: format!(
                "circuit `{}` {verb}{cause} ({} -> {})",
                transition.circuit, transition.from, transition.to
            ),
            timestamp: transition.at,
        })
    }
}

/// Alert delivery failure.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Delivers alerts to whatever channel the process uses.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// Deliver one alert.
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Notifier that writes alerts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        match alert.severity {
            Severity::Critical => tracing::error!(
                target: TARGET,
                alert_type = %alert.alert_type,
                subject = %alert.subject,
                "{}",
                alert.message
            ),
            Severity::Warning => tracing::warn!(
                target: TARGET,
                alert_type = %alert.alert_type,
                subject = %alert.subject,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// Alerting thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Success rate below which an operation with attempts is unhealthy.
    pub healthy_success_rate: f64,
    /// How long a circuit may stay OPEN before it counts as stuck.
    #[serde(with = "humantime_serde")]
    pub open_grace: Duration,
    /// Exhausted calls per window that raise a high-failure alert.
    pub exhausted_threshold: u64,
    /// Median latency above which a healthy operation is reported slow.
    #[serde(with = "humantime_serde")]
    pub slow_p50: Duration,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            healthy_success_rate: 0.8,
            open_grace: Duration::from_secs(300),
            exhausted_threshold: 10,
            slow_p50: Duration::from_secs(2),
        }
    }
}

impl AlertThresholds {
    /// # Errors
    ///
    /// Returns `ResilienceError::Config` if the success rate is outside `[0, 1]`.
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(0.0..=1.0).contains(&self.healthy_success_rate) {
            return Err(ResilienceError::Config(format!(
                "healthy_success_rate must be in [0, 1], got {}",
                self.healthy_success_rate
            )));
        }
        Ok(())
    }
}

/// Scans metrics and breakers and dispatches alerts.
#[derive(Clone)]
pub struct AlertEvaluator {
    metrics: Arc<MetricsSink>,
    circuits: Arc<CircuitBreakerRegistry>,
    thresholds: AlertThresholds,
    notifier: Arc<dyn AlertNotifier>,
}

impl fmt::Debug for AlertEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertEvaluator")
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}

impl AlertEvaluator {
    pub fn new(
        metrics: Arc<MetricsSink>,
        circuits: Arc<CircuitBreakerRegistry>,
        thresholds: AlertThresholds,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        Self {
            metrics,
            circuits,
            thresholds,
            notifier,
        }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Success rates, exhausted counts and circuits stuck open.
    pub fn evaluate_fast(&self) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let threshold = self.thresholds.healthy_success_rate;

        for (operation, metrics) in self.metrics.snapshot_all() {
            let rate = metrics.success_rate();
            if metrics.attempts > 0 && rate < threshold {
                alerts.push(Alert::new(
                    AlertType::LowSuccessRate,
                    Severity::Critical,
                    &operation,
                    format!(
                        "`{operation}` success rate {:.1}% is below {:.1}% ({} of {} attempts failed)",
                        rate * 100.0,
                        threshold * 100.0,
                        metrics.failures,
                        metrics.attempts
                    ),
                ));
            }
            if self.thresholds.exhausted_threshold > 0
                && metrics.exhausted >= self.thresholds.exhausted_threshold
            {
                alerts.push(Alert::new(
                    AlertType::HighFailureCount,
                    Severity::Critical,
                    &operation,
                    format!(
                        "`{operation}` ran out of attempts {} times this window",
                        metrics.exhausted
                    ),
                ));
            }
        }

        for breaker in self.circuits.iter() {
            if let Some(open_for) = breaker.open_duration() {
                if open_for > self.thresholds.open_grace {
                    alerts.push(Alert::new(
                        AlertType::CircuitStuckOpen,
                        Severity::Critical,
                        breaker.name(),
                        format!(
                            "circuit `{}` has been open for {}s",
                            breaker.name(),
                            open_for.as_secs()
                        ),
                    ));
                }
            }
        }

        alerts
    }

    /// Healthy operations whose median latency is above the slow threshold.
    pub fn evaluate_slow(&self) -> Vec<Alert> {
        let threshold = self.thresholds.healthy_success_rate;
        self.metrics
            .operations()
            .into_iter()
            .filter(|operation| self.metrics.success_rate(operation) >= threshold)
            .filter_map(|operation| {
                let p50 = self.metrics.p50_latency(&operation)?;
                (p50 > self.thresholds.slow_p50).then(|| {
                    Alert::new(
                        AlertType::SlowOperation,
                        Severity::Warning,
                        &operation,
                        format!(
                            "`{operation}` p50 latency {}ms exceeds {}ms",
                            p50.as_millis(),
                            self.thresholds.slow_p50.as_millis()
                        ),
                    )
                })
            })
            .collect()
    }

    /// Run the fast sweep and dispatch its alerts; returns how many were delivered.
    pub async fn run_fast(&self) -> usize {
        let alerts = self.evaluate_fast();
        self.dispatch(alerts).await
    }

    /// Run the slow sweep and dispatch its alerts; returns how many were delivered.
    pub async fn run_slow(&self) -> usize {
        let alerts = self.evaluate_slow();
        self.dispatch(alerts).await
    }

    /// Dispatch the alert for a circuit transition, if any.
    pub async fn on_transition(&self, transition: &CircuitTransition) -> bool {
        match Alert::from_transition(transition) {
            Some(alert) => self.dispatch(vec![alert]).await == 1,
            None => false,
        }
    }

    /// Deliver alerts one by one; failures are logged and skipped.
    pub async fn dispatch(&self, alerts: Vec<Alert>) -> usize {
        let mut delivered = 0;
        for alert in &alerts {
            match self.notifier.notify(alert).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    target: TARGET,
                    alert_type = %alert.alert_type,
                    subject = %alert.subject,
                    error = %e,
                    "alert delivery failed"
                ),
            }
        }
        if !alerts.is_empty() {
            tracing::debug!(target: TARGET, raised = alerts.len(), delivered, "alerts dispatched");
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::{
        AttemptOutcome, AttemptRecord, CircuitBreakerConfig, DependencyCategory,
    };
    use crate::testkit::RecordingNotifier;

    fn record(metrics: &MetricsSink, operation: &str, outcome: AttemptOutcome, millis: u64) {
        metrics.record_attempt(&AttemptRecord {
            operation,
            category: DependencyCategory::ExternalService,
            attempt: 1,
            started_at: SystemTime::now(),
            outcome,
            error_kind: (outcome == AttemptOutcome::Failure).then_some(ErrorKind::Timeout),
            duration: Duration::from_millis(millis),
        });
    }

    fn evaluator(
        metrics: Arc<MetricsSink>,
        circuits: CircuitBreakerRegistry,
        notifier: Arc<RecordingNotifier>,
    ) -> AlertEvaluator {
        AlertEvaluator::new(
            metrics,
            Arc::new(circuits),
            AlertThresholds::default(),
            notifier,
        )
    }

    #[test]
    fn test_thresholds_default_and_yaml() {
        let thresholds = AlertThresholds::default();
        assert_eq!(thresholds.healthy_success_rate, 0.8);
        assert_eq!(thresholds.open_grace, Duration::from_secs(300));

        let parsed: AlertThresholds =
            serde_yaml::from_str("open_grace: 2m\nslow_p50: 750ms\n").unwrap();
        assert_eq!(parsed.open_grace, Duration::from_secs(120));
        assert_eq!(parsed.slow_p50, Duration::from_millis(750));
        assert_eq!(parsed.exhausted_threshold, 10);

        let bad = AlertThresholds {
            healthy_success_rate: 1.5,
            ..AlertThresholds::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_cold_operations_raise_nothing() {
        let metrics = Arc::new(MetricsSink::default());
        metrics.record_cancelled("inventory.sync", 0);
        let evaluator = evaluator(
            metrics,
            CircuitBreakerRegistry::with_defaults(),
            Arc::new(RecordingNotifier::new()),
        );
        assert!(evaluator.evaluate_fast().is_empty());
        assert!(evaluator.evaluate_slow().is_empty());
    }

    #[test]
    fn test_low_success_rate_is_critical() {
        let metrics = Arc::new(MetricsSink::default());
        record(&metrics, "payment.charge", AttemptOutcome::Success, 10);
        record(&metrics, "payment.charge", AttemptOutcome::Failure, 10);
        record(&metrics, "shipping.quote", AttemptOutcome::Success, 10);

        let evaluator = evaluator(
            metrics,
            CircuitBreakerRegistry::new(),
            Arc::new(RecordingNotifier::new()),
        );
        let alerts = evaluator.evaluate_fast();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::LowSuccessRate);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].subject, "payment.charge");
    }

    #[test]
    fn test_high_failure_count() {
        let metrics = Arc::new(MetricsSink::default());
        for _ in 0..10 {
            metrics.record_exhausted("email.send", 3, ErrorKind::Unavailable);
        }
        let evaluator = evaluator(
            metrics,
            CircuitBreakerRegistry::new(),
            Arc::new(RecordingNotifier::new()),
        );
        let alerts = evaluator.evaluate_fast();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::HighFailureCount);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_stuck_open() {
        let mut circuits = CircuitBreakerRegistry::new();
        let breaker = circuits
            .register("payment", CircuitBreakerConfig::default())
            .unwrap();
        breaker.force_open("ops");

        let evaluator = evaluator(
            Arc::new(MetricsSink::default()),
            circuits,
            Arc::new(RecordingNotifier::new()),
        );
        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(evaluator.evaluate_fast().is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        let alerts = evaluator.evaluate_fast();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::CircuitStuckOpen);
        assert_eq!(alerts[0].subject, "payment");
    }

    #[test]
    fn test_slow_operation_is_warning() {
        let metrics = Arc::new(MetricsSink::default());
        record(&metrics, "search.reindex", AttemptOutcome::Success, 3_000);
        record(&metrics, "search.reindex", AttemptOutcome::Success, 4_000);
        record(&metrics, "catalog.get", AttemptOutcome::Success, 20);
        // slow but failing: covered by the fast sweep instead
        record(&metrics, "tax.quote", AttemptOutcome::Failure, 5_000);

        let evaluator = evaluator(
            metrics,
            CircuitBreakerRegistry::new(),
            Arc::new(RecordingNotifier::new()),
        );
        let alerts = evaluator.evaluate_slow();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::SlowOperation);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].subject, "search.reindex");
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let metrics = Arc::new(MetricsSink::default());
        record(&metrics, "payment.charge", AttemptOutcome::Failure, 10);
        let notifier = Arc::new(RecordingNotifier::failing());
        let evaluator = evaluator(metrics, CircuitBreakerRegistry::new(), notifier.clone());

        assert_eq!(evaluator.run_fast().await, 0);
        assert_eq!(notifier.attempts(), 1);
        assert!(notifier.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_transition_alerts() {
        let notifier = Arc::new(RecordingNotifier::new());
        let evaluator = evaluator(
            Arc::new(MetricsSink::default()),
            CircuitBreakerRegistry::new(),
            notifier.clone(),
        );

        let opened = CircuitTransition {
            circuit: "auth-provider".to_string(),
            from: CircuitState::Closed,
            to: CircuitState::Open,
            at: SystemTime::now(),
            forced: false,
        };
        assert!(evaluator.on_transition(&opened).await);

        let recovered = CircuitTransition {
            from: CircuitState::HalfOpen,
            to: CircuitState::Closed,
            ..opened.clone()
        };
        assert!(evaluator.on_transition(&recovered).await);

        let half_open = CircuitTransition {
            from: CircuitState::Open,
            to: CircuitState::HalfOpen,
            ..opened
        };
        assert!(!evaluator.on_transition(&half_open).await);

        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].alert_type, AlertType::CircuitOpened);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[1].alert_type, AlertType::CircuitRecovered);
        assert_eq!(alerts[1].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let alert = Alert::new(
            AlertType::SlowOperation,
            Severity::Warning,
            "catalog.get",
            "slow",
        );
        assert!(LogNotifier.notify(&alert).await.is_ok());
    }

    #[test]
    fn test_alert_serializes_type_field() {
        let alert = Alert::new(
            AlertType::CircuitOpened,
            Severity::Critical,
            "payment",
            "circuit `payment` opened",
        );
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "CIRCUIT_OPENED");
        assert_eq!(json["severity"], "CRITICAL");
    }
}
