// SPDX-License-Identifier: MIT OR Apache-2.0

//! Point-in-time health of every guarded dependency.

use crate::runtime::{CircuitBreakerRegistry, CircuitState, MetricsSink, PolicyTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

/// Health of one breaker or dependency category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyStatus {
    /// Circuit state; absent for dependency categories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<CircuitState>,
    /// Failure rate in percent.
    pub failure_rate: f64,
    pub successful_calls: u64,
    pub failed_calls: u64,
}

/// Answer to a health query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub details: BTreeMap<String, DependencyStatus>,
    pub success_rates: BTreeMap<String, f64>,
}

impl HealthReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Up
    }

    /// Render the report as the operator-facing JSON document.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Builds [`HealthReport`]s from breakers and metrics without mutating either.
#[derive(Debug, Clone)]
pub struct HealthAggregator {
    metrics: Arc<MetricsSink>,
    circuits: Arc<CircuitBreakerRegistry>,
    policies: Arc<PolicyTable>,
    healthy_success_rate: f64,
}

impl HealthAggregator {
    pub fn new(
        metrics: Arc<MetricsSink>,
        circuits: Arc<CircuitBreakerRegistry>,
        policies: Arc<PolicyTable>,
        healthy_success_rate: f64,
    ) -> Self {
        Self {
            metrics,
            circuits,
            policies,
            healthy_success_rate,
        }
    }

    /// Current health.
    ///
    /// DOWN when any breaker is OPEN or any operation's success rate is
    /// below the healthy threshold.
    pub fn health(&self) -> HealthReport {
        let mut details = BTreeMap::new();
        let mut healthy = true;

        for snapshot in self.circuits.snapshots() {
            healthy &= snapshot.state != CircuitState::Open;
            details.insert(
                snapshot.name,
                DependencyStatus {
                    state: Some(snapshot.state),
                    failure_rate: snapshot.failure_rate,
                    successful_calls: snapshot.successful_calls,
                    failed_calls: snapshot.failed_calls,
                },
            );
        }

        let operations = self.metrics.snapshot_all();
        for policy in self.policies.iter() {
            let category = policy.category();
            let (successful, failed) = operations
                .values()
                .filter(|m| m.category == Some(category))
                .fold((0, 0), |(s, f), m| (s + m.successes, f + m.failures));
            let total = successful + failed;
            details.insert(
                category.to_string(),
                DependencyStatus {
                    state: None,
                    failure_rate: if total == 0 {
                        0.0
                    } else {
                        failed as f64 * 100.0 / total as f64
                    },
                    successful_calls: successful,
                    failed_calls: failed,
                },
            );
        }

        let success_rates: BTreeMap<String, f64> = operations
            .iter()
            .map(|(name, m)| (name.clone(), m.success_rate()))
            .collect();
        healthy &= success_rates
            .values()
            .all(|rate| *rate >= self.healthy_success_rate);

        HealthReport {
            status: if healthy {
                HealthStatus::Up
            } else {
                HealthStatus::Down
            },
            details,
            success_rates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::{
        AttemptOutcome, AttemptRecord, CircuitBreakerConfig, DependencyCategory, MetricsConfig,
        PAYMENT_CIRCUIT,
    };
    use std::time::{Duration, SystemTime};

    fn aggregator(
        metrics: Arc<MetricsSink>,
        circuits: Arc<CircuitBreakerRegistry>,
    ) -> HealthAggregator {
        HealthAggregator::new(metrics, circuits, Arc::new(PolicyTable::new()), 0.8)
    }

    fn defaults() -> Arc<CircuitBreakerRegistry> {
        Arc::new(CircuitBreakerRegistry::with_defaults())
    }

    fn record(metrics: &MetricsSink, operation: &str, category: DependencyCategory, ok: bool) {
        metrics.record_attempt(&AttemptRecord {
            operation,
            category,
            attempt: 1,
            started_at: SystemTime::now(),
            outcome: if ok {
                AttemptOutcome::Success
            } else {
                AttemptOutcome::Failure
            },
            error_kind: (!ok).then_some(ErrorKind::Unavailable),
            duration: Duration::from_millis(5),
        });
    }

    #[test]
    fn test_fresh_process_is_up() {
        let report = aggregator(
            Arc::new(MetricsSink::default()),
            Arc::new(CircuitBreakerRegistry::with_defaults()),
        )
        .health();

        assert!(report.is_healthy());
        assert!(report.success_rates.is_empty());
        // three breakers and four categories
        assert_eq!(report.details.len(), 7);
        assert_eq!(report.details["payment"].state, Some(CircuitState::Closed));
        assert_eq!(report.details["database"].state, None);
    }

    #[test]
    fn test_open_breaker_is_down() {
        let circuits = Arc::new(CircuitBreakerRegistry::with_defaults());
        circuits.require(PAYMENT_CIRCUIT).unwrap().force_open("ops");

        let report = aggregator(Arc::new(MetricsSink::default()), circuits).health();
        assert_eq!(report.status, HealthStatus::Down);
        assert_eq!(report.details["payment"].state, Some(CircuitState::Open));
    }

    #[test]
    fn test_low_success_rate_is_down_and_categories_sum() {
        let metrics = Arc::new(MetricsSink::default());
        record(&metrics, "orders.load", DependencyCategory::Database, true);
        record(&metrics, "orders.save", DependencyCategory::Database, false);
        record(&metrics, "session.get", DependencyCategory::Cache, true);

        let report = aggregator(metrics, Arc::new(CircuitBreakerRegistry::new())).health();
        assert!(!report.is_healthy());
        assert_eq!(report.success_rates["orders.save"], 0.0);
        assert_eq!(report.success_rates["session.get"], 1.0);

        let database = &report.details["database"];
        assert_eq!(database.successful_calls, 1);
        assert_eq!(database.failed_calls, 1);
        assert_eq!(database.failure_rate, 50.0);
        assert_eq!(report.details["cache"].failed_calls, 0);
    }

    #[test]
    fn test_health_does_not_mutate() {
        let metrics = Arc::new(MetricsSink::default());
        record(&metrics, "orders.load", DependencyCategory::Database, true);
        let aggregator = aggregator(metrics.clone(), defaults());

        let before = metrics.snapshot("orders.load");
        let first = aggregator.health();
        let second = aggregator.health();
        assert_eq!(first, second);
        assert_eq!(metrics.snapshot("orders.load"), before);
    }

    #[test]
    fn test_json_shape() {
        let metrics = Arc::new(MetricsSink::default());
        record(&metrics, "orders.load", DependencyCategory::Database, true);
        let report = aggregator(metrics, defaults()).health();

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "UP");
        assert_eq!(json["details"]["auth-provider"]["state"], "CLOSED");
        assert_eq!(json["details"]["auth-provider"]["failedCalls"], 0);
        assert!(json["details"]["database"].get("state").is_none());
        assert_eq!(json["successRates"]["orders.load"], 1.0);
    }

    #[test]
    fn test_breaker_named_like_a_category_is_refused() {
        let mut circuits = CircuitBreakerRegistry::new();
        assert!(circuits.register("cache", CircuitBreakerConfig::default()).is_err());
        circuits
            .register("cache-cluster", CircuitBreakerConfig::default())
            .unwrap()
            .force_open("ops");

        let report = aggregator(Arc::new(MetricsSink::default()), Arc::new(circuits)).health();
        assert_eq!(report.status, HealthStatus::Down);
        assert_eq!(report.details["cache-cluster"].state, Some(CircuitState::Open));
        assert_eq!(report.details["cache"].state, None);
    }

    #[test]
    fn test_health_with_unbounded_latency_bucket() {
        let metrics = Arc::new(MetricsSink::new(
            MetricsConfig::builder()
                .histogram_buckets(vec![0.1, f64::INFINITY])
                .build(),
        ));
        metrics.record_attempt(&AttemptRecord {
            operation: "orders.load",
            category: DependencyCategory::Database,
            attempt: 1,
            started_at: SystemTime::now(),
            outcome: AttemptOutcome::Success,
            error_kind: None,
            duration: Duration::from_secs(1),
        });

        let report = aggregator(metrics.clone(), defaults()).health();
        assert!(report.is_healthy());
        assert_eq!(metrics.snapshot("orders.load").p50_latency_ms, Some(1_000));
    }
}
