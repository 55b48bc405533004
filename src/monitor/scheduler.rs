// SPDX-License-Identifier: MIT OR Apache-2.0

//! Timer-driven background sweeps.
//!
//! [`BackgroundTasks::spawn`] starts one task per sweep plus one that turns
//! circuit transitions into immediate alerts. All of them stop when the
//! shared cancellation token fires; [`BackgroundTasks::shutdown`] cancels it
//! and waits for the tasks to finish.

use crate::monitor::AlertEvaluator;
use crate::runtime::{CircuitTransition, MetricsSink};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const TARGET: &str = "storefront_resilience::scheduler";

/// Sweep intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Success-rate, exhausted-count and stuck-circuit checks.
    #[serde(with = "humantime_serde")]
    pub fast_check_interval: Duration,
    /// Latency checks.
    #[serde(with = "humantime_serde")]
    pub slow_check_interval: Duration,
    /// Metrics window length.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fast_check_interval: Duration::from_secs(60),
            slow_check_interval: Duration::from_secs(300),
            flush_interval: Duration::from_secs(300),
        }
    }
}

/// Handles of the running background tasks.
#[derive(Debug)]
pub struct BackgroundTasks {
    cancellation: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Spawn the sweeps on the current tokio runtime.
    ///
    /// `transitions` is a subscription to the breaker registry's transition
    /// channel; without one no transition alerts are sent.
    pub fn spawn(
        schedule: &ScheduleConfig,
        evaluator: AlertEvaluator,
        metrics: Arc<MetricsSink>,
        transitions: Option<mpsc::Receiver<CircuitTransition>>,
    ) -> Self {
        let cancellation = CancellationToken::new();
        let mut handles = Vec::with_capacity(4);

        let fast = evaluator.clone();
        handles.push(tokio::spawn(ticker(
            "fast-check",
            schedule.fast_check_interval,
            cancellation.clone(),
            move || {
                let evaluator = fast.clone();
                async move {
                    evaluator.run_fast().await;
                }
            },
        )));

        let slow = evaluator.clone();
        handles.push(tokio::spawn(ticker(
            "slow-check",
            schedule.slow_check_interval,
            cancellation.clone(),
            move || {
                let evaluator = slow.clone();
                async move {
                    evaluator.run_slow().await;
                }
            },
        )));

        handles.push(tokio::spawn(ticker(
            "metrics-flush",
            schedule.flush_interval,
            cancellation.clone(),
            move || {
                let metrics = metrics.clone();
                async move {
                    metrics.flush();
                }
            },
        )));

        if let Some(receiver) = transitions {
            handles.push(tokio::spawn(forward_transitions(
                receiver,
                evaluator,
                cancellation.clone(),
            )));
        }

        tracing::info!(
            target: TARGET,
            tasks = handles.len(),
            fast_secs = schedule.fast_check_interval.as_secs(),
            slow_secs = schedule.slow_check_interval.as_secs(),
            flush_secs = schedule.flush_interval.as_secs(),
            "background tasks started"
        );

        Self {
            cancellation,
            handles,
        }
    }

    /// Token that stops every task when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Number of tasks still running.
    pub fn running(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Cancel every task and wait for it to finish.
    pub async fn shutdown(self) {
        self.cancellation.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(target: TARGET, error = %e, "background task ended abnormally");
            }
        }
        tracing::info!(target: TARGET, "background tasks stopped");
    }
}

async fn ticker<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    if period.is_zero() {
        tracing::warn!(target: TARGET, task = name, "zero interval, task disabled");
        return;
    }

    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                tracing::trace!(target: TARGET, task = name, "tick");
                tick().await;
            }
        }
    }
}

async fn forward_transitions(
    mut receiver: mpsc::Receiver<CircuitTransition>,
    evaluator: AlertEvaluator,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = receiver.recv() => match event {
                Some(transition) => {
                    evaluator.on_transition(&transition).await;
                }
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{AlertThresholds, AlertType};
    use crate::runtime::{CircuitBreakerConfig, CircuitBreakerRegistry};
    use crate::testkit::RecordingNotifier;

    #[test]
    fn test_schedule_defaults_and_yaml() {
        let schedule = ScheduleConfig::default();
        assert_eq!(schedule.fast_check_interval, Duration::from_secs(60));
        assert_eq!(schedule.slow_check_interval, Duration::from_secs(300));
        assert_eq!(schedule.flush_interval, Duration::from_secs(300));

        let parsed: ScheduleConfig = serde_yaml::from_str("flush_interval: 1m\n").unwrap();
        assert_eq!(parsed.flush_interval, Duration::from_secs(60));
        assert_eq!(parsed.fast_check_interval, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_runs_on_schedule_and_stops_on_shutdown() {
        let metrics = Arc::new(MetricsSink::default());
        let circuits = Arc::new(CircuitBreakerRegistry::new());
        let evaluator = AlertEvaluator::new(
            metrics.clone(),
            circuits,
            AlertThresholds::default(),
            Arc::new(RecordingNotifier::new()),
        );
        let tasks = BackgroundTasks::spawn(
            &ScheduleConfig::default(),
            evaluator,
            metrics.clone(),
            None,
        );
        assert_eq!(tasks.handles.len(), 3);

        metrics.record_cancelled("orders.load", 0);
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(metrics.last_window().is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let window = metrics.last_window().unwrap();
        assert_eq!(window.operations["orders.load"].cancelled, 1);

        tasks.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_are_alerted_immediately() {
        let mut registry = CircuitBreakerRegistry::new();
        let breaker = registry
            .register(
                "payment",
                CircuitBreakerConfig::default().with_minimum_calls(1),
            )
            .unwrap();
        let transitions = Some(registry.subscribe_transitions());
        let notifier = Arc::new(RecordingNotifier::new());
        let metrics = Arc::new(MetricsSink::default());
        let evaluator = AlertEvaluator::new(
            metrics.clone(),
            Arc::new(registry),
            AlertThresholds::default(),
            notifier.clone(),
        );
        let tasks =
            BackgroundTasks::spawn(&ScheduleConfig::default(), evaluator, metrics, transitions);
        assert_eq!(tasks.running(), 4);

        breaker.try_acquire().unwrap().record_failure();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::CircuitOpened);

        let token = tasks.cancellation_token();
        tasks.shutdown().await;
        assert!(token.is_cancelled());
    }
}
