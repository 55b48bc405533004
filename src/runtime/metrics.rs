// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-operation outcome metrics.
//!
//! The [`MetricsSink`] receives every attempt made by the retry executor and
//! keeps lock-free counters per logical operation name. Derived rates are
//! computed on demand; a scheduled [`flush`](MetricsSink::flush) closes the
//! current reporting window and keeps it as the latest one.
//!
//! # Features
//!
//! - Attempt, success, failure, ignored, exhausted and cancelled counters
//! - Failures broken down by [`ErrorKind`]
//! - Success-after-retry count with attempts and elapsed time
//! - Attempt latency histogram with a p50 estimate
//! - Prometheus text exposition
//!
//! # Example
//!
//! ```rust
//! use storefront_resilience::runtime::{MetricsConfig, MetricsSink};
//!
//! let config = MetricsConfig::builder()
//!     .namespace("storefront")
//!     .histogram_buckets(vec![0.01, 0.1, 1.0])
//!     .build();
//!
//! let metrics = MetricsSink::new(config);
//! assert_eq!(metrics.success_rate("orders.create"), 1.0);
//!
//! let output = metrics.to_prometheus_text();
//! assert!(output.contains("# TYPE storefront_attempts_total counter"));
//! ```

use crate::error::{ErrorKind, ResilienceError, Result};
use crate::runtime::DependencyCategory;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

const TARGET: &str = "storefront_resilience::metrics";

/// Largest accepted histogram bucket, one day.
const MAX_BUCKET_SECS: f64 = 86_400.0;

/// Configuration for the metrics sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Metric namespace prefix (e.g., "storefront" -> "storefront_attempts_total")
    pub namespace: String,
    /// Histogram buckets for attempt latency (in seconds)
    pub histogram_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: "storefront_resilience".to_string(),
            histogram_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

impl MetricsConfig {
    /// Create a new builder for `MetricsConfig`.
    pub fn builder() -> MetricsConfigBuilder {
        MetricsConfigBuilder::default()
    }

    /// Check the namespace and the histogram buckets.
    ///
    /// Buckets must be finite, positive, strictly increasing and at most one
    /// day; the `+Inf` bucket is always emitted and must not be listed.
    ///
    /// # Errors
    ///
    /// Returns `ResilienceError::Config` naming the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty()
            || !self
                .namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
            || self.namespace.starts_with(|c: char| c.is_ascii_digit())
        {
            return Err(ResilienceError::Config(format!(
                "metrics.namespace `{}` is not a valid metric name prefix",
                self.namespace
            )));
        }
        let mut previous: Option<f64> = None;
        for bucket in &self.histogram_buckets {
            if !bucket.is_finite() || *bucket <= 0.0 || *bucket > MAX_BUCKET_SECS {
                return Err(ResilienceError::Config(format!(
                    "metrics.histogram_buckets: {bucket} must be in (0, {MAX_BUCKET_SECS}]"
                )));
            }
            if previous.is_some_and(|p| *bucket <= p) {
                return Err(ResilienceError::Config(format!(
                    "metrics.histogram_buckets must be strictly increasing, got {:?}",
                    self.histogram_buckets
                )));
            }
            previous = Some(*bucket);
        }
        Ok(())
    }
}

/// Builder for `MetricsConfig`.
#[derive(Debug, Default)]
pub struct MetricsConfigBuilder {
    namespace: Option<String>,
    histogram_buckets: Option<Vec<f64>>,
}

impl MetricsConfigBuilder {
    /// Set the metric namespace prefix.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set histogram buckets for attempt latency (in seconds).
    pub fn histogram_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.histogram_buckets = Some(buckets);
        self
    }

    /// Build the `MetricsConfig`.
    pub fn build(self) -> MetricsConfig {
        let default = MetricsConfig::default();
        MetricsConfig {
            namespace: self.namespace.unwrap_or(default.namespace),
            histogram_buckets: self.histogram_buckets.unwrap_or(default.histogram_buckets),
        }
    }
}

/// Outcome of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Ignored,
}

/// One attempt, folded into the counters and then dropped.
#[derive(Debug, Clone)]
pub struct AttemptRecord<'a> {
    pub operation: &'a str,
    pub category: DependencyCategory,
    /// 1-based.
    pub attempt: u32,
    pub started_at: SystemTime,
    pub outcome: AttemptOutcome,
    pub error_kind: Option<ErrorKind>,
    pub duration: Duration,
}

/// A single histogram with cumulative bucket counters.
#[derive(Debug)]
struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum: AtomicU64, // nanoseconds
    count: AtomicU64,
    max: AtomicU64, // nanoseconds
}

impl Histogram {
    fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    fn observe(&self, value: Duration) {
        let secs = value.as_secs_f64();
        if let Some(first) = self.buckets.iter().position(|bucket| secs <= *bucket) {
            for counter in &self.counts[first..] {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }

        let nanos = u64::try_from(value.as_nanos()).unwrap_or(u64::MAX);
        self.sum.fetch_add(nanos, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.max.fetch_max(nanos, Ordering::Relaxed);
    }

    fn sum_secs(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1_000_000_000.0
    }

    fn total_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Upper bound of the bucket holding quantile `q`; the largest
    /// observation when it falls past the last bucket.
    fn quantile(&self, q: f64) -> Option<Duration> {
        let total = self.total_count();
        if total == 0 {
            return None;
        }
        let rank = ((total as f64) * q).ceil().max(1.0) as u64;
        let max = Duration::from_nanos(self.max.load(Ordering::Relaxed));
        for (i, bucket) in self.buckets.iter().enumerate() {
            if self.counts[i].load(Ordering::Relaxed) >= rank {
                return Some(Duration::try_from_secs_f64(*bucket).unwrap_or(max));
            }
        }
        Some(max)
    }
}

fn counter_array() -> [AtomicU64; ErrorKind::COUNT] {
    std::array::from_fn(|_| AtomicU64::new(0))
}

fn kind_map(counters: &[AtomicU64; ErrorKind::COUNT]) -> BTreeMap<ErrorKind, u64> {
    ErrorKind::ALL
        .iter()
        .filter_map(|kind| {
            let n = counters[kind.index()].load(Ordering::Relaxed);
            (n > 0).then_some((*kind, n))
        })
        .collect()
}

/// Counters for one operation within the current window.
#[derive(Debug)]
struct OperationCounters {
    category: OnceLock<DependencyCategory>,
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    ignored: AtomicU64,
    successes_after_retry: AtomicU64,
    retry_success_attempts: AtomicU64,
    retry_success_elapsed_ms: AtomicU64,
    exhausted: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
    failures_by_kind: [AtomicU64; ErrorKind::COUNT],
    exhausted_by_kind: [AtomicU64; ErrorKind::COUNT],
    latency: Histogram,
}

impl OperationCounters {
    fn new(buckets: Vec<f64>) -> Self {
        Self {
            category: OnceLock::new(),
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            successes_after_retry: AtomicU64::new(0),
            retry_success_attempts: AtomicU64::new(0),
            retry_success_elapsed_ms: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            failures_by_kind: counter_array(),
            exhausted_by_kind: counter_array(),
            latency: Histogram::new(buckets),
        }
    }

    fn snapshot(&self) -> OperationMetrics {
        OperationMetrics {
            category: self.category.get().copied(),
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            successes_after_retry: self.successes_after_retry.load(Ordering::Relaxed),
            retry_success_attempts: self.retry_success_attempts.load(Ordering::Relaxed),
            retry_success_elapsed_ms: self.retry_success_elapsed_ms.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failures_by_kind: kind_map(&self.failures_by_kind),
            exhausted_by_kind: kind_map(&self.exhausted_by_kind),
            p50_latency_ms: self
                .latency
                .quantile(0.5)
                .map(|d| d.as_millis() as u64),
        }
    }
}

/// Point-in-time copy of one operation's counters.
///
/// Unknown operations yield the zero value, whose success rate is 1.0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetrics {
    pub category: Option<DependencyCategory>,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub ignored: u64,
    pub successes_after_retry: u64,
    /// Sum of the attempt counts of calls that succeeded after retry.
    pub retry_success_attempts: u64,
    /// Sum of first-attempt-to-success times of those calls.
    pub retry_success_elapsed_ms: u64,
    pub exhausted: u64,
    pub cancelled: u64,
    /// Calls rejected by an open circuit; not attempts.
    pub rejected: u64,
    pub failures_by_kind: BTreeMap<ErrorKind, u64>,
    pub exhausted_by_kind: BTreeMap<ErrorKind, u64>,
    pub p50_latency_ms: Option<u64>,
}

impl OperationMetrics {
    /// `1 - failures / attempts` in `[0, 1]`, or 1.0 without attempts.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        success_rate(self.attempts, self.failures)
    }

    /// `failures / attempts`, or 0.0 without attempts.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        1.0 - self.success_rate()
    }
}

/// A closed reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsWindow {
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
    pub operations: BTreeMap<String, OperationMetrics>,
}

#[derive(Debug)]
struct Window {
    started_at: SystemTime,
    operations: HashMap<String, Arc<OperationCounters>>,
}

impl Window {
    fn new() -> Self {
        Self {
            started_at: SystemTime::now(),
            operations: HashMap::new(),
        }
    }
}

/// Thread-safe outcome metrics, one set of counters per operation name.
///
/// Increments run under the read side of the window lock; only the first
/// attempt of a new operation and [`flush`](Self::flush) take the write side.
#[derive(Debug)]
pub struct MetricsSink {
    config: MetricsConfig,
    window: RwLock<Window>,
    last_window: RwLock<Option<MetricsWindow>>,
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl MetricsSink {
    /// Create a sink with the given configuration.
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            window: RwLock::new(Window::new()),
            last_window: RwLock::new(None),
        }
    }

    /// The sink's configuration.
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    fn with_counters(&self, operation: &str, f: impl FnOnce(&OperationCounters)) {
        {
            let window = self.window.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(counters) = window.operations.get(operation) {
                f(counters);
                return;
            }
        }
        let mut window = self.window.write().unwrap_or_else(PoisonError::into_inner);
        let counters = window
            .operations
            .entry(operation.to_string())
            .or_insert_with(|| {
                Arc::new(OperationCounters::new(self.config.histogram_buckets.clone()))
            });
        f(counters);
    }

    fn counters(&self, operation: &str) -> Option<Arc<OperationCounters>> {
        let window = self.window.read().unwrap_or_else(PoisonError::into_inner);
        window.operations.get(operation).cloned()
    }

    /// Fold one attempt into the counters.
    pub fn record_attempt(&self, record: &AttemptRecord<'_>) {
        self.with_counters(record.operation, |c| {
            let _ = c.category.set(record.category);
            c.attempts.fetch_add(1, Ordering::Relaxed);
            c.latency.observe(record.duration);
            match record.outcome {
                AttemptOutcome::Success => {
                    c.successes.fetch_add(1, Ordering::Relaxed);
                }
                AttemptOutcome::Failure => {
                    fold_failure(c, record.error_kind.unwrap_or(ErrorKind::Internal));
                }
                AttemptOutcome::Ignored => {
                    c.ignored.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }

    /// Record a call that succeeded on attempt `attempts`, `elapsed` after
    /// its first attempt started.
    ///
    /// Counts the successful attempt, and a success-after-retry when
    /// `attempts > 1`. Callers that already folded the attempt through
    /// [`record_attempt`](Self::record_attempt) use
    /// [`record_retry_success`](Self::record_retry_success) instead.
    pub fn record_success(&self, operation: &str, attempts: u32, elapsed: Duration) {
        self.with_counters(operation, |c| {
            c.attempts.fetch_add(1, Ordering::Relaxed);
            c.successes.fetch_add(1, Ordering::Relaxed);
        });
        self.record_retry_success(operation, attempts, elapsed);
    }

    /// Only the success-after-retry part of [`record_success`](Self::record_success).
    pub fn record_retry_success(&self, operation: &str, attempts: u32, elapsed: Duration) {
        if attempts <= 1 {
            return;
        }
        self.with_counters(operation, |c| {
            c.successes_after_retry.fetch_add(1, Ordering::Relaxed);
            c.retry_success_attempts
                .fetch_add(u64::from(attempts), Ordering::Relaxed);
            c.retry_success_elapsed_ms
                .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        });
    }

    /// Count one failed attempt.
    pub fn record_failure(&self, operation: &str, attempt: u32, kind: ErrorKind) {
        tracing::trace!(target: TARGET, operation, attempt, error.kind = %kind, "failure");
        self.with_counters(operation, |c| {
            c.attempts.fetch_add(1, Ordering::Relaxed);
            fold_failure(c, kind);
        });
    }

    /// Count one attempt that failed with an ignored error.
    pub fn record_ignored(&self, operation: &str, kind: ErrorKind) {
        tracing::trace!(target: TARGET, operation, error.kind = %kind, "ignored");
        self.with_counters(operation, |c| {
            c.attempts.fetch_add(1, Ordering::Relaxed);
            c.ignored.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// Record a call that ran out of attempts.
    pub fn record_exhausted(&self, operation: &str, attempts: u32, kind: ErrorKind) {
        tracing::trace!(target: TARGET, operation, attempts, error.kind = %kind, "exhausted");
        self.with_counters(operation, |c| {
            c.exhausted.fetch_add(1, Ordering::Relaxed);
            c.exhausted_by_kind[kind.index()].fetch_add(1, Ordering::Relaxed);
        });
    }

    /// Record a call cancelled by its caller after `attempts` attempts.
    pub fn record_cancelled(&self, operation: &str, attempts: u32) {
        tracing::trace!(target: TARGET, operation, attempts, "cancelled");
        self.with_counters(operation, |c| {
            c.cancelled.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// Record a call rejected by an open circuit.
    pub fn record_rejected(&self, operation: &str) {
        self.with_counters(operation, |c| {
            c.rejected.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// Success rate of an operation in the current window (1.0 if unknown).
    pub fn success_rate(&self, operation: &str) -> f64 {
        match self.counters(operation) {
            Some(c) => success_rate(
                c.attempts.load(Ordering::Relaxed),
                c.failures.load(Ordering::Relaxed),
            ),
            None => 1.0,
        }
    }

    /// Median attempt latency estimated from the histogram.
    pub fn p50_latency(&self, operation: &str) -> Option<Duration> {
        self.counters(operation)
            .and_then(|c| c.latency.quantile(0.5))
    }

    /// Counters of one operation; zeroed if the operation is unknown.
    pub fn snapshot(&self, operation: &str) -> OperationMetrics {
        self.counters(operation)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Counters of every operation seen in the current window.
    pub fn snapshot_all(&self) -> BTreeMap<String, OperationMetrics> {
        let window = self.window.read().unwrap_or_else(PoisonError::into_inner);
        window
            .operations
            .iter()
            .map(|(name, c)| (name.clone(), c.snapshot()))
            .collect()
    }

    /// Names of the operations seen in the current window.
    pub fn operations(&self) -> Vec<String> {
        let mut names: Vec<String> = {
            let window = self.window.read().unwrap_or_else(PoisonError::into_inner);
            window.operations.keys().cloned().collect()
        };
        names.sort();
        names
    }

    /// Close the current window: reset all counters and keep the closed
    /// window as the latest one.
    pub fn flush(&self) -> MetricsWindow {
        let closed = {
            let mut window = self.window.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *window, Window::new())
        };
        let snapshot = MetricsWindow {
            started_at: closed.started_at,
            ended_at: SystemTime::now(),
            operations: closed
                .operations
                .iter()
                .map(|(name, c)| (name.clone(), c.snapshot()))
                .collect(),
        };
        tracing::debug!(
            target: TARGET,
            operations = snapshot.operations.len(),
            "metrics window flushed"
        );
        *self
            .last_window
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        snapshot
    }

    /// The window closed by the most recent flush.
    pub fn last_window(&self) -> Option<MetricsWindow> {
        self.last_window
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Export the current window in Prometheus text format.
    pub fn to_prometheus_text(&self) -> String {
        let mut output = String::new();
        let ns = &self.config.namespace;
        let window = self.window.read().unwrap_or_else(PoisonError::into_inner);
        let mut operations: Vec<_> = window
            .operations
            .iter()
            .map(|(name, c)| (name.as_str(), c.snapshot(), c))
            .collect();
        operations.sort_by(|a, b| a.0.cmp(b.0));

        let counters: [(&str, &str, fn(&OperationMetrics) -> u64); 6] = [
            ("attempts_total", "Attempts made", |m| m.attempts),
            ("successes_total", "Successful attempts", |m| m.successes),
            ("ignored_total", "Attempts failed with an ignored error", |m| m.ignored),
            (
                "successes_after_retry_total",
                "Calls that succeeded after at least one retry",
                |m| m.successes_after_retry,
            ),
            ("cancelled_total", "Calls cancelled between attempts", |m| m.cancelled),
            ("rejected_total", "Calls rejected by an open circuit", |m| m.rejected),
        ];

        for (name, help, get) in counters {
            let _ = writeln!(output, "# HELP {ns}_{name} {help}");
            let _ = writeln!(output, "# TYPE {ns}_{name} counter");
            for (op, metrics, _) in &operations {
                let _ = writeln!(output, "{ns}_{name}{{{}}} {}", labels(op, metrics), get(metrics));
            }
            output.push('\n');
        }

        let _ = writeln!(output, "# HELP {ns}_failures_total Failed attempts by error kind");
        let _ = writeln!(output, "# TYPE {ns}_failures_total counter");
        for (op, metrics, _) in &operations {
            let base = labels(op, metrics);
            for (kind, count) in &metrics.failures_by_kind {
                let _ = writeln!(output, "{ns}_failures_total{{{base},kind=\"{kind}\"}} {count}");
            }
        }
        output.push('\n');

        let _ = writeln!(
            output,
            "# HELP {ns}_exhausted_total Calls that ran out of attempts by error kind"
        );
        let _ = writeln!(output, "# TYPE {ns}_exhausted_total counter");
        for (op, metrics, _) in &operations {
            let base = labels(op, metrics);
            for (kind, count) in &metrics.exhausted_by_kind {
                let _ = writeln!(output, "{ns}_exhausted_total{{{base},kind=\"{kind}\"}} {count}");
            }
        }
        output.push('\n');

        let _ = writeln!(
            output,
            "# HELP {ns}_attempt_duration_seconds Attempt duration in seconds"
        );
        let _ = writeln!(output, "# TYPE {ns}_attempt_duration_seconds histogram");
        for (op, metrics, c) in &operations {
            let base = labels(op, metrics);
            let hist = &c.latency;
            for (i, bucket) in hist.buckets.iter().enumerate() {
                let _ = writeln!(
                    output,
                    "{ns}_attempt_duration_seconds_bucket{{{base},le=\"{bucket}\"}} {}",
                    hist.counts[i].load(Ordering::Relaxed)
                );
            }
            let total = hist.total_count();
            let _ = writeln!(
                output,
                "{ns}_attempt_duration_seconds_bucket{{{base},le=\"+Inf\"}} {total}"
            );
            let _ = writeln!(
                output,
                "{ns}_attempt_duration_seconds_sum{{{base}}} {}",
                hist.sum_secs()
            );
            let _ = writeln!(output, "{ns}_attempt_duration_seconds_count{{{base}}} {total}");
        }

        output
    }
}

fn success_rate(attempts: u64, failures: u64) -> f64 {
    if attempts == 0 {
        1.0
    } else {
        (1.0 - failures as f64 / attempts as f64).clamp(0.0, 1.0)
    }
}

fn fold_failure(c: &OperationCounters, kind: ErrorKind) {
    c.failures.fetch_add(1, Ordering::Relaxed);
    c.failures_by_kind[kind.index()].fetch_add(1, Ordering::Relaxed);
}

fn labels(operation: &str, metrics: &OperationMetrics) -> String {
    let operation = escape_label(operation);
    match metrics.category {
        Some(category) => format!("operation=\"{operation}\",category=\"{category}\""),
        None => format!("operation=\"{operation}\""),
    }
}

/// Escape a label value for the text exposition format.
fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
