// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilience primitives for guarded dependency calls.
//!
//! This module provides the building blocks the [`Resilience`](crate::Resilience)
//! facade wires together: retry policies and the retry executor, error
//! classification, circuit breakers, outcome metrics, and the logging and
//! tracing around each attempt.

pub mod circuit_breaker;
pub mod classifier;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod tracing;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitSnapshot,
    CircuitState, CircuitTransition, TransitionCounts, TransitionSink, AUTH_PROVIDER_CIRCUIT,
    NOTIFICATION_CIRCUIT, PAYMENT_CIRCUIT, TRANSITION_CHANNEL_CAPACITY,
};
pub use classifier::{Classification, ErrorClassifier};
pub use logging::{LogLevel, LoggingConfig};
pub use metrics::{
    AttemptOutcome, AttemptRecord, MetricsConfig, MetricsConfigBuilder, MetricsSink,
    MetricsWindow, OperationMetrics,
};
pub use retry::{
    BackoffStrategy, DependencyCategory, NoRetry, PolicyTable, RetryExecutor, RetryOnKinds,
    RetryPolicy, RetryPolicyBuilder, RetryPredicate, TransientErrors,
};
pub use self::tracing::AttemptSpan;
