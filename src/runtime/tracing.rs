// SPDX-License-Identifier: MIT OR Apache-2.0

//! Spans for individual dependency attempts.
//!
//! Each attempt made by the retry executor runs inside an [`AttemptSpan`], so
//! a subscriber (fmt, OpenTelemetry, ...) sees one span per call to the
//! dependency with its outcome recorded on close.
//!
//! | Field | Description |
//! |-------|-------------|
//! | `operation` | Logical operation name (e.g. `orders.create`) |
//! | `category` | Dependency category (`database`, `cache`, ...) |
//! | `attempt` | 1-based attempt number |
//! | `outcome` | `success`, `retry`, `ignored` or `exhausted` |
//! | `error.kind` | Error kind of a failed attempt |
//! | `duration_ms` | Attempt duration |

use crate::error::ErrorKind;
use crate::runtime::DependencyCategory;
use std::time::Duration;
use tracing::{field, info_span, Span};

/// A span covering one attempt against a dependency.
#[derive(Debug)]
pub struct AttemptSpan {
    span: Span,
    attempt: u32,
}

impl AttemptSpan {
    /// Create a span for one attempt.
    pub fn new(operation: &str, category: DependencyCategory, attempt: u32) -> Self {
        let span = info_span!(
            "dependency.attempt",
            operation = %operation,
            category = %category,
            attempt = attempt,
            outcome = field::Empty,
            error.kind = field::Empty,
            duration_ms = field::Empty,
        );
        Self { span, attempt }
    }

    /// Get the underlying `tracing::Span`.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// The attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a successful attempt.
    pub fn record_success(&self, duration: Duration) {
        self.span.record("outcome", "success");
        self.span.record("duration_ms", duration.as_millis() as i64);
    }

    /// Record a failed attempt and what the executor did about it.
    pub fn record_failure(&self, kind: ErrorKind, outcome: &'static str, duration: Duration) {
        self.span.record("outcome", outcome);
        self.span.record("error.kind", kind.as_str());
        self.span.record("duration_ms", duration.as_millis() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_span_new() {
        let span = AttemptSpan::new("orders.create", DependencyCategory::Database, 2);
        assert_eq!(span.attempt(), 2);
    }

    #[test]
    fn test_attempt_span_record_outcomes() {
        let span = AttemptSpan::new("session.lookup", DependencyCategory::Cache, 1);
        span.record_success(Duration::from_millis(3));

        let span = AttemptSpan::new("session.lookup", DependencyCategory::Cache, 1);
        span.record_failure(ErrorKind::Timeout, "retry", Duration::from_millis(250));
    }
}
