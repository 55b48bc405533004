// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decides what the retry loop does with a failed attempt.

use crate::error::ErrorKind;
use crate::runtime::RetryPolicy;

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Sleep, then try again.
    Retry,
    /// Hand the original error back; no further attempt, no exhausted metric.
    Ignore,
    /// Stop and report the call as exhausted.
    Fatal,
}

/// Pure classifier over an error kind and a policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify the failure of attempt number `attempt` (1-based).
    ///
    /// The ignore list wins over everything else, even on the last attempt.
    #[must_use]
    pub fn classify(&self, kind: ErrorKind, policy: &RetryPolicy, attempt: u32) -> Classification {
        if policy.is_ignored(kind) {
            Classification::Ignore
        } else if policy.is_retryable(kind) && attempt < policy.max_attempts() {
            Classification::Retry
        } else {
            Classification::Fatal
        }
    }
}
