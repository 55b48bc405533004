// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for guarded dependency calls.
//!
//! Failures coming out of a dependency are tagged with an [`ErrorKind`] through
//! the [`AsErrorKind`] trait. The retry loop only ever branches on that tag, so
//! callers keep their own error types and the executor hands them back
//! untouched (or wrapped in [`RetryError`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a dependency failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The dependency did not answer in time.
    Timeout,
    /// The connection was reset or refused.
    ConnectionReset,
    /// The dependency reported itself unavailable.
    Unavailable,
    /// The dependency throttled the caller.
    RateLimited,
    /// The request was rejected as invalid.
    Validation,
    /// The requested entity does not exist.
    NotFound,
    /// Credentials were missing or rejected.
    Unauthorized,
    /// The write conflicted with existing state.
    Conflict,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 9] = [
        ErrorKind::Timeout,
        ErrorKind::ConnectionReset,
        ErrorKind::Unavailable,
        ErrorKind::RateLimited,
        ErrorKind::Validation,
        ErrorKind::NotFound,
        ErrorKind::Unauthorized,
        ErrorKind::Conflict,
        ErrorKind::Internal,
    ];

    /// Number of kinds.
    pub const COUNT: usize = Self::ALL.len();

    /// Stable index into [`ErrorKind::ALL`].
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Snake-case name, as used in configuration and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionReset => "connection_reset",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether the failure is usually transient.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::ConnectionReset
                | ErrorKind::Unavailable
                | ErrorKind::RateLimited
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for extracting an [`ErrorKind`] from an error.
pub trait AsErrorKind {
    /// The kind of this failure.
    fn error_kind(&self) -> ErrorKind;
}

impl AsErrorKind for std::io::Error {
    fn error_kind(&self) -> ErrorKind {
        use std::io::ErrorKind as Io;
        match self.kind() {
            Io::TimedOut | Io::WouldBlock => ErrorKind::Timeout,
            Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::ConnectionRefused
            | Io::BrokenPipe
            | Io::UnexpectedEof => ErrorKind::ConnectionReset,
            Io::NotConnected | Io::AddrNotAvailable => ErrorKind::Unavailable,
            Io::InvalidInput | Io::InvalidData => ErrorKind::Validation,
            Io::NotFound => ErrorKind::NotFound,
            Io::PermissionDenied => ErrorKind::Unauthorized,
            Io::AlreadyExists => ErrorKind::Conflict,
            _ => ErrorKind::Internal,
        }
    }
}

/// A plain dependency failure for callers without an error type of their own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct DependencyError {
    kind: ErrorKind,
    message: String,
}

impl DependencyError {
    /// Create a new dependency error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A timeout failure.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// A dependency-unavailable failure.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// A validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl AsErrorKind for DependencyError {
    fn error_kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Fast-fail error returned while a circuit rejects calls.
///
/// Building one never allocates: the name is shared with the breaker.
#[derive(Debug, Clone, Error)]
#[error("circuit `{name}` is open")]
pub struct CircuitOpenError {
    name: Arc<str>,
    retry_after: Option<Duration>,
}

impl CircuitOpenError {
    pub(crate) fn new(name: Arc<str>, retry_after: Option<Duration>) -> Self {
        Self { name, retry_after }
    }

    /// The rejecting circuit.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time left before the circuit admits a trial call, if known.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

impl AsErrorKind for CircuitOpenError {
    fn error_kind(&self) -> ErrorKind {
        ErrorKind::Unavailable
    }
}

/// Error returned by a guarded call.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The failure kind is on the ignore list; this is the original error.
    #[error(transparent)]
    Ignored(E),

    /// No further attempt was allowed.
    #[error("operation `{operation}` failed after {attempts} attempt(s)")]
    Exhausted {
        /// Logical operation name.
        operation: String,
        /// Attempts made, including the last one.
        attempts: u32,
        /// The final failure.
        #[source]
        source: E,
    },

    /// The caller cancelled between attempts.
    #[error("operation `{operation}` cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Logical operation name.
        operation: String,
        /// Attempts completed before the cancellation was observed.
        attempts: u32,
    },

    /// The dependency's circuit rejected the call; nothing was attempted.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
}

impl<E> RetryError<E> {
    /// Number of attempts behind this error (zero for a rejected call).
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Ignored(_) => 1,
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
            RetryError::CircuitOpen(_) => 0,
        }
    }

    /// The dependency's own error, when one was produced.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Ignored(e) | RetryError::Exhausted { source: e, .. } => Some(e),
            RetryError::Cancelled { .. } | RetryError::CircuitOpen(_) => None,
        }
    }

    /// Whether the circuit rejected the call.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RetryError::CircuitOpen(_))
    }
}

impl<E: AsErrorKind> AsErrorKind for RetryError<E> {
    fn error_kind(&self) -> ErrorKind {
        match self {
            RetryError::Ignored(e) | RetryError::Exhausted { source: e, .. } => e.error_kind(),
            RetryError::Cancelled { .. } => ErrorKind::Internal,
            RetryError::CircuitOpen(e) => e.error_kind(),
        }
    }
}

/// Errors raised by configuration and operator-facing controls.
#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown circuit: {0}")]
    UnknownCircuit(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl AsErrorKind for ResilienceError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            ResilienceError::Config(_) => ErrorKind::Validation,
            ResilienceError::UnknownCircuit(_) => ErrorKind::NotFound,
            ResilienceError::PermissionDenied(_) => ErrorKind::Unauthorized,
        }
    }
}

pub type Result<T> = std::result::Result<T, ResilienceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_index_matches_all() {
        for (i, kind) in ErrorKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        assert_eq!(ErrorKind::COUNT, 9);
    }

    #[test]
    fn test_error_kind_transient() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::RateLimited.is_transient());
        assert!(!ErrorKind::Validation.is_transient());
        assert!(!ErrorKind::Internal.is_transient());
    }

    #[test]
    fn test_io_error_kinds() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(timeout.error_kind(), ErrorKind::Timeout);

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(reset.error_kind(), ErrorKind::ConnectionReset);

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(missing.error_kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_retry_error_messages() {
        let exhausted: RetryError<DependencyError> = RetryError::Exhausted {
            operation: "orders.create".to_string(),
            attempts: 3,
            source: DependencyError::timeout("db"),
        };
        assert_eq!(
            exhausted.to_string(),
            "operation `orders.create` failed after 3 attempt(s)"
        );
        assert_eq!(exhausted.attempts(), 3);
        assert_eq!(exhausted.error_kind(), ErrorKind::Timeout);

        let ignored: RetryError<DependencyError> =
            RetryError::Ignored(DependencyError::validation("bad sku"));
        assert_eq!(ignored.to_string(), "validation: bad sku");
    }

    #[test]
    fn test_circuit_open_error() {
        let err = CircuitOpenError::new(Arc::from("payment"), Some(Duration::from_secs(3)));
        assert_eq!(err.name(), "payment");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(err.to_string(), "circuit `payment` is open");

        let wrapped: RetryError<DependencyError> = err.into();
        assert!(wrapped.is_circuit_open());
        assert_eq!(wrapped.attempts(), 0);
        assert!(wrapped.into_inner().is_none());
    }
}
