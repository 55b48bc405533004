// SPDX-License-Identifier: MIT OR Apache-2.0

//! Log levels for retry-loop events.
//!
//! Every attempt outcome is logged through `tracing`. The level of each class
//! of event is configurable so that a noisy dependency can be quietened
//! without touching the subscriber's filter.
//!
//! # Example
//!
//! ```
//! use storefront_resilience::runtime::{LogLevel, LoggingConfig};
//!
//! let logging = LoggingConfig::new()
//!     .with_retry_level(LogLevel::Debug)
//!     .with_success_level(LogLevel::Off);
//! assert_eq!(logging.exhausted_level, LogLevel::Error);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Log level for a class of retry events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level - most verbose.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level.
    Error,
    /// Disabled - no logging.
    Off,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Off => write!(f, "OFF"),
        }
    }
}

/// Levels used by the retry executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// A call succeeded after at least one retry.
    pub success_level: LogLevel,
    /// An attempt failed and another one is scheduled.
    pub retry_level: LogLevel,
    /// An ignored error short-circuited the loop.
    pub ignored_level: LogLevel,
    /// No further attempt was allowed.
    pub exhausted_level: LogLevel,
    /// The caller cancelled between attempts.
    pub cancelled_level: LogLevel,
    /// A silent fallback replaced an exhausted error.
    pub fallback_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            success_level: LogLevel::Info,
            retry_level: LogLevel::Warn,
            ignored_level: LogLevel::Debug,
            exhausted_level: LogLevel::Error,
            cancelled_level: LogLevel::Info,
            fallback_level: LogLevel::Warn,
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the level for successes after retry.
    #[must_use]
    pub fn with_success_level(mut self, level: LogLevel) -> Self {
        self.success_level = level;
        self
    }

    /// Set the level for scheduled retries.
    #[must_use]
    pub fn with_retry_level(mut self, level: LogLevel) -> Self {
        self.retry_level = level;
        self
    }

    /// Set the level for exhausted calls.
    #[must_use]
    pub fn with_exhausted_level(mut self, level: LogLevel) -> Self {
        self.exhausted_level = level;
        self
    }

    /// Set the level for silent fallbacks.
    #[must_use]
    pub fn with_fallback_level(mut self, level: LogLevel) -> Self {
        self.fallback_level = level;
        self
    }

    /// Create a verbose configuration for debugging.
    #[must_use]
    pub fn verbose() -> Self {
        Self {
            success_level: LogLevel::Debug,
            retry_level: LogLevel::Debug,
            ignored_level: LogLevel::Debug,
            exhausted_level: LogLevel::Error,
            cancelled_level: LogLevel::Debug,
            fallback_level: LogLevel::Warn,
        }
    }

    /// Create a quiet configuration: only exhaustion and fallbacks are logged.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            success_level: LogLevel::Off,
            retry_level: LogLevel::Off,
            ignored_level: LogLevel::Off,
            exhausted_level: LogLevel::Warn,
            cancelled_level: LogLevel::Off,
            fallback_level: LogLevel::Warn,
        }
    }
}

/// Emit a `tracing` event at a runtime-selected [`LogLevel`].
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            $crate::runtime::LogLevel::Trace => ::tracing::trace!($($arg)+),
            $crate::runtime::LogLevel::Debug => ::tracing::debug!($($arg)+),
            $crate::runtime::LogLevel::Info => ::tracing::info!($($arg)+),
            $crate::runtime::LogLevel::Warn => ::tracing::warn!($($arg)+),
            $crate::runtime::LogLevel::Error => ::tracing::error!($($arg)+),
            $crate::runtime::LogLevel::Off => {}
        }
    };
}

pub(crate) use log_at;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Trace.to_string(), "TRACE");
        assert_eq!(LogLevel::Debug.to_string(), "DEBUG");
        assert_eq!(LogLevel::Info.to_string(), "INFO");
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
        assert_eq!(LogLevel::Error.to_string(), "ERROR");
        assert_eq!(LogLevel::Off.to_string(), "OFF");
    }

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.success_level, LogLevel::Info);
        assert_eq!(config.retry_level, LogLevel::Warn);
        assert_eq!(config.exhausted_level, LogLevel::Error);
        assert_eq!(config.fallback_level, LogLevel::Warn);
    }

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::new()
            .with_success_level(LogLevel::Debug)
            .with_retry_level(LogLevel::Trace)
            .with_exhausted_level(LogLevel::Warn)
            .with_fallback_level(LogLevel::Error);

        assert_eq!(config.success_level, LogLevel::Debug);
        assert_eq!(config.retry_level, LogLevel::Trace);
        assert_eq!(config.exhausted_level, LogLevel::Warn);
        assert_eq!(config.fallback_level, LogLevel::Error);
    }

    #[test]
    fn test_logging_config_quiet() {
        let config = LoggingConfig::quiet();
        assert_eq!(config.success_level, LogLevel::Off);
        assert_eq!(config.retry_level, LogLevel::Off);
        assert_eq!(config.exhausted_level, LogLevel::Warn);
    }

    #[test]
    fn test_log_level_from_yaml() {
        let config: LoggingConfig = serde_yaml::from_str("retry_level: debug\n").unwrap();
        assert_eq!(config.retry_level, LogLevel::Debug);
        assert_eq!(config.success_level, LogLevel::Info);
    }

    #[test]
    fn test_log_at_off_is_silent() {
        let level = LogLevel::Off;
        log_at!(level, target: "storefront_resilience::retry", "never emitted");
    }
}
