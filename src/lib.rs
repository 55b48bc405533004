// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod config;
pub mod error;
pub mod guard;
pub mod monitor;
pub mod runtime;
pub mod testkit;

pub use config::ResilienceConfig;
pub use error::{AsErrorKind, DependencyError, ErrorKind, ResilienceError, RetryError};
pub use guard::{CallSite, Operator, Resilience, ResilienceBuilder};
pub use monitor::{Alert, AlertNotifier, HealthReport, HealthStatus};
pub use runtime::{CircuitState, DependencyCategory, RetryPolicy};
