// SPDX-License-Identifier: MIT OR Apache-2.0

//! Alerting, health reporting and the background sweeps that drive them.

pub mod alerts;
pub mod health;
pub mod scheduler;

pub use alerts::{
    Alert, AlertEvaluator, AlertNotifier, AlertThresholds, AlertType, LogNotifier, NotifyError,
    Severity,
};
pub use health::{DependencyStatus, HealthAggregator, HealthReport, HealthStatus};
pub use scheduler::{BackgroundTasks, ScheduleConfig};
