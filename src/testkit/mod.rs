// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test doubles for exercising guarded calls without real dependencies.

use crate::error::{DependencyError, ErrorKind};
use crate::monitor::{Alert, AlertNotifier, NotifyError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// An operation that fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyOperation {
    failures: u32,
    kind: ErrorKind,
    calls: AtomicU32,
}

impl FlakyOperation {
    /// Fail the first `failures` calls with `kind`.
    pub fn new(failures: u32, kind: ErrorKind) -> Self {
        Self {
            failures,
            kind,
            calls: AtomicU32::new(0),
        }
    }

    /// Never succeed.
    pub fn always(kind: ErrorKind) -> Self {
        Self::new(u32::MAX, kind)
    }

    /// Never fail.
    pub fn healthy() -> Self {
        Self::new(0, ErrorKind::Internal)
    }

    /// Returns the 1-based call number on success.
    pub async fn call(&self) -> Result<u32, DependencyError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err(DependencyError::new(
                self.kind,
                format!("injected {} on call {call}", self.kind),
            ))
        } else {
            Ok(call)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Notifier that keeps every delivered alert in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose channel is always down.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Alerts delivered so far, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Delivery attempts, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertNotifier for RecordingNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(NotifyError::Unavailable("recording notifier is down".into()));
        }
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert.clone());
        Ok(())
    }
}
