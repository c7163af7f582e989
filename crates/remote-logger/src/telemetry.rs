// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Observability hooks for the logging pipeline.
//!
//! Failures inside the pipeline never reach the host application. Instead they are logged
//! through `tracing` and handed to a [`LoggerTelemetry`] sink, which embedders can implement to
//! forward them to crash reporters or metrics. [`CountingTelemetry`] keeps plain counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::store::StoreError;
use crate::upload::UploadError;

/// Sink invoked whenever the pipeline swallows a failure or finishes a flush.
pub trait LoggerTelemetry: Send + Sync {
    /// A storage operation failed. `operation` names the call, `table` the affected table.
    fn on_storage_error(&self, _operation: &str, _table: &str, _error: &StoreError) {}
    /// A call was made before the component it targets was ready.
    fn on_uninitialized(&self, _operation: &str) {}
    /// An upload attempt failed, either in transport or because the server rejected it.
    fn on_upload_error(&self, _error: &UploadError) {}
    /// A flush cycle uploaded and purged `sent` records.
    fn on_flush_success(&self, _sent: usize) {}
    /// A flush cycle ended with an error or panic that escaped every inner handler.
    fn on_cycle_failure(&self, _message: &str) {}
}

/// Default sink that drops every event. Failures are still visible through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl LoggerTelemetry for NoopTelemetry {}

/// Aggregated counters (all values use relaxed atomics).
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    storage_errors: AtomicU64,
    uninitialized: AtomicU64,
    upload_errors: AtomicU64,
    flush_success: AtomicU64,
    records_flushed: AtomicU64,
    cycle_failures: AtomicU64,
}

impl TelemetryCounters {
    /// Captures a point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            uninitialized: self.uninitialized.load(Ordering::Relaxed),
            upload_errors: self.upload_errors.load(Ordering::Relaxed),
            flush_success: self.flush_success.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            cycle_failures: self.cycle_failures.load(Ordering::Relaxed),
        }
    }
}

/// Plain data representation of [`TelemetryCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub storage_errors: u64,
    pub uninitialized: u64,
    pub upload_errors: u64,
    pub flush_success: u64,
    pub records_flushed: u64,
    pub cycle_failures: u64,
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "storage_errors={}, uninitialized={}, upload_errors={}, flush_success={}, records_flushed={}, cycle_failures={}",
            self.storage_errors,
            self.uninitialized,
            self.upload_errors,
            self.flush_success,
            self.records_flushed,
            self.cycle_failures
        )
    }
}

/// Telemetry implementation that maintains atomic counters for every signal.
#[derive(Debug, Clone)]
pub struct CountingTelemetry {
    counters: Arc<TelemetryCounters>,
}

impl CountingTelemetry {
    pub fn new(counters: Arc<TelemetryCounters>) -> Self {
        Self { counters }
    }

    /// Returns the underlying counter set.
    pub fn counters(&self) -> Arc<TelemetryCounters> {
        self.counters.clone()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.counters.snapshot()
    }
}

impl Default for CountingTelemetry {
    fn default() -> Self {
        Self::new(Arc::new(TelemetryCounters::default()))
    }
}

impl LoggerTelemetry for CountingTelemetry {
    fn on_storage_error(&self, _operation: &str, _table: &str, _error: &StoreError) {
        self.counters.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn on_uninitialized(&self, _operation: &str) {
        self.counters.uninitialized.fetch_add(1, Ordering::Relaxed);
    }

    fn on_upload_error(&self, _error: &UploadError) {
        self.counters.upload_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn on_flush_success(&self, sent: usize) {
        self.counters.flush_success.fetch_add(1, Ordering::Relaxed);
        self.counters
            .records_flushed
            .fetch_add(sent as u64, Ordering::Relaxed);
    }

    fn on_cycle_failure(&self, _message: &str) {
        self.counters.cycle_failures.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_track_every_signal() {
        let telemetry = CountingTelemetry::default();
        telemetry.on_storage_error("insert", "remote_logs", &StoreError::Uninitialized);
        telemetry.on_uninitialized("debug");
        telemetry.on_uninitialized("info");
        telemetry.on_upload_error(&UploadError::InvalidDestination(String::new()));
        telemetry.on_flush_success(3);
        telemetry.on_flush_success(2);
        telemetry.on_cycle_failure("panicked");

        assert_eq!(
            telemetry.snapshot(),
            TelemetrySnapshot {
                storage_errors: 1,
                uninitialized: 2,
                upload_errors: 1,
                flush_success: 2,
                records_flushed: 5,
                cycle_failures: 1,
            }
        );
    }

    #[test]
    fn test_shared_counters_are_visible_through_clones() {
        let telemetry = CountingTelemetry::default();
        let clone = telemetry.clone();
        clone.on_uninitialized("teardown");
        assert_eq!(telemetry.counters().snapshot().uninitialized, 1);
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = TelemetrySnapshot {
            storage_errors: 1,
            ..Default::default()
        };
        assert_eq!(
            snapshot.to_string(),
            "storage_errors=1, uninitialized=0, upload_errors=0, flush_success=0, records_flushed=0, cycle_failures=0"
        );
    }
}
