// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client-side log buffering and forwarding.
//!
//! Application code emits leveled log events through a [`RemoteLogger`]. Events are written
//! to a durable local store and a periodic job uploads everything stored to a remote endpoint,
//! purging the store only when the server confirms receipt with `200 OK`. Delivery is
//! at-least-once: a failed upload leaves the records in place for the next tick.
//!
//! - [`store`]: durable sled-backed storage of [`LogRecord`]s
//! - [`store_service`]: single-writer queue in front of the store
//! - [`upload`]: JSON wire format and HTTP delivery
//! - [`executor`]: one read / upload / purge cycle
//! - [`scheduler`]: periodic jobs on the tokio runtime
//! - [`settings`], [`telemetry`], [`config`]: host-facing collaborators

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod error;
pub mod executor;
pub mod logger;
pub mod record;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod store_service;
pub mod telemetry;
pub mod upload;

pub use config::RemoteLoggerEnv;
pub use error::LoggerError;
pub use executor::{SyncError, SyncExecutor, SyncOutcome};
pub use logger::{RemoteLogger, RemoteLoggerConfig, PERIODIC_JOB_TAG};
pub use record::{DeviceInfo, LogEntry, LogLevel, LogRecord, WTF_PRIORITY};
pub use scheduler::{
    AlwaysConnected, JobScheduler, NetworkMonitor, PeriodicJob, SchedulerError, TokioScheduler,
    CONNECTIVITY_RECHECK_INTERVAL, DEFAULT_JOB_INTERVAL,
};
pub use settings::{FileSettings, MemorySettings, SettingsError, SettingsStore};
pub use store::{LogStorage, SchemaHooks, SledLogStore, StoreError};
pub use store_service::{StoreHandle, StoreService};
pub use telemetry::{CountingTelemetry, LoggerTelemetry, NoopTelemetry, TelemetrySnapshot};
pub use upload::{HttpUploadClient, LogUploader, UploadError};
