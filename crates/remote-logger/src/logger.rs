// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The logging facade.
//!
//! A [`RemoteLogger`] owns the whole pipeline: a store queue in front of the durable store,
//! the executor that uploads and purges, and the periodic job that drives the executor.
//! Calls made before [`RemoteLogger::initialize`] or after [`RemoteLogger::teardown`] are
//! logged, reported to telemetry, and otherwise ignored.

use std::error::Error;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::RemoteLoggerEnv;
use crate::error::LoggerError;
use crate::executor::{SyncError, SyncExecutor, SyncOutcome};
use crate::record::{DeviceInfo, LogLevel};
use crate::scheduler::{JobScheduler, PeriodicJob, TokioScheduler, DEFAULT_JOB_INTERVAL};
use crate::settings::{
    FileSettings, MemorySettings, SettingsStore, REMOTE_LOGGER_URL, REMOTE_LOGGER_USER_UUID,
};
use crate::store::{LogStorage, SledLogStore, StoreError, TABLE_NAME};
use crate::store_service::{StoreHandle, StoreService};
use crate::telemetry::{LoggerTelemetry, NoopTelemetry};
use crate::upload::{HttpUploadClient, LogUploader};

/// Tag of the periodic flush job.
pub const PERIODIC_JOB_TAG: &str = "REMOTE-LOGGER-PERIODIC-JOB";

/// Collaborators used by a [`RemoteLogger`].
pub struct RemoteLoggerConfig {
    pub settings: Arc<dyn SettingsStore>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub uploader: Arc<dyn LogUploader>,
    pub telemetry: Arc<dyn LoggerTelemetry>,
    pub device: DeviceInfo,
    /// Location of the default store. `None` keeps records in memory only.
    pub database_path: Option<PathBuf>,
}

impl RemoteLoggerConfig {
    /// In-memory settings and store, a tokio scheduler and a plain HTTP client.
    pub fn new(device: DeviceInfo) -> Result<Self, LoggerError> {
        Ok(Self {
            settings: Arc::new(MemorySettings::new()),
            scheduler: Arc::new(TokioScheduler::default()),
            uploader: Arc::new(HttpUploadClient::new(None, None)?),
            telemetry: Arc::new(NoopTelemetry),
            device,
            database_path: None,
        })
    }

    /// On-disk settings and store located from the environment.
    pub fn from_env(env: &RemoteLoggerEnv) -> Result<Self, LoggerError> {
        env.validate()?;
        let mut settings_path = OsString::from(env.db_path.as_os_str());
        settings_path.push(".settings.json");

        Ok(Self {
            settings: Arc::new(FileSettings::open(PathBuf::from(settings_path))?),
            scheduler: Arc::new(TokioScheduler::default()),
            uploader: Arc::new(HttpUploadClient::new(
                env.https_proxy.as_deref(),
                env.request_timeout,
            )?),
            telemetry: Arc::new(NoopTelemetry),
            device: DeviceInfo::current(env.app_version.clone()),
            database_path: Some(env.db_path.clone()),
        })
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn JobScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    #[must_use]
    pub fn with_uploader(mut self, uploader: Arc<dyn LogUploader>) -> Self {
        self.uploader = uploader;
        self
    }

    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn LoggerTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    #[must_use]
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }
}

struct Running {
    store: StoreHandle,
    executor: SyncExecutor,
    service_task: JoinHandle<()>,
}

pub struct RemoteLogger {
    config: RemoteLoggerConfig,
    // Serializes initialize and teardown.
    lifecycle: Mutex<()>,
    running: RwLock<Option<Running>>,
    // Set by the first successful initialize; tells teardown-before-init from a repeat teardown.
    started_once: AtomicBool,
}

impl RemoteLogger {
    pub fn new(config: RemoteLoggerConfig) -> Self {
        Self {
            config,
            lifecycle: Mutex::new(()),
            running: RwLock::new(None),
            started_once: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Starts the pipeline. Calling it again while running does nothing.
    ///
    /// `store` replaces the default sled store and `interval` the default 12 hour flush
    /// period. A failure to register the flush job is logged and does not fail the call;
    /// records are still stored and can be sent with [`RemoteLogger::flush_now`].
    pub async fn initialize(
        &self,
        url: &str,
        user_id: &str,
        store: Option<Arc<dyn LogStorage>>,
        interval: Option<Duration>,
    ) -> Result<(), LoggerError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_initialized() {
            debug!("RemoteLogger already initialised");
            return Ok(());
        }

        let settings = &self.config.settings;
        settings.put_string(REMOTE_LOGGER_USER_UUID, user_id)?;
        settings.put_string(REMOTE_LOGGER_URL, url)?;

        let storage = store.unwrap_or_else(|| self.default_storage());
        let (service, store) = StoreService::new(storage);
        let service_task = tokio::spawn(service.run());
        if let Err(err) = store.setup().await {
            let _ = store.shutdown();
            if let Err(clear_err) = settings.clear() {
                error!("Failed to clear settings after store setup failure: {clear_err}");
            }
            return Err(err.into());
        }

        let executor = SyncExecutor::new(
            store.clone(),
            Arc::clone(&self.config.uploader),
            Arc::clone(&self.config.telemetry),
        );
        let job = {
            let executor = executor.clone();
            let settings = Arc::clone(settings);
            PeriodicJob::new(
                PERIODIC_JOB_TAG,
                interval.unwrap_or(DEFAULT_JOB_INTERVAL),
                move || {
                    let url = settings.get_string(REMOTE_LOGGER_URL, "");
                    drop(executor.dispatch(url));
                },
            )
            .require_network(true)
        };
        if let Err(err) = self.config.scheduler.add_job(job) {
            error!("Job creation failed, your logs will not be synced: {err}");
        }

        *self.running.write().unwrap_or_else(PoisonError::into_inner) = Some(Running {
            store,
            executor,
            service_task,
        });
        self.started_once.store(true, Ordering::SeqCst);
        info!("RemoteLogger initialised");
        Ok(())
    }

    /// Stops the flush job, applies every queued write, closes the store and clears settings.
    ///
    /// Does nothing when the logger is not running. A call before the first initialize is
    /// reported as uninitialised; a repeated call after a teardown is silent.
    pub async fn teardown(&self) -> Result<(), LoggerError> {
        let _lifecycle = self.lifecycle.lock().await;
        let Some(running) = self
            .running
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            if self.started_once.load(Ordering::SeqCst) {
                debug!("RemoteLogger already torn down");
            } else {
                error!("RemoteLogger is not initialised, teardown ignored");
                self.config.telemetry.on_uninitialized("teardown");
            }
            return Ok(());
        };

        self.config.scheduler.remove_job(PERIODIC_JOB_TAG);
        if let Err(err) = running.store.teardown().await {
            error!("Failed to close log store: {err}");
        }
        let _ = running.store.shutdown();
        if let Err(err) = running.service_task.await {
            error!("Log store service ended abnormally: {err}");
        }

        self.config.settings.clear()?;
        info!("RemoteLogger torn down");
        Ok(())
    }

    pub fn verbose(&self, tag: &str, message: &str, error: Option<&(dyn Error + 'static)>) {
        self.log(LogLevel::Verbose, tag, message, error);
    }

    pub fn debug(&self, tag: &str, message: &str, error: Option<&(dyn Error + 'static)>) {
        self.log(LogLevel::Debug, tag, message, error);
    }

    pub fn info(&self, tag: &str, message: &str, error: Option<&(dyn Error + 'static)>) {
        self.log(LogLevel::Info, tag, message, error);
    }

    pub fn warn(&self, tag: &str, message: &str, error: Option<&(dyn Error + 'static)>) {
        self.log(LogLevel::Warn, tag, message, error);
    }

    pub fn error(&self, tag: &str, message: &str, error: Option<&(dyn Error + 'static)>) {
        self.log(LogLevel::Error, tag, message, error);
    }

    pub fn assert(&self, tag: &str, message: &str, error: Option<&(dyn Error + 'static)>) {
        self.log(LogLevel::Assert, tag, message, error);
    }

    pub fn wtf(&self, tag: &str, message: &str, error: Option<&(dyn Error + 'static)>) {
        self.log(LogLevel::Wtf, tag, message, error);
    }

    /// Logs with a numeric priority; unknown priorities are stored as `UNKNOWN`.
    pub fn log_priority(
        &self,
        priority: i32,
        tag: &str,
        message: &str,
        error: Option<&(dyn Error + 'static)>,
    ) {
        self.log(LogLevel::from_priority(priority), tag, message, error);
    }

    /// Enqueues a record and returns without waiting for it to be stored.
    pub fn log(
        &self,
        level: LogLevel,
        tag: &str,
        message: &str,
        error: Option<&(dyn Error + 'static)>,
    ) {
        let running = self.running.read().unwrap_or_else(PoisonError::into_inner);
        let Some(running) = running.as_ref() else {
            error!("RemoteLogger is not initialised, dropping {level} log");
            self.config.telemetry.on_uninitialized("log");
            return;
        };
        if let Err(err) = running.store.insert_log(level, tag, message, error) {
            error!("Failed to enqueue {level} log: {err}");
            self.config
                .telemetry
                .on_storage_error("insert_log", TABLE_NAME, &err);
        }
    }

    /// Runs one flush cycle now against the configured URL.
    pub async fn flush_now(&self) -> Result<SyncOutcome, SyncError> {
        let executor = self
            .running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|running| running.executor.clone());
        let Some(executor) = executor else {
            self.config.telemetry.on_uninitialized("flush_now");
            return Err(StoreError::Uninitialized.into());
        };
        let url = self.config.settings.get_string(REMOTE_LOGGER_URL, "");
        executor.run(&url).await
    }

    /// Number of stored records, or `-1` when unknown or not running.
    pub async fn pending_count(&self) -> i64 {
        let store = self
            .running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|running| running.store.clone());
        match store {
            Some(store) => store.get_count().await,
            None => {
                self.config.telemetry.on_uninitialized("pending_count");
                -1
            }
        }
    }

    fn default_storage(&self) -> Arc<dyn LogStorage> {
        let device = self.config.device.clone();
        let settings = Arc::clone(&self.config.settings);
        let store = match &self.config.database_path {
            Some(path) => SledLogStore::new(path, device, settings),
            None => SledLogStore::ephemeral(device, settings),
        };
        Arc::new(store.with_telemetry(Arc::clone(&self.config.telemetry)))
    }
}
