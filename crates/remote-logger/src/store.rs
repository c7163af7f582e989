// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sled-backed durable storage for log records.
//!
//! Records live in a single tree named [`TABLE_NAME`], keyed by their big-endian id so that
//! iteration order is insertion order. Each value is a JSON row whose field names are the table
//! columns (`log_local_id`, `user_identifier`, `timestamp`, ...). A metadata record next to the
//! table remembers the schema version the table was created with; opening the store with a
//! different version runs the upgrade hook, which by default drops and recreates the table.
//! That upgrade is destructive: buffered logs are lost on a schema bump.
//!
//! The write path tolerates an unopened store by dropping the record, while the read, delete
//! and purge paths treat it as an error. Failures are logged and reported to the configured
//! [`LoggerTelemetry`] sink instead of reaching the caller.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use sled::{Config as SledConfig, Db, Tree};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::record::{DeviceInfo, LogEntry, LogRecord};
use crate::settings::{SettingsStore, REMOTE_LOGGER_USER_UUID};
use crate::telemetry::{LoggerTelemetry, NoopTelemetry};

/// Name of the tree storing log rows.
pub const TABLE_NAME: &str = "remote_logs";
/// Default on-disk database name.
pub const DATABASE_NAME: &str = "RemoteLoggerDb";
/// Schema version written by this build.
pub const DATABASE_VERSION: u32 = 1;

/// Tree name dedicated to store metadata records.
const META_TREE: &str = "__meta";
/// Key for the JSON-encoded [`Metadata`] record.
const META_KEY: &[u8] = b"meta.json";

/// Errors emitted by log storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("log storage is not initialised")]
    Uninitialized,
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("log store queue is closed")]
    QueueClosed,
}

/// Storage contract for buffered log records.
pub trait LogStorage: Send + Sync {
    /// Opens or creates the underlying storage. Idempotent.
    fn setup(&self) -> Result<(), StoreError>;

    /// Durably writes one record. Dropped silently (but reported) when storage is not ready.
    fn insert_log(&self, entry: LogEntry);

    /// Every stored record in ascending id order.
    fn get_logs(&self) -> Result<Vec<LogRecord>, StoreError>;

    /// Removes the record with the given id; absent ids are ignored.
    fn delete_log(&self, id: i64);

    /// Removes every record visible at call time and returns how many were removed.
    fn purge(&self) -> Result<usize, StoreError>;

    /// Number of stored records, or `-1` when the count cannot be determined.
    fn get_count(&self) -> i64;

    /// Releases resources. Safe to call repeatedly, and before `setup`.
    fn teardown(&self);
}

/// Metadata persisted alongside the log table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Metadata {
    pub schema_version: u32,
    pub creation_time: OffsetDateTime,
}

/// Creates the log table. Must be idempotent.
pub type CreateHook = fn(&Db) -> Result<Tree, StoreError>;
/// Migrates the log table from the stored version to the configured one.
pub type UpgradeHook = fn(&Db, u32, u32) -> Result<Tree, StoreError>;

/// Schema callbacks run by [`SledLogStore::setup`].
#[derive(Debug, Clone, Copy)]
pub struct SchemaHooks {
    pub on_create: CreateHook,
    pub on_upgrade: UpgradeHook,
}

impl Default for SchemaHooks {
    fn default() -> Self {
        Self {
            on_create: create_logs_table,
            on_upgrade: recreate_logs_table,
        }
    }
}

/// Opens the log table, creating it when missing.
pub fn create_logs_table(db: &Db) -> Result<Tree, StoreError> {
    Ok(db.open_tree(TABLE_NAME)?)
}

/// Drops the log table and creates it again. Every buffered record is lost.
pub fn recreate_logs_table(db: &Db, old_version: u32, new_version: u32) -> Result<Tree, StoreError> {
    warn!(
        "Upgrading {TABLE_NAME} from schema {old_version} to {new_version}: dropping buffered logs"
    );
    match db.drop_tree(TABLE_NAME) {
        Ok(_) => {}
        // The tree may not exist yet, which is harmless.
        Err(sled::Error::CollectionNotFound(_)) => {}
        Err(err) => return Err(StoreError::Db(err)),
    }
    create_logs_table(db)
}

#[derive(Debug, Clone)]
enum Location {
    Path(PathBuf),
    Ephemeral,
}

#[derive(Debug)]
struct OpenStore {
    db: Db,
    logs: Tree,
}

/// [`LogStorage`] backed by an embedded sled database.
pub struct SledLogStore {
    location: Location,
    schema_version: u32,
    hooks: SchemaHooks,
    device: DeviceInfo,
    settings: Arc<dyn SettingsStore>,
    telemetry: Arc<dyn LoggerTelemetry>,
    // Readers and writers share the handle; teardown takes it exclusively.
    handle: RwLock<Option<OpenStore>>,
}

impl std::fmt::Debug for SledLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledLogStore")
            .field("location", &self.location)
            .field("schema_version", &self.schema_version)
            .field("device", &self.device)
            .finish()
    }
}

impl SledLogStore {
    /// Creates a store persisted at `path`. Nothing is opened until [`LogStorage::setup`].
    pub fn new(
        path: impl AsRef<Path>,
        device: DeviceInfo,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self::with_location(Location::Path(path.as_ref().to_path_buf()), device, settings)
    }

    /// Creates an in-memory store (ephemeral across restarts).
    pub fn ephemeral(device: DeviceInfo, settings: Arc<dyn SettingsStore>) -> Self {
        Self::with_location(Location::Ephemeral, device, settings)
    }

    fn with_location(
        location: Location,
        device: DeviceInfo,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            location,
            schema_version: DATABASE_VERSION,
            hooks: SchemaHooks::default(),
            device,
            settings,
            telemetry: Arc::new(NoopTelemetry),
            handle: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_schema_version(mut self, schema_version: u32) -> Self {
        self.schema_version = schema_version;
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: SchemaHooks) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn LoggerTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Filesystem path backing the store; ephemeral stores return `None`.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::Path(path) => Some(path),
            Location::Ephemeral => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Fetches the schema metadata of an opened store.
    pub fn metadata(&self) -> Result<Metadata, StoreError> {
        let guard = self.handle.read().unwrap_or_else(PoisonError::into_inner);
        let open = guard.as_ref().ok_or(StoreError::Uninitialized)?;
        read_metadata(&open.db)?.ok_or(StoreError::Uninitialized)
    }

    fn open_db(&self) -> Result<Db, StoreError> {
        match &self.location {
            Location::Path(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        // sled does not create intermediate directories automatically.
                        fs::create_dir_all(parent)?;
                    }
                }
                Ok(sled_config(path).open()?)
            }
            Location::Ephemeral => Ok(SledConfig::new().temporary(true).open()?),
        }
    }

    /// Runs the create or upgrade hook depending on the stored schema version.
    fn ensure_schema(&self, db: &Db) -> Result<Tree, StoreError> {
        let logs = match read_metadata(db)? {
            None => {
                let logs = (self.hooks.on_create)(db)?;
                write_metadata(db, self.schema_version)?;
                info!("{TABLE_NAME} created with schema {}", self.schema_version);
                logs
            }
            Some(metadata) if metadata.schema_version == self.schema_version => {
                (self.hooks.on_create)(db)?
            }
            Some(metadata) => {
                let logs = (self.hooks.on_upgrade)(db, metadata.schema_version, self.schema_version)?;
                write_metadata(db, self.schema_version)?;
                logs
            }
        };
        db.flush()?;
        Ok(logs)
    }

    fn report(&self, operation: &str, err: &StoreError) {
        error!("Log storage {operation} on {TABLE_NAME} failed: {err}");
        self.telemetry.on_storage_error(operation, TABLE_NAME, err);
    }

    fn report_uninitialized(&self, operation: &str) {
        error!("Log storage is uninitialised, {operation} ignored");
        self.telemetry.on_uninitialized(operation);
    }

    fn write_record(&self, open: &OpenStore, entry: LogEntry) -> Result<i64, StoreError> {
        // sled ids start at zero; keep the first row at 1 like an autoincrement column.
        let id = open.db.generate_id()? as i64 + 1;
        let record = LogRecord {
            id,
            user_identifier: self.settings.get_string(REMOTE_LOGGER_USER_UUID, ""),
            timestamp: now_millis(),
            os_name: self.device.os_name.clone(),
            os_version: self.device.os_version.clone(),
            app_version: self.device.app_version.clone(),
            tag: entry.tag,
            level: entry.level,
            message: entry.message,
            stack_trace: entry.stack_trace,
        };
        let row = serde_json::to_vec(&record)?;
        open.logs.insert(id_key(id), row)?;
        open.db.flush()?;
        Ok(id)
    }
}

impl LogStorage for SledLogStore {
    fn setup(&self) -> Result<(), StoreError> {
        let mut guard = self.handle.write().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return Ok(());
        }

        let opened = self.open_db().and_then(|db| {
            let logs = self.ensure_schema(&db)?;
            Ok(OpenStore { db, logs })
        });
        match opened {
            Ok(open) => {
                debug!("Log storage ready ({:?})", self.location);
                *guard = Some(open);
                Ok(())
            }
            Err(err) => {
                self.report("setup", &err);
                Err(err)
            }
        }
    }

    fn insert_log(&self, entry: LogEntry) {
        let guard = self.handle.read().unwrap_or_else(PoisonError::into_inner);
        let Some(open) = guard.as_ref() else {
            self.report_uninitialized("insert_log");
            return;
        };
        match self.write_record(open, entry) {
            Ok(id) => debug!("Log {id} inserted into {TABLE_NAME}"),
            Err(err) => self.report("insert_log", &err),
        }
    }

    fn get_logs(&self) -> Result<Vec<LogRecord>, StoreError> {
        let guard = self.handle.read().unwrap_or_else(PoisonError::into_inner);
        let open = guard.as_ref().ok_or(StoreError::Uninitialized)?;

        let mut records = Vec::new();
        for entry in open.logs.iter() {
            let (key, value) = match entry {
                Ok(kv) => kv,
                Err(err) => {
                    // Return what was read so far; the rest is retried next cycle.
                    self.report("get_logs", &StoreError::Db(err));
                    break;
                }
            };
            match serde_json::from_slice::<LogRecord>(&value) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!("Skipping unreadable row {:?} in {TABLE_NAME}", key.as_ref());
                    self.report("get_logs", &StoreError::Serialization(err));
                }
            }
        }
        Ok(records)
    }

    fn delete_log(&self, id: i64) {
        let guard = self.handle.read().unwrap_or_else(PoisonError::into_inner);
        let Some(open) = guard.as_ref() else {
            self.report_uninitialized("delete_log");
            return;
        };
        let removed = open
            .logs
            .remove(id_key(id))
            .and_then(|previous| open.db.flush().map(|_| previous));
        match removed {
            Ok(Some(_)) => debug!("Log {id} deleted from {TABLE_NAME}"),
            Ok(None) => debug!("Log {id} not present in {TABLE_NAME}"),
            Err(err) => self.report("delete_log", &StoreError::Db(err)),
        }
    }

    fn purge(&self) -> Result<usize, StoreError> {
        let guard = self.handle.read().unwrap_or_else(PoisonError::into_inner);
        let open = guard.as_ref().ok_or(StoreError::Uninitialized)?;

        let purged = (|| -> Result<usize, StoreError> {
            let mut batch = sled::Batch::default();
            let mut count = 0;
            for key in open.logs.iter().keys() {
                batch.remove(key?);
                count += 1;
            }
            open.logs.apply_batch(batch)?;
            open.db.flush()?;
            Ok(count)
        })();

        match purged {
            Ok(count) => {
                debug!("Purged {count} logs from {TABLE_NAME}");
                Ok(count)
            }
            Err(err) => {
                self.report("purge", &err);
                Err(err)
            }
        }
    }

    fn get_count(&self) -> i64 {
        let guard = self.handle.read().unwrap_or_else(PoisonError::into_inner);
        let Some(open) = guard.as_ref() else {
            self.report_uninitialized("get_count");
            return -1;
        };
        match open.logs.iter().keys().try_fold(0i64, |count, key| key.map(|_| count + 1)) {
            Ok(count) => count,
            Err(err) => {
                self.report("get_count", &StoreError::Db(err));
                -1
            }
        }
    }

    fn teardown(&self) {
        let mut guard = self.handle.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(open) = guard.take() {
            if let Err(err) = open.db.flush() {
                self.report("teardown", &StoreError::Db(err));
            }
            debug!("Log storage closed");
        }
    }
}

fn read_metadata(db: &Db) -> Result<Option<Metadata>, StoreError> {
    let tree = db.open_tree(META_TREE)?;
    match tree.get(META_KEY)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn write_metadata(db: &Db, schema_version: u32) -> Result<(), StoreError> {
    let metadata = Metadata {
        schema_version,
        creation_time: OffsetDateTime::now_utc(),
    };
    let tree = db.open_tree(META_TREE)?;
    tree.insert(META_KEY, serde_json::to_vec(&metadata)?)?;
    Ok(())
}

/// Big-endian keys sort in numeric order.
fn id_key(id: i64) -> [u8; 8] {
    id.to_be_bytes()
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Builds a sled configuration using the provided filesystem path.
fn sled_config(path: &Path) -> SledConfig {
    SledConfig::new().path(path).cache_capacity(8 * 1024 * 1024)
}
