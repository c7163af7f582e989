// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::record::{LogEntry, LogLevel, LogRecord};
use crate::store::{LogStorage, StoreError};

#[derive(Debug)]
pub enum StoreCommand {
    Setup(oneshot::Sender<Result<(), StoreError>>),
    Insert(LogEntry),
    GetLogs(oneshot::Sender<Result<Vec<LogRecord>, StoreError>>),
    Delete {
        id: i64,
        response_tx: oneshot::Sender<()>,
    },
    Purge(oneshot::Sender<Result<usize, StoreError>>),
    Count(oneshot::Sender<i64>),
    Teardown(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable front of the store queue.
///
/// Inserts are fire-and-forget; every other call waits for the command to reach the front of
/// the queue. A closed queue surfaces as [`StoreError::QueueClosed`].
#[derive(Clone, Debug)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

impl StoreHandle {
    /// Enqueues a record write without waiting for it to be stored.
    pub fn insert_log(
        &self,
        level: LogLevel,
        tag: &str,
        message: &str,
        error: Option<&(dyn Error + 'static)>,
    ) -> Result<(), StoreError> {
        self.insert_entry(LogEntry::new(level, tag, message, error))
    }

    pub fn insert_entry(&self, entry: LogEntry) -> Result<(), StoreError> {
        self.tx
            .send(StoreCommand::Insert(entry))
            .map_err(|_| StoreError::QueueClosed)
    }

    pub async fn setup(&self) -> Result<(), StoreError> {
        self.request(StoreCommand::Setup).await?
    }

    pub async fn get_logs(&self) -> Result<Vec<LogRecord>, StoreError> {
        self.request(StoreCommand::GetLogs).await?
    }

    pub async fn delete_log(&self, id: i64) -> Result<(), StoreError> {
        self.request(|response_tx| StoreCommand::Delete { id, response_tx })
            .await
    }

    pub async fn purge(&self) -> Result<usize, StoreError> {
        self.request(StoreCommand::Purge).await?
    }

    /// Stored record count, or `-1` when it cannot be determined.
    pub async fn get_count(&self) -> i64 {
        self.request(StoreCommand::Count).await.unwrap_or(-1)
    }

    /// Resolves once every command queued before it, including inserts, has been applied.
    pub async fn teardown(&self) -> Result<(), StoreError> {
        self.request(StoreCommand::Teardown).await
    }

    pub fn shutdown(&self) -> Result<(), StoreError> {
        self.tx
            .send(StoreCommand::Shutdown)
            .map_err(|_| StoreError::QueueClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> StoreCommand,
    ) -> Result<T, StoreError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(command(response_tx))
            .map_err(|_| StoreError::QueueClosed)?;
        response_rx.await.map_err(|_| StoreError::QueueClosed)
    }
}

/// Single consumer applying store commands one at a time, in arrival order.
pub struct StoreService {
    storage: Arc<dyn LogStorage>,
    rx: mpsc::UnboundedReceiver<StoreCommand>,
}

impl StoreService {
    pub fn new(storage: Arc<dyn LogStorage>) -> (Self, StoreHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { storage, rx }, StoreHandle { tx })
    }

    pub async fn run(mut self) {
        debug!("Log store service started");

        while let Some(command) = self.rx.recv().await {
            if let StoreCommand::Shutdown = command {
                debug!("Log store service shutting down");
                break;
            }

            // Storage calls block on disk; awaiting each one keeps the queue ordered.
            let storage = Arc::clone(&self.storage);
            if let Err(err) = tokio::task::spawn_blocking(move || execute(storage.as_ref(), command)).await
            {
                error!("Log store command failed to complete: {err}");
            }
        }

        debug!("Log store service stopped");
    }
}

fn execute(storage: &dyn LogStorage, command: StoreCommand) {
    match command {
        StoreCommand::Setup(response_tx) => {
            if response_tx.send(storage.setup()).is_err() {
                error!("Failed to send setup response - receiver dropped");
            }
        }
        StoreCommand::Insert(entry) => storage.insert_log(entry),
        StoreCommand::GetLogs(response_tx) => {
            if response_tx.send(storage.get_logs()).is_err() {
                error!("Failed to send get_logs response - receiver dropped");
            }
        }
        StoreCommand::Delete { id, response_tx } => {
            storage.delete_log(id);
            let _ = response_tx.send(());
        }
        StoreCommand::Purge(response_tx) => {
            if response_tx.send(storage.purge()).is_err() {
                error!("Failed to send purge response - receiver dropped");
            }
        }
        StoreCommand::Count(response_tx) => {
            let _ = response_tx.send(storage.get_count());
        }
        StoreCommand::Teardown(response_tx) => {
            storage.teardown();
            let _ = response_tx.send(());
        }
        StoreCommand::Shutdown => {}
    }
}
