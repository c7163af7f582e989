// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One flush cycle: read every stored record, upload them, purge on success.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::store::StoreError;
use crate::store_service::StoreHandle;
use crate::telemetry::LoggerTelemetry;
use crate::upload::{LogUploader, UploadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing was stored; no request was made.
    Empty,
    Flushed { sent: usize, purged: usize },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("log store: {0}")]
    Store(#[from] StoreError),
    #[error("upload: {0}")]
    Upload(#[from] UploadError),
}

/// Runs flush cycles against a store queue and an uploader.
///
/// Records are purged only after the uploader reports success, so a failed cycle leaves the
/// store untouched and the next cycle sends the same records again.
#[derive(Clone)]
pub struct SyncExecutor {
    store: StoreHandle,
    uploader: Arc<dyn LogUploader>,
    telemetry: Arc<dyn LoggerTelemetry>,
}

impl SyncExecutor {
    pub fn new(
        store: StoreHandle,
        uploader: Arc<dyn LogUploader>,
        telemetry: Arc<dyn LoggerTelemetry>,
    ) -> Self {
        Self {
            store,
            uploader,
            telemetry,
        }
    }

    pub async fn run(&self, url: &str) -> Result<SyncOutcome, SyncError> {
        let logs = self.store.get_logs().await?;
        if logs.is_empty() {
            debug!("No logs to sync");
            return Ok(SyncOutcome::Empty);
        }

        if let Err(err) = self.uploader.send(url, &logs).await {
            self.telemetry.on_upload_error(&err);
            return Err(err.into());
        }

        // Anything inserted since get_logs is purged as well.
        let purged = self.store.purge().await?;
        let sent = logs.len();
        self.telemetry.on_flush_success(sent);
        info!("Synced {sent} logs, purged {purged}");
        Ok(SyncOutcome::Flushed { sent, purged })
    }

    /// Starts a cycle on its own task and returns immediately.
    ///
    /// Errors and panics inside the cycle are logged and reported; the returned handle
    /// itself always completes successfully.
    pub fn dispatch(&self, url: String) -> JoinHandle<()> {
        let executor = self.clone();
        tokio::spawn(async move {
            let cycle = {
                let executor = executor.clone();
                tokio::spawn(async move { executor.run(&url).await })
            };
            match cycle.await {
                Ok(Ok(outcome)) => debug!("Log sync finished: {outcome:?}"),
                Ok(Err(err)) => {
                    error!("Log sync failed: {err}");
                    executor.telemetry.on_cycle_failure(&err.to_string());
                }
                Err(err) => {
                    error!("Log sync task aborted: {err}");
                    executor.telemetry.on_cycle_failure(&err.to_string());
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DeviceInfo, LogLevel, LogRecord};
    use crate::settings::MemorySettings;
    use crate::store::SledLogStore;
    use crate::store_service::StoreService;
    use crate::telemetry::CountingTelemetry;
    use crate::upload::HttpUploadClient;
    use async_trait::async_trait;
    use mockito::Server;

    async fn ready_store() -> StoreHandle {
        let storage = SledLogStore::ephemeral(
            DeviceInfo::current("test"),
            Arc::new(MemorySettings::new()),
        );
        let (service, handle) = StoreService::new(Arc::new(storage));
        tokio::spawn(service.run());
        handle.setup().await.expect("setup failed");
        handle
    }

    fn executor(store: &StoreHandle, telemetry: &CountingTelemetry) -> SyncExecutor {
        SyncExecutor::new(
            store.clone(),
            Arc::new(HttpUploadClient::new(None, None).expect("client")),
            Arc::new(telemetry.clone()),
        )
    }

    #[tokio::test]
    async fn test_successful_upload_purges_store() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let store = ready_store().await;
        for message in ["a", "b", "c"] {
            store.insert_log(LogLevel::Info, "tag", message, None).unwrap();
        }
        let telemetry = CountingTelemetry::default();

        let outcome = executor(&store, &telemetry)
            .run(&format!("{}/logs", server.url()))
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Flushed { sent: 3, purged: 3 });
        assert_eq!(store.get_count().await, 0);
        assert_eq!(telemetry.snapshot().records_flushed, 3);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_keeps_records() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/logs")
            .with_status(500)
            .create_async()
            .await;
        let store = ready_store().await;
        store.insert_log(LogLevel::Error, "tag", "kept", None).unwrap();
        let before = store.get_logs().await.unwrap();
        let telemetry = CountingTelemetry::default();

        let err = executor(&store, &telemetry)
            .run(&format!("{}/logs", server.url()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Upload(UploadError::Rejected { status: 500, .. })
        ));
        assert_eq!(store.get_logs().await.unwrap(), before);
        assert_eq!(telemetry.snapshot().upload_errors, 1);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_records() {
        let store = ready_store().await;
        store.insert_log(LogLevel::Error, "tag", "kept", None).unwrap();
        let telemetry = CountingTelemetry::default();

        let err = executor(&store, &telemetry)
            .run("http://127.0.0.1:1/logs")
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Upload(UploadError::Transport(_))));
        assert_eq!(store.get_count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_store_makes_no_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .expect(0)
            .create_async()
            .await;
        let store = ready_store().await;
        let telemetry = CountingTelemetry::default();

        let outcome = executor(&store, &telemetry)
            .run(&format!("{}/logs", server.url()))
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Empty);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_blank_url_keeps_records() {
        let store = ready_store().await;
        store.insert_log(LogLevel::Info, "tag", "kept", None).unwrap();
        let telemetry = CountingTelemetry::default();

        let err = executor(&store, &telemetry).run("").await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::Upload(UploadError::InvalidDestination(_))
        ));
        assert_eq!(store.get_count().await, 1);
    }

    struct PanickingUploader;

    #[async_trait]
    impl LogUploader for PanickingUploader {
        async fn send(&self, _url: &str, _records: &[LogRecord]) -> Result<(), UploadError> {
            panic!("uploader exploded");
        }
    }

    #[tokio::test]
    async fn test_dispatch_reports_panics_and_errors() {
        let store = ready_store().await;
        store.insert_log(LogLevel::Info, "tag", "kept", None).unwrap();
        let telemetry = CountingTelemetry::default();

        let panicking = SyncExecutor::new(
            store.clone(),
            Arc::new(PanickingUploader),
            Arc::new(telemetry.clone()),
        );
        panicking
            .dispatch("http://localhost/logs".to_string())
            .await
            .expect("dispatch must not propagate panics");

        executor(&store, &telemetry)
            .dispatch(String::new())
            .await
            .expect("dispatch must not propagate errors");

        assert_eq!(telemetry.snapshot().cycle_failures, 2);
        assert_eq!(store.get_count().await, 1);
    }
}
