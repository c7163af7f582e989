// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery of stored records.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{redirect, StatusCode, Url};
use thiserror::Error;
use tracing::debug;

use crate::record::{LogRecord, UploadPayload};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload destination {0:?}")]
    InvalidDestination(String),
    #[error("failed to encode upload body: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Sends a batch of records to a remote endpoint in a single attempt.
#[async_trait]
pub trait LogUploader: Send + Sync {
    async fn send(&self, url: &str, records: &[LogRecord]) -> Result<(), UploadError>;
}

/// [`LogUploader`] posting JSON over HTTP(S).
///
/// A call succeeds only when the server answers `200 OK`. Redirects are returned as-is rather
/// than followed, so they count as rejections.
#[derive(Debug, Clone)]
pub struct HttpUploadClient {
    client: reqwest::Client,
}

impl HttpUploadClient {
    /// Builds a client with an optional HTTPS proxy and request timeout.
    pub fn new(proxy_url: Option<&str>, timeout: Option<Duration>) -> Result<Self, UploadError> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .redirect(redirect::Policy::none());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(proxy) = proxy_url {
            let proxy = reqwest::Proxy::https(proxy)
                .map_err(|err| UploadError::Client(format!("invalid proxy {proxy}: {err}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|err| UploadError::Client(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LogUploader for HttpUploadClient {
    async fn send(&self, url: &str, records: &[LogRecord]) -> Result<(), UploadError> {
        let destination = parse_destination(url)?;
        let body = serde_json::to_vec(&UploadPayload::new(records))?;

        debug!("Uploading {} logs to {destination}", records.len());
        let response = self
            .client
            .post(destination)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!("Upload answered {status}: {body}");

        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(UploadError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn parse_destination(url: &str) -> Result<Url, UploadError> {
    if url.trim().is_empty() {
        return Err(UploadError::InvalidDestination(url.to_string()));
    }
    Url::parse(url).map_err(|_| UploadError::InvalidDestination(url.to_string()))
}
