// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::settings::SettingsError;
use crate::store::StoreError;
use crate::upload::UploadError;

/// Errors returned by the [`RemoteLogger`](crate::RemoteLogger) lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Log store error: {0}")]
    Store(#[from] StoreError),

    #[error("Upload client error: {0}")]
    Client(#[from] UploadError),
}
