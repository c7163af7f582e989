// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Environment-driven configuration for hosts embedding the logger.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::LoggerError;
use crate::scheduler::DEFAULT_JOB_INTERVAL;
use crate::store::DATABASE_NAME;

const ENV_URL: &str = "REMOTE_LOGGER_URL";
const ENV_USER_UUID: &str = "REMOTE_LOGGER_USER_UUID";
const ENV_SYNC_INTERVAL_SECS: &str = "REMOTE_LOGGER_SYNC_INTERVAL_SECS";
const ENV_DB_PATH: &str = "REMOTE_LOGGER_DB_PATH";
const ENV_APP_VERSION: &str = "REMOTE_LOGGER_APP_VERSION";
const ENV_LOG_LEVEL: &str = "REMOTE_LOGGER_LOG_LEVEL";
const ENV_PROXY_HTTPS: &str = "REMOTE_LOGGER_PROXY_HTTPS";
const ENV_HTTPS_PROXY: &str = "HTTPS_PROXY";
const ENV_REQUEST_TIMEOUT_SECS: &str = "REMOTE_LOGGER_REQUEST_TIMEOUT_SECS";

const DEFAULT_APP_VERSION: &str = "unknown";
const DEFAULT_LOG_LEVEL: &str = "info";
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLoggerEnv {
    /// Upload endpoint.
    pub url: Option<String>,
    /// Identifier attached to every record.
    pub user_uuid: Option<String>,
    /// Period of the flush job. Defaults to 12 hours.
    pub sync_interval: Duration,
    pub db_path: PathBuf,
    pub app_version: String,
    /// Verbosity of the crate's own diagnostics (trace, debug, info, warn, error).
    pub log_level: String,
    pub https_proxy: Option<String>,
    /// Upload request timeout; `None` keeps the transport default.
    pub request_timeout: Option<Duration>,
}

impl Default for RemoteLoggerEnv {
    fn default() -> Self {
        Self {
            url: None,
            user_uuid: None,
            sync_interval: DEFAULT_JOB_INTERVAL,
            db_path: PathBuf::from(DATABASE_NAME),
            app_version: DEFAULT_APP_VERSION.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            https_proxy: None,
            request_timeout: None,
        }
    }
}

impl RemoteLoggerEnv {
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| map.get(key).and_then(|value| sanitize_non_empty(value));

        let defaults = Self::default();
        Self {
            url: get(ENV_URL),
            user_uuid: get(ENV_USER_UUID),
            sync_interval: get(ENV_SYNC_INTERVAL_SECS)
                .and_then(|secs| secs.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.sync_interval),
            db_path: get(ENV_DB_PATH)
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            app_version: get(ENV_APP_VERSION).unwrap_or(defaults.app_version),
            log_level: get(ENV_LOG_LEVEL)
                .map(|level| level.to_lowercase())
                .unwrap_or(defaults.log_level),
            // The dedicated variable wins over the generic proxy.
            https_proxy: get(ENV_PROXY_HTTPS).or_else(|| get(ENV_HTTPS_PROXY)),
            request_timeout: get(ENV_REQUEST_TIMEOUT_SECS)
                .and_then(|secs| secs.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    pub fn validate(&self) -> Result<(), LoggerError> {
        if self.sync_interval.is_zero() {
            return Err(LoggerError::InvalidConfig(
                "sync interval must be greater than 0".to_string(),
            ));
        }

        if self.db_path.as_os_str().is_empty() {
            return Err(LoggerError::InvalidConfig(
                "database path cannot be empty".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(LoggerError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
