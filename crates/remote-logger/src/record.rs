// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log records and the values they are built from.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Numeric priority of the "what a terrible failure" level.
pub const WTF_PRIORITY: i32 = 7447;

/// Severity of a captured log event.
///
/// Stored and transmitted as the uppercase name. Any name or priority that is not recognised
/// decodes to [`LogLevel::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Verbose,
    Debug,
    Info,
    Warn,
    Error,
    Assert,
    Wtf,
    #[serde(other)]
    Unknown,
}

impl LogLevel {
    /// Maps a numeric priority onto a level.
    pub fn from_priority(priority: i32) -> Self {
        match priority {
            2 => LogLevel::Verbose,
            3 => LogLevel::Debug,
            4 => LogLevel::Info,
            5 => LogLevel::Warn,
            6 => LogLevel::Error,
            7 => LogLevel::Assert,
            WTF_PRIORITY => LogLevel::Wtf,
            _ => LogLevel::Unknown,
        }
    }

    /// Canonical uppercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Verbose => "VERBOSE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Assert => "ASSERT",
            LogLevel::Wtf => "WTF",
            LogLevel::Unknown => "UNKNOWN",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "VERBOSE" => LogLevel::Verbose,
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "WARN" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            "ASSERT" => LogLevel::Assert,
            "WTF" => LogLevel::Wtf,
            _ => LogLevel::Unknown,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of the device and host application attached to every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub os_name: String,
    pub os_version: String,
    pub app_version: String,
}

impl DeviceInfo {
    /// Describes the current platform for the given host application version.
    pub fn current(app_version: impl Into<String>) -> Self {
        Self {
            os_name: std::env::consts::OS.to_uppercase(),
            os_version: detect_os_version(),
            app_version: app_version.into(),
        }
    }
}

#[cfg(target_os = "linux")]
fn detect_os_version() -> String {
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|release| release.trim().to_string())
        .ok()
        .filter(|release| !release.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(not(target_os = "linux"))]
fn detect_os_version() -> String {
    "unknown".to_string()
}

/// A log event as handed to the store, before it has been assigned an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub tag: String,
    pub message: String,
    pub stack_trace: String,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        tag: impl Into<String>,
        message: impl Into<String>,
        error: Option<&(dyn Error + 'static)>,
    ) -> Self {
        Self {
            level,
            tag: tag.into(),
            message: message.into(),
            stack_trace: render_stack_trace(error),
        }
    }
}

/// Renders an error and its `source()` chain, one cause per line.
///
/// Returns an empty string when no error is supplied.
pub fn render_stack_trace(error: Option<&(dyn Error + 'static)>) -> String {
    let Some(error) = error else {
        return String::new();
    };
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str("\nCaused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// One stored log event.
///
/// The serde field names are the storage column names; the upload payload uses
/// [`WireLog`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "log_local_id")]
    pub id: i64,
    pub user_identifier: String,
    pub timestamp: i64,
    pub os_name: String,
    pub os_version: String,
    pub app_version: String,
    #[serde(rename = "log_tag")]
    pub tag: String,
    #[serde(rename = "log_level")]
    pub level: LogLevel,
    pub message: String,
    pub stack_trace: String,
}

/// Body of an upload request: `{"logs": [...]}`.
#[derive(Debug, Serialize)]
pub struct UploadPayload<'a> {
    pub logs: Vec<WireLog<'a>>,
}

impl<'a> UploadPayload<'a> {
    pub fn new(records: &'a [LogRecord]) -> Self {
        Self {
            logs: records.iter().map(WireLog::from).collect(),
        }
    }
}

/// A record as external servers expect it. Field names are part of the wire contract.
#[derive(Debug, Serialize)]
pub struct WireLog<'a> {
    pub id: i64,
    #[serde(rename = "userUUID")]
    pub user_uuid: &'a str,
    #[serde(rename = "osName")]
    pub os_name: &'a str,
    #[serde(rename = "osVersion")]
    pub os_version: &'a str,
    #[serde(rename = "appVersion")]
    pub app_version: &'a str,
    #[serde(rename = "logTag")]
    pub log_tag: &'a str,
    #[serde(rename = "logLevel")]
    pub log_level: &'static str,
    pub message: &'a str,
    pub stacktrace: &'a str,
}

impl<'a> From<&'a LogRecord> for WireLog<'a> {
    fn from(record: &'a LogRecord) -> Self {
        Self {
            id: record.id,
            user_uuid: &record.user_identifier,
            os_name: &record.os_name,
            os_version: &record.os_version,
            app_version: &record.app_version,
            log_tag: &record.tag,
            log_level: record.level.as_str(),
            message: &record.message,
            stacktrace: &record.stack_trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn known_record() -> LogRecord {
        LogRecord {
            id: 1,
            user_identifier: "Gurpreet".to_string(),
            timestamp: 123456789,
            os_name: "ANDROID".to_string(),
            os_version: "28".to_string(),
            app_version: "1".to_string(),
            tag: "DEBUG".to_string(),
            level: LogLevel::Debug,
            message: "m".to_string(),
            stack_trace: String::new(),
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] Inner);

    #[derive(Debug, thiserror::Error)]
    #[error("inner failure")]
    struct Inner;

    #[test]
    fn test_priority_mapping() {
        assert_eq!(LogLevel::from_priority(2), LogLevel::Verbose);
        assert_eq!(LogLevel::from_priority(3), LogLevel::Debug);
        assert_eq!(LogLevel::from_priority(4), LogLevel::Info);
        assert_eq!(LogLevel::from_priority(5), LogLevel::Warn);
        assert_eq!(LogLevel::from_priority(6), LogLevel::Error);
        assert_eq!(LogLevel::from_priority(7), LogLevel::Assert);
        assert_eq!(LogLevel::from_priority(WTF_PRIORITY), LogLevel::Wtf);
        assert_eq!(LogLevel::from_priority(42), LogLevel::Unknown);
        assert_eq!(LogLevel::from_priority(-1).as_str(), "UNKNOWN");
    }

    #[test]
    fn test_level_names_round_trip_through_storage_encoding() {
        let encoded = serde_json::to_string(&LogLevel::Wtf).unwrap();
        assert_eq!(encoded, "\"WTF\"");
        let decoded: LogLevel = serde_json::from_str("\"SOMETHING_ELSE\"").unwrap();
        assert_eq!(decoded, LogLevel::Unknown);
        assert_eq!(LogLevel::from_name("ASSERT"), LogLevel::Assert);
        assert_eq!(LogLevel::from_name("info"), LogLevel::Unknown);
    }

    #[test]
    fn test_wire_shape_matches_contract() {
        let records = vec![known_record()];
        let body = serde_json::to_value(UploadPayload::new(&records)).unwrap();
        assert_eq!(
            body,
            json!({
                "logs": [{
                    "id": 1,
                    "userUUID": "Gurpreet",
                    "osName": "ANDROID",
                    "osVersion": "28",
                    "appVersion": "1",
                    "logTag": "DEBUG",
                    "logLevel": "DEBUG",
                    "message": "m",
                    "stacktrace": ""
                }]
            })
        );
        // timestamp is a storage column only
        assert!(body["logs"][0].get("timestamp").is_none());
    }

    #[test]
    fn test_storage_row_uses_column_names() {
        let row = serde_json::to_value(known_record()).unwrap();
        let mut keys: Vec<&str> = row
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "app_version",
                "log_level",
                "log_local_id",
                "log_tag",
                "message",
                "os_name",
                "os_version",
                "stack_trace",
                "timestamp",
                "user_identifier",
            ]
        );
    }

    #[test]
    fn test_stack_trace_rendering() {
        assert_eq!(render_stack_trace(None), "");

        let error = Outer(Inner);
        let rendered = render_stack_trace(Some(&error));
        assert_eq!(rendered, "outer failure\nCaused by: inner failure");

        let entry = LogEntry::new(LogLevel::Error, "tag", "boom", Some(&error));
        assert_eq!(entry.stack_trace, rendered);
    }

    #[test]
    fn test_device_info_uses_uppercase_platform_name() {
        let device = DeviceInfo::current("1.2.3");
        assert_eq!(device.os_name, std::env::consts::OS.to_uppercase());
        assert_eq!(device.app_version, "1.2.3");
        assert!(!device.os_version.is_empty());
    }
}
