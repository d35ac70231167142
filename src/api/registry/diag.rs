//! Device diagnostics: log entries and error codes reported by a device

use crate::api::client::{expect_status, read_json, status_error, ApiClient};
use crate::api::error::ApiError;
use crate::api::pagination::{deserialize_record, FromApiRecord, SimpleList};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

impl TryFrom<u8> for LogSeverity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0 => Ok(LogSeverity::Info),
            1 => Ok(LogSeverity::Warning),
            2 => Ok(LogSeverity::Error),
            other => Err(format!("unknown log severity {other}")),
        }
    }
}

impl From<LogSeverity> for u8 {
    fn from(severity: LogSeverity) -> Self {
        match severity {
            LogSeverity::Info => 0,
            LogSeverity::Warning => 1,
            LogSeverity::Error => 2,
        }
    }
}

/// A diagnostic log entry
///
/// `id`, `type_id` and `device_id` are only set on entries read back from
/// the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLog {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub message: String,
    pub severity: LogSeverity,
    #[serde(default)]
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

impl DeviceLog {
    /// The platform rejects sub-second timestamps, so they are truncated
    pub fn new(
        message: impl Into<String>,
        severity: LogSeverity,
        data: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            type_id: None,
            device_id: None,
            message: message.into(),
            severity,
            data: data.into(),
            timestamp: timestamp.trunc_subsecs(0),
        }
    }
}

impl FromApiRecord for DeviceLog {
    const RESOURCE: &'static str = "device log";

    fn from_record(record: Value, _client: &ApiClient) -> Result<Self, ApiError> {
        deserialize_record(Self::RESOURCE, record)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceErrorCode {
    pub error_code: i64,
    pub timestamp: DateTime<Utc>,
}

impl DeviceErrorCode {
    pub fn new(error_code: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            error_code,
            timestamp: timestamp.trunc_subsecs(0),
        }
    }
}

impl FromApiRecord for DeviceErrorCode {
    const RESOURCE: &'static str = "device error code";

    fn from_record(record: Value, _client: &ApiClient) -> Result<Self, ApiError> {
        deserialize_record(Self::RESOURCE, record)
    }
}

fn diag_path(type_id: &str, device_id: &str, collection: &str) -> String {
    format!("api/v0002/device/types/{type_id}/devices/{device_id}/diag/{collection}")
}

/// Log entries of one device at `.../diag/logs`
#[derive(Debug, Clone)]
pub struct DeviceLogs {
    client: ApiClient,
    path: String,
}

impl DeviceLogs {
    pub fn new(client: ApiClient, type_id: &str, device_id: &str) -> Self {
        Self {
            client,
            path: diag_path(type_id, device_id, "logs"),
        }
    }

    /// Every log entry, in the order the platform returns them
    pub async fn list(&self) -> Result<Vec<DeviceLog>, ApiError> {
        SimpleList::new(self.client.clone(), self.path.clone())
            .try_collect_all()
            .await
    }

    /// Fetch one entry by id; `None` when it does not exist
    pub async fn get(&self, log_id: &str) -> Result<Option<DeviceLog>, ApiError> {
        let response = self.client.get(&self.entry_path(log_id), &[]).await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = expect_status(response, &[200]).await?;
        let record: Value = read_json(response).await?;
        DeviceLog::from_record(record, &self.client).map(Some)
    }

    pub async fn exists(&self, log_id: &str) -> Result<bool, ApiError> {
        let response = self.client.get(&self.entry_path(log_id), &[]).await?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(status_error(response).await),
        }
    }

    pub async fn append(&self, log: &DeviceLog) -> Result<(), ApiError> {
        let response = self.client.post(&self.path, log).await?;
        expect_status(response, &[201]).await?;
        Ok(())
    }

    /// Delete one entry; false when it did not exist
    pub async fn delete(&self, log_id: &str) -> Result<bool, ApiError> {
        let response = self.client.delete(&self.entry_path(log_id)).await?;
        if response.status().as_u16() == 404 {
            return Ok(false);
        }
        expect_status(response, &[204]).await?;
        Ok(true)
    }

    /// Remove every log entry of the device
    pub async fn clear(&self) -> Result<(), ApiError> {
        let response = self.client.delete(&self.path).await?;
        expect_status(response, &[204]).await?;
        Ok(())
    }

    fn entry_path(&self, log_id: &str) -> String {
        format!("{}/{log_id}", self.path)
    }
}

/// Error codes of one device at `.../diag/errorCodes`
///
/// Error codes can only be appended or cleared as a whole.
#[derive(Debug, Clone)]
pub struct DeviceErrorCodes {
    client: ApiClient,
    path: String,
}

impl DeviceErrorCodes {
    pub fn new(client: ApiClient, type_id: &str, device_id: &str) -> Self {
        Self {
            client,
            path: diag_path(type_id, device_id, "errorCodes"),
        }
    }

    pub async fn list(&self) -> Result<Vec<DeviceErrorCode>, ApiError> {
        SimpleList::new(self.client.clone(), self.path.clone())
            .try_collect_all()
            .await
    }

    pub async fn append(&self, error_code: &DeviceErrorCode) -> Result<(), ApiError> {
        let response = self.client.post(&self.path, error_code).await?;
        expect_status(response, &[201]).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), ApiError> {
        let response = self.client.delete(&self.path).await?;
        expect_status(response, &[204]).await?;
        Ok(())
    }
}
