//! Registered devices

use crate::api::client::{expect_status, read_json, status_error, ApiClient};
use crate::api::error::ApiError;
use crate::api::pagination::{deserialize_record, FromApiRecord, IterableList, SimpleList};
use super::diag::{DeviceErrorCodes, DeviceLogs};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Descriptive information registered with a device
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fw_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hw_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptive_location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measured_date_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_date_time: Option<DateTime<Utc>>,
}

impl DeviceLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation: None,
            accuracy: None,
            measured_date_time: None,
            updated_date_time: None,
        }
    }
}

/// Type and device id pair that identifies a device within an organization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUid {
    pub type_id: String,
    pub device_id: String,
}

impl DeviceUid {
    pub fn new(type_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            device_id: device_id.into(),
        }
    }
}

impl fmt::Display for DeviceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_id, self.device_id)
    }
}

/// One entry of a bulk registration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCreateRequest {
    pub type_id: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<DeviceLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl DeviceCreateRequest {
    pub fn new(type_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            device_id: device_id.into(),
            auth_token: None,
            device_info: None,
            location: None,
            metadata: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_device_info(mut self, info: DeviceInfo) -> Self {
        self.device_info = Some(info);
        self
    }

    pub fn with_location(mut self, location: DeviceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Result of one entry of a bulk registration
///
/// The generated `auth_token` cannot be retrieved again later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCreateResponse {
    pub type_id: String,
    pub device_id: String,
    pub success: Option<bool>,
    pub auth_token: Option<String>,
    pub error: Option<Value>,
}

/// Connection log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl FromApiRecord for LogEntry {
    const RESOURCE: &'static str = "log entry";

    fn from_record(record: Value, _client: &ApiClient) -> Result<Self, ApiError> {
        deserialize_record(Self::RESOURCE, record)
    }
}

/// A registered device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub client_id: String,
    pub device_id: String,
    pub type_id: String,
    #[serde(default)]
    pub device_info: DeviceInfo,
    pub metadata: Option<Value>,
    pub status: Option<Value>,
    pub registration: Option<Value>,
    pub refs: Option<Value>,
    /// Only present on freshly registered devices
    pub auth_token: Option<String>,
    #[serde(skip)]
    client: Option<ApiClient>,
}

impl Device {
    fn api(&self) -> Result<&ApiClient, ApiError> {
        self.client
            .as_ref()
            .ok_or(ApiError::Detached { resource: "Device" })
    }

    fn device_path(&self, suffix: &str) -> String {
        format!(
            "api/v0002/device/types/{}/devices/{}/{suffix}",
            self.type_id, self.device_id
        )
    }

    pub fn uid(&self) -> DeviceUid {
        DeviceUid::new(&self.type_id, &self.device_id)
    }

    /// Last reported location; `None` when the device never set one
    pub async fn location(&self) -> Result<Option<DeviceLocation>, ApiError> {
        let response = self.api()?.get(&self.device_path("location"), &[]).await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = expect_status(response, &[200]).await?;
        read_json(response).await.map(Some)
    }

    pub async fn set_location(&self, location: &DeviceLocation) -> Result<DeviceLocation, ApiError> {
        let response = self.api()?.put(&self.device_path("location"), location).await?;
        let response = expect_status(response, &[200]).await?;
        read_json(response).await
    }

    /// Device management state; `None` for unmanaged devices
    pub async fn mgmt(&self) -> Result<Option<Value>, ApiError> {
        let response = self.api()?.get(&self.device_path("mgmt"), &[]).await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = expect_status(response, &[200]).await?;
        read_json(response).await.map(Some)
    }

    /// Diagnostic log entries reported by the device
    pub fn diag_logs(&self) -> Result<DeviceLogs, ApiError> {
        Ok(DeviceLogs::new(
            self.api()?.clone(),
            &self.type_id,
            &self.device_id,
        ))
    }

    /// Diagnostic error codes reported by the device
    pub fn diag_error_codes(&self) -> Result<DeviceErrorCodes, ApiError> {
        Ok(DeviceErrorCodes::new(
            self.api()?.clone(),
            &self.type_id,
            &self.device_id,
        ))
    }

    pub async fn connection_logs(&self) -> Result<Vec<LogEntry>, ApiError> {
        SimpleList::new(self.api()?.clone(), "api/v0002/logs/connection")
            .with_params([
                ("typeId", self.type_id.as_str()),
                ("deviceId", self.device_id.as_str()),
            ])
            .try_collect_all()
            .await
    }
}

impl FromApiRecord for Device {
    const RESOURCE: &'static str = "device";

    fn from_record(record: Value, client: &ApiClient) -> Result<Self, ApiError> {
        let mut device: Device = deserialize_record(Self::RESOURCE, record)?;
        device.client = Some(client.clone());
        Ok(device)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = self
            .device_info
            .description
            .as_deref()
            .unwrap_or("<No description>");
        write!(f, "[{}] {}", self.client_id, description)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.client_id == other.client_id
            && self.device_info == other.device_info
            && self.metadata == other.metadata
            && self.status == other.status
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceUpdate<'a> {
    metadata: Option<&'a Value>,
    device_info: Option<&'a DeviceInfo>,
    status: Option<&'a Value>,
}

/// Devices of an organization, or of one device type
///
/// Unscoped keys are client ids (`d:orgId:typeId:deviceId`); scoped keys are
/// plain device ids.
#[derive(Debug, Clone)]
pub struct Devices {
    client: ApiClient,
    type_id: Option<String>,
}

impl Devices {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            type_id: None,
        }
    }

    pub fn for_type(client: ApiClient, type_id: impl Into<String>) -> Self {
        Self {
            client,
            type_id: Some(type_id.into()),
        }
    }

    pub fn type_id(&self) -> Option<&str> {
        self.type_id.as_deref()
    }

    fn device_url(&self, key: &str) -> Result<String, ApiError> {
        match &self.type_id {
            Some(type_id) => Ok(format!("api/v0002/device/types/{type_id}/devices/{key}")),
            None => {
                let parts: Vec<&str> = key.split(':').collect();
                match parts.as_slice() {
                    [_, _, type_id, device_id] => Ok(format!(
                        "api/v0002/device/types/{type_id}/devices/{device_id}"
                    )),
                    _ => Err(ApiError::InvalidDeviceKey {
                        key: key.to_string(),
                    }),
                }
            }
        }
    }

    /// Fetch a device; `None` when it is not registered
    pub async fn get(&self, key: &str) -> Result<Option<Device>, ApiError> {
        let response = self.client.get(&self.device_url(key)?, &[]).await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = expect_status(response, &[200]).await?;
        let record: Value = read_json(response).await?;
        Device::from_record(record, &self.client).map(Some)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, ApiError> {
        let response = self.client.get(&self.device_url(key)?, &[]).await?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(status_error(response).await),
        }
    }

    /// Delete a device; false when it was not registered
    pub async fn delete(&self, key: &str) -> Result<bool, ApiError> {
        let response = self.client.delete(&self.device_url(key)?).await?;
        if response.status().as_u16() == 404 {
            return Ok(false);
        }
        expect_status(response, &[204]).await?;
        Ok(true)
    }

    /// Register devices in bulk
    pub async fn create(
        &self,
        devices: &[DeviceCreateRequest],
    ) -> Result<Vec<DeviceCreateResponse>, ApiError> {
        let response = self.client.post("api/v0002/bulk/devices/add", devices).await?;
        let response = expect_status(response, &[201, 202]).await?;
        read_json(response).await
    }

    /// Replace a device's metadata, device info and status
    pub async fn update(
        &self,
        uid: &DeviceUid,
        metadata: Option<&Value>,
        device_info: Option<&DeviceInfo>,
        status: Option<&Value>,
    ) -> Result<Device, ApiError> {
        let url = format!(
            "api/v0002/device/types/{}/devices/{}",
            uid.type_id, uid.device_id
        );
        let body = DeviceUpdate {
            metadata,
            device_info,
            status,
        };
        let response = self.client.put(&url, &body).await?;
        let response = expect_status(response, &[200]).await?;
        let record: Value = read_json(response).await?;
        Device::from_record(record, &self.client)
    }

    /// Remove devices in bulk, returning the platform's per-device results
    pub async fn remove(&self, devices: &[DeviceUid]) -> Result<Value, ApiError> {
        let response = self
            .client
            .post("api/v0002/bulk/devices/remove", devices)
            .await?;
        let response = expect_status(response, &[200, 202]).await?;
        read_json(response).await
    }

    /// Every device in scope, sorted by type then device id
    pub fn iter(&self) -> IterableList<Device> {
        match &self.type_id {
            Some(type_id) => IterableList::new(
                self.client.clone(),
                format!("api/v0002/device/types/{type_id}/devices/"),
            )
            .with_sort("deviceId"),
            None => IterableList::new(self.client.clone(), "api/v0002/bulk/devices")
                .with_sort("typeId,deviceId"),
        }
    }

    /// Devices matching the given query parameters
    pub fn find<I, K, V>(&self, filters: I) -> IterableList<Device>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.iter().with_filters(filters)
    }
}
