//! Device types

use super::devices::{DeviceInfo, Devices};
use crate::api::client::{expect_status, read_json, status_error, ApiClient};
use crate::api::error::ApiError;
use crate::api::pagination::{deserialize_record, FromApiRecord, IterableList};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

const DEVICE_TYPES_URL: &str = "api/v0002/device/types";

/// A registered device type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceType {
    pub id: String,
    pub description: Option<String>,
    pub class_id: Option<String>,
    pub device_info: Option<DeviceInfo>,
    pub metadata: Option<Value>,
    pub created_date_time: Option<String>,
    pub updated_date_time: Option<String>,
    #[serde(skip)]
    client: Option<ApiClient>,
}

impl DeviceType {
    /// Devices registered under this type
    pub fn devices(&self) -> Result<Devices, ApiError> {
        let client = self.client.as_ref().ok_or(ApiError::Detached {
            resource: "DeviceType",
        })?;
        Ok(Devices::for_type(client.clone(), &self.id))
    }
}

impl FromApiRecord for DeviceType {
    const RESOURCE: &'static str = "device type";

    fn from_record(record: Value, client: &ApiClient) -> Result<Self, ApiError> {
        let mut device_type: DeviceType = deserialize_record(Self::RESOURCE, record)?;
        device_type.client = Some(client.clone());
        Ok(device_type)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = self
            .device_info
            .as_ref()
            .and_then(|info| info.description.as_deref())
            .or(self.description.as_deref())
            .unwrap_or("<No description>");
        write!(f, "[{}] {}", self.id, description)
    }
}

/// Body of a device type registration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTypeCreateRequest {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `Device` or `Gateway`
    pub class_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl DeviceTypeCreateRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            class_id: "Device".to_string(),
            device_info: None,
            metadata: None,
        }
    }

    pub fn gateway(id: impl Into<String>) -> Self {
        Self {
            class_id: "Gateway".to_string(),
            ..Self::new(id)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceTypeUpdate<'a> {
    description: Option<&'a str>,
    device_info: Option<&'a DeviceInfo>,
    metadata: Option<&'a Value>,
}

/// Device types of an organization
#[derive(Debug, Clone)]
pub struct DeviceTypes {
    client: ApiClient,
}

impl DeviceTypes {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    fn type_url(type_id: &str) -> String {
        format!("{DEVICE_TYPES_URL}/{type_id}")
    }

    /// Fetch a device type; `None` when it does not exist
    pub async fn get(&self, type_id: &str) -> Result<Option<DeviceType>, ApiError> {
        let response = self.client.get(&Self::type_url(type_id), &[]).await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = expect_status(response, &[200]).await?;
        let record: Value = read_json(response).await?;
        DeviceType::from_record(record, &self.client).map(Some)
    }

    pub async fn exists(&self, type_id: &str) -> Result<bool, ApiError> {
        let response = self.client.get(&Self::type_url(type_id), &[]).await?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(status_error(response).await),
        }
    }

    /// Delete a device type; false when it did not exist
    pub async fn delete(&self, type_id: &str) -> Result<bool, ApiError> {
        let response = self.client.delete(&Self::type_url(type_id)).await?;
        if response.status().as_u16() == 404 {
            return Ok(false);
        }
        expect_status(response, &[204]).await?;
        Ok(true)
    }

    pub async fn create(&self, request: &DeviceTypeCreateRequest) -> Result<DeviceType, ApiError> {
        let response = self.client.post(DEVICE_TYPES_URL, request).await?;
        let response = expect_status(response, &[201]).await?;
        let record: Value = read_json(response).await?;
        DeviceType::from_record(record, &self.client)
    }

    pub async fn update(
        &self,
        type_id: &str,
        description: Option<&str>,
        device_info: Option<&DeviceInfo>,
        metadata: Option<&Value>,
    ) -> Result<DeviceType, ApiError> {
        let body = DeviceTypeUpdate {
            description,
            device_info,
            metadata,
        };
        let response = self.client.put(&Self::type_url(type_id), &body).await?;
        let response = expect_status(response, &[200]).await?;
        let record: Value = read_json(response).await?;
        DeviceType::from_record(record, &self.client)
    }

    pub fn iter(&self) -> IterableList<DeviceType> {
        IterableList::new(self.client.clone(), DEVICE_TYPES_URL)
    }

    pub fn find<I, K, V>(&self, filters: I) -> IterableList<DeviceType>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.iter().with_filters(filters)
    }
}
