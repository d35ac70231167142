//! Client connection states

use crate::api::client::{expect_status, read_json, status_error, ApiClient};
use crate::api::error::ApiError;
use crate::api::pagination::{deserialize_record, FromApiRecord, IterableList};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const CONNECTION_STATES_URL: &str = "api/v0002/clientconnectionstates";

/// Connection state of one MQTT client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    /// Client id, e.g. `d:org:type:device`
    pub id: String,
    pub connection_status: Option<String>,
    pub last_activity_date_time: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ClientStatus {
    pub fn is_connected(&self) -> bool {
        self.connection_status.as_deref() == Some("connected")
    }
}

impl FromApiRecord for ClientStatus {
    const RESOURCE: &'static str = "client status";

    fn from_record(record: Value, _client: &ApiClient) -> Result<Self, ApiError> {
        deserialize_record(Self::RESOURCE, record)
    }
}

/// Filters accepted by [`ConnectionStatus::find`]
#[derive(Debug, Clone, Default)]
pub struct ClientStatusFilter {
    pub type_id: Option<String>,
    pub device_id: Option<String>,
    /// `connected` or `disconnected`
    pub connection_status: Option<String>,
    pub connected_after: Option<DateTime<Utc>>,
}

impl ClientStatusFilter {
    fn query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();
        if let Some(type_id) = &self.type_id {
            query.push(("deviceType".to_string(), type_id.clone()));
        }
        if let Some(device_id) = &self.device_id {
            query.push(("deviceId".to_string(), device_id.clone()));
        }
        if let Some(status) = &self.connection_status {
            query.push(("connectionStatus".to_string(), status.clone()));
        }
        if let Some(after) = &self.connected_after {
            query.push((
                "connectedAfter".to_string(),
                after.to_rfc3339_opts(SecondsFormat::Millis, true),
            ));
        }
        query
    }
}

/// Read-only view of client connection states
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    client: ApiClient,
}

impl ConnectionStatus {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// State of one client; `None` when the platform has no record of it
    pub async fn get(&self, client_id: &str) -> Result<Option<ClientStatus>, ApiError> {
        let url = format!("{CONNECTION_STATES_URL}/{client_id}");
        let response = self.client.get(&url, &[]).await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = expect_status(response, &[200]).await?;
        let record: Value = read_json(response).await?;
        ClientStatus::from_record(record, &self.client).map(Some)
    }

    pub async fn exists(&self, client_id: &str) -> Result<bool, ApiError> {
        let url = format!("{CONNECTION_STATES_URL}/{client_id}");
        let response = self.client.get(&url, &[]).await?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(status_error(response).await),
        }
    }

    pub fn iter(&self) -> IterableList<ClientStatus> {
        IterableList::new(self.client.clone(), CONNECTION_STATES_URL)
    }

    pub fn find(&self, filter: &ClientStatusFilter) -> IterableList<ClientStatus> {
        self.iter().with_filters(filter.query())
    }
}
