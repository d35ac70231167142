//! Device registry: devices, device types and client connection states

pub mod connection_status;
pub mod devices;
pub mod diag;
pub mod types;

pub use connection_status::{ClientStatus, ClientStatusFilter, ConnectionStatus};
pub use devices::{
    Device, DeviceCreateRequest, DeviceCreateResponse, DeviceInfo, DeviceLocation, DeviceUid,
    Devices, LogEntry,
};
pub use diag::{DeviceErrorCode, DeviceErrorCodes, DeviceLog, DeviceLogs, LogSeverity};
pub use types::{DeviceType, DeviceTypeCreateRequest, DeviceTypes};

use super::ApiClient;

/// Entry point to the registry endpoints
#[derive(Debug, Clone)]
pub struct Registry {
    client: ApiClient,
}

impl Registry {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Every device of the organization
    pub fn devices(&self) -> Devices {
        Devices::new(self.client.clone())
    }

    pub fn device_types(&self) -> DeviceTypes {
        DeviceTypes::new(self.client.clone())
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::new(self.client.clone())
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}
