//! Device client

use super::ClientCore;
use crate::config::DeviceConfig;
use crate::error::IotResult;
use crate::protocol::{MessageData, MessageKind, TopicBuilder, TopicRouter};
use crate::transport::mqtt::{MqttClient, MqttError};
use crate::transport::{OnPublish, QoS, Transport};
use std::ops::{Deref, DerefMut};

/// A device publishing events and receiving commands on its own topics
///
/// Quickstart devices can only publish; commands are neither routed nor
/// subscribed to.
pub struct DeviceClient<T: Transport<Error = MqttError> = MqttClient> {
    config: DeviceConfig,
    core: ClientCore<T>,
}

impl DeviceClient<MqttClient> {
    pub fn new(config: DeviceConfig) -> IotResult<Self> {
        config.validate()?;
        let transport = MqttClient::new(config.mqtt_settings()?)?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport<Error = MqttError>> DeviceClient<T> {
    pub fn with_transport(config: DeviceConfig, transport: T) -> Self {
        let mut router = TopicRouter::new();
        let core = if config.is_quickstart() {
            ClientCore::new(config.client_id(), transport, router)
        } else {
            router.add_route(TopicBuilder::device_commands(), MessageKind::DeviceCommand);
            ClientCore::new(config.client_id(), transport, router)
                .with_startup_subscription(TopicBuilder::device_commands(), QoS::AtLeastOnce)
        };
        Self { config, core }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Publish an event to `iot-2/evt/{event_id}/fmt/{format}`
    pub async fn publish_event(
        &self,
        event_id: &str,
        format: &str,
        data: impl Into<MessageData>,
        qos: QoS,
        on_publish: Option<OnPublish>,
    ) -> IotResult<()> {
        let topic = TopicBuilder::device_event(event_id, format);
        self.core
            .publish(&topic, format, &data.into(), qos, on_publish)
            .await
    }
}

impl<T: Transport<Error = MqttError>> Deref for DeviceClient<T> {
    type Target = ClientCore<T>;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

impl<T: Transport<Error = MqttError>> DerefMut for DeviceClient<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.core
    }
}
