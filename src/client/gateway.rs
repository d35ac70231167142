//! Gateway client
//!
//! A gateway connects once and acts on behalf of the devices behind it: it
//! publishes their events and receives their commands.

use super::{ClientCore, ANY};
use crate::config::GatewayConfig;
use crate::error::IotResult;
use crate::protocol::{MessageData, MessageKind, TopicBuilder, TopicRouter};
use crate::transport::mqtt::{MqttClient, MqttError};
use crate::transport::{OnPublish, QoS, Transport};
use std::ops::{Deref, DerefMut};

pub struct GatewayClient<T: Transport<Error = MqttError> = MqttClient> {
    config: GatewayConfig,
    core: ClientCore<T>,
}

impl GatewayClient<MqttClient> {
    pub fn new(config: GatewayConfig) -> IotResult<Self> {
        config.validate()?;
        let transport = MqttClient::new(config.mqtt_settings()?)?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport<Error = MqttError>> GatewayClient<T> {
    /// Nothing is subscribed automatically; use the `subscribe_to_*` helpers
    ///
    /// Commands for the gateway itself arrive as
    /// [`InboundMessage::GatewayCommand`](crate::protocol::InboundMessage),
    /// commands for the devices behind it as `Command`.
    pub fn with_transport(config: GatewayConfig, transport: T) -> Self {
        let mut router = TopicRouter::new();
        router.add_route(
            TopicBuilder::command(config.type_id(), config.device_id(), ANY, ANY),
            MessageKind::GatewayCommand,
        );
        router.add_route(
            TopicBuilder::notification(config.type_id(), config.device_id()),
            MessageKind::Notification,
        );
        router.add_route(TopicBuilder::command(ANY, ANY, ANY, ANY), MessageKind::Command);

        let core = ClientCore::new(config.client_id(), transport, router);
        Self { config, core }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Publish an event as the gateway itself
    pub async fn publish_event(
        &self,
        event_id: &str,
        format: &str,
        data: impl Into<MessageData>,
        qos: QoS,
        on_publish: Option<OnPublish>,
    ) -> IotResult<()> {
        let topic = TopicBuilder::event(
            self.config.type_id(),
            self.config.device_id(),
            event_id,
            format,
        );
        self.core
            .publish(&topic, format, &data.into(), qos, on_publish)
            .await
    }

    /// Publish an event on behalf of a device behind the gateway
    #[allow(clippy::too_many_arguments)]
    pub async fn publish_device_event(
        &self,
        type_id: &str,
        device_id: &str,
        event_id: &str,
        format: &str,
        data: impl Into<MessageData>,
        qos: QoS,
        on_publish: Option<OnPublish>,
    ) -> IotResult<()> {
        let topic = TopicBuilder::event(type_id, device_id, event_id, format);
        self.core
            .publish(&topic, format, &data.into(), qos, on_publish)
            .await
    }

    /// Commands addressed to a device behind the gateway
    pub async fn subscribe_to_device_commands(
        &self,
        type_id: &str,
        device_id: &str,
        command_id: &str,
        format: &str,
    ) -> IotResult<()> {
        let topic = TopicBuilder::command(type_id, device_id, command_id, format);
        self.core.subscribe(&topic, QoS::AtLeastOnce).await
    }

    /// Commands addressed to the gateway itself
    pub async fn subscribe_to_commands(&self, command_id: &str, format: &str) -> IotResult<()> {
        self.subscribe_to_device_commands(
            self.config.type_id(),
            self.config.device_id(),
            command_id,
            format,
        )
        .await
    }

    pub async fn subscribe_to_notifications(&self) -> IotResult<()> {
        let topic = TopicBuilder::notification(self.config.type_id(), self.config.device_id());
        self.core.subscribe(&topic, QoS::AtMostOnce).await
    }
}

impl<T: Transport<Error = MqttError>> Deref for GatewayClient<T> {
    type Target = ClientCore<T>;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

impl<T: Transport<Error = MqttError>> DerefMut for GatewayClient<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.core
    }
}
