//! Application client
//!
//! Applications observe every device of an organization: events, connection
//! status, interface state and errors. They can also send commands and
//! publish events on behalf of devices.
//!
//! The subscription helpers return `Ok(false)` without subscribing when the
//! request is not allowed on quickstart.

use super::{ClientCore, ANY};
use crate::api::{ApiClient, Registry};
use crate::config::ApplicationConfig;
use crate::error::IotResult;
use crate::protocol::{MessageData, MessageKind, TopicBuilder, TopicRouter};
use crate::transport::mqtt::{MqttClient, MqttError};
use crate::transport::{OnPublish, QoS, Transport};
use std::ops::{Deref, DerefMut};
use tracing::warn;

pub struct ApplicationClient<T: Transport<Error = MqttError> = MqttClient> {
    config: ApplicationConfig,
    core: ClientCore<T>,
    registry: Option<Registry>,
}

impl ApplicationClient<MqttClient> {
    pub fn new(config: ApplicationConfig) -> IotResult<Self> {
        config.validate()?;
        let transport = MqttClient::new(config.mqtt_settings())?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport<Error = MqttError>> ApplicationClient<T> {
    /// Fails only when the registry API client cannot be built
    pub fn with_transport(config: ApplicationConfig, transport: T) -> IotResult<Self> {
        let router = application_router(config.is_quickstart());
        let registry = if config.is_quickstart() {
            None
        } else {
            Some(Registry::new(ApiClient::new(&config)?))
        };

        let core = ClientCore::new(config.client_id(), transport, router);
        Ok(Self {
            config,
            core,
            registry,
        })
    }

    pub fn config(&self) -> &ApplicationConfig {
        &self.config
    }

    /// Registry API of the organization; `None` on quickstart
    pub fn registry(&self) -> Option<&Registry> {
        self.registry.as_ref()
    }

    pub async fn subscribe_to_device_events(
        &self,
        type_id: &str,
        device_id: &str,
        event_id: &str,
        format: &str,
        qos: QoS,
    ) -> IotResult<bool> {
        if self.config.is_quickstart() && device_id == ANY {
            warn!("QuickStart applications do not support wildcard subscription to events from all devices");
            return Ok(false);
        }
        let topic = TopicBuilder::event(type_id, device_id, event_id, format);
        self.core.subscribe(&topic, qos).await?;
        Ok(true)
    }

    pub async fn subscribe_to_device_status(
        &self,
        type_id: &str,
        device_id: &str,
    ) -> IotResult<bool> {
        if self.config.is_quickstart() && device_id == ANY {
            warn!("QuickStart applications do not support wildcard subscription to device status");
            return Ok(false);
        }
        let topic = TopicBuilder::status(type_id, device_id);
        self.core.subscribe(&topic, QoS::AtMostOnce).await?;
        Ok(true)
    }

    /// Connection status of other applications of the organization
    pub async fn subscribe_to_application_status(&self, app_id: &str) -> IotResult<bool> {
        if self.config.is_quickstart() && app_id == ANY {
            warn!("QuickStart applications do not support wildcard subscription to application status");
            return Ok(false);
        }
        let topic = TopicBuilder::app_status(app_id);
        self.core.subscribe(&topic, QoS::AtMostOnce).await?;
        Ok(true)
    }

    pub async fn subscribe_to_device_errors(&self, type_id: &str, device_id: &str) -> IotResult<bool> {
        if self.config.is_quickstart() && device_id == ANY {
            warn!("QuickStart applications do not support wildcard subscription to error topics");
            return Ok(false);
        }
        let topic = TopicBuilder::device_error(type_id, device_id);
        self.core.subscribe(&topic, QoS::AtMostOnce).await?;
        Ok(true)
    }

    pub async fn subscribe_to_thing_errors(&self, type_id: &str, thing_id: &str) -> IotResult<bool> {
        if self.config.is_quickstart() && thing_id == ANY {
            warn!("QuickStart applications do not support wildcard subscription to error topics");
            return Ok(false);
        }
        let topic = TopicBuilder::thing_error(type_id, thing_id);
        self.core.subscribe(&topic, QoS::AtMostOnce).await?;
        Ok(true)
    }

    pub async fn subscribe_to_device_state(
        &self,
        type_id: &str,
        device_id: &str,
        logical_interface_id: &str,
    ) -> IotResult<bool> {
        if self.config.is_quickstart() {
            warn!("QuickStart applications do not support device state");
            return Ok(false);
        }
        let topic = TopicBuilder::device_state(type_id, device_id, logical_interface_id);
        self.core.subscribe(&topic, QoS::AtMostOnce).await?;
        Ok(true)
    }

    pub async fn subscribe_to_thing_state(
        &self,
        type_id: &str,
        thing_id: &str,
        logical_interface_id: &str,
    ) -> IotResult<bool> {
        if self.config.is_quickstart() {
            warn!("QuickStart applications do not support thing state");
            return Ok(false);
        }
        let topic = TopicBuilder::thing_state(type_id, thing_id, logical_interface_id);
        self.core.subscribe(&topic, QoS::AtMostOnce).await?;
        Ok(true)
    }

    /// Commands sent to devices, as seen by the platform
    pub async fn subscribe_to_device_commands(
        &self,
        type_id: &str,
        device_id: &str,
        command_id: &str,
        format: &str,
    ) -> IotResult<bool> {
        if self.config.is_quickstart() {
            warn!("QuickStart applications do not support commands");
            return Ok(false);
        }
        let topic = TopicBuilder::command(type_id, device_id, command_id, format);
        self.core.subscribe(&topic, QoS::AtMostOnce).await?;
        Ok(true)
    }

    /// Publish an event on behalf of a device
    #[allow(clippy::too_many_arguments)]
    pub async fn publish_event(
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

    /// Send a command to a device; `Ok(false)` on quickstart
    ///
    /// With QoS 1 or 2, `on_publish` fires once the platform has confirmed
    /// delivery.
    #[allow(clippy::too_many_arguments)]
    pub async fn publish_command(
        &self,
        type_id: &str,
        device_id: &str,
        command_id: &str,
        format: &str,
        data: impl Into<MessageData>,
        qos: QoS,
        on_publish: Option<OnPublish>,
    ) -> IotResult<bool> {
        if self.config.is_quickstart() {
            warn!("QuickStart applications do not support sending commands");
            return Ok(false);
        }
        let topic = TopicBuilder::command(type_id, device_id, command_id, format);
        self.core
            .publish(&topic, format, &data.into(), qos, on_publish)
            .await?;
        Ok(true)
    }
}

fn application_router(quickstart: bool) -> TopicRouter {
    let mut router = TopicRouter::new();
    router.add_route(TopicBuilder::event(ANY, ANY, ANY, ANY), MessageKind::Event);
    router.add_route(TopicBuilder::status(ANY, ANY), MessageKind::Status);
    router.add_route(TopicBuilder::app_status(ANY), MessageKind::AppStatus);
    router.add_route(
        TopicBuilder::device_state(ANY, ANY, ANY),
        MessageKind::DeviceState,
    );
    router.add_route(
        TopicBuilder::thing_state(ANY, ANY, ANY),
        MessageKind::ThingState,
    );
    router.add_route(TopicBuilder::device_error(ANY, ANY), MessageKind::DeviceError);
    router.add_route(TopicBuilder::thing_error(ANY, ANY), MessageKind::ThingError);
    if !quickstart {
        router.add_route(TopicBuilder::command(ANY, ANY, ANY, ANY), MessageKind::Command);
    }
    router
}

impl<T: Transport<Error = MqttError>> Deref for ApplicationClient<T> {
    type Target = ClientCore<T>;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

impl<T: Transport<Error = MqttError>> DerefMut for ApplicationClient<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.core
    }
}
