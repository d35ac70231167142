//! MQTT 3.1.1 transport over rumqttc
//!
//! Pure functions are separated from I/O for testability:
//!
//! - [`connection`] - endpoint resolution, options and connection state
//! - [`message_handler`] - routing of rumqttc events
//! - [`publish_tracker`] - publish completion callbacks
//! - [`client`] - the event loop task and the [`Transport`](super::Transport) implementation
//!
//! # Usage
//!
//! ```rust,no_run
//! use iot2_sdk::transport::mqtt::{MqttClient, MqttSettings};
//! use iot2_sdk::transport::QoS;
//!
//! # tokio_test::block_on(async {
//! let settings = MqttSettings::new("a:quickstart:monitor", "quickstart", "internetofthings.ibmcloud.com");
//! let mut client = MqttClient::new(settings)?;
//! client.connect().await?;
//! client.subscribe("iot-2/type/+/id/+/evt/+/fmt/+", QoS::AtMostOnce).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;
pub mod publish_tracker;

pub use client::MqttClient;
pub use connection::{
    configure_mqtt_options, describe_refusal, resolve_endpoint, BrokerEndpoint, ConnectionState,
    MqttError, MqttSettings, ReconnectConfig,
};
pub use message_handler::{EventRoute, MessageForwarder, MessageHandler};
pub use publish_tracker::PublishTracker;
