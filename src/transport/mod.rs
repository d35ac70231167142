//! Transport layer for platform messaging
//!
//! This module provides the transport abstraction the device, gateway and
//! application clients are written against, and its MQTT implementation.

use crate::protocol::RawMessage;
use mqtt::ConnectionState;
use tokio::sync::mpsc;

pub mod mqtt;

pub use rumqttc::QoS;

/// Callback fired once a publish has completed at its QoS level
pub type OnPublish = Box<dyn FnOnce() + Send + 'static>;

/// Transport trait for platform communication
///
/// This trait provides an abstraction over the MQTT session so clients can
/// be driven by a mock in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the session and wait for the broker's acknowledgement
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Close the session
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Subscribe to `topic`; the subscription is restored on every reconnect
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error>;

    /// Publish `payload` to `topic`, firing `on_publish` once it completes
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        on_publish: Option<OnPublish>,
    ) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Current connection state, `None` before the first connect
    fn connection_state(&self) -> Option<ConnectionState>;

    /// Set the sender inbound messages are forwarded to
    fn set_message_sender(&self, sender: mpsc::Sender<RawMessage>);
}
