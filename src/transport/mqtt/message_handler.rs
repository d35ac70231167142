//! Pure routing of rumqttc events
//!
//! The event loop asks [`MessageHandler::route_mqtt_event`] what an event
//! means and acts on the returned [`EventRoute`]. Inbound publishes are handed
//! to a [`MessageForwarder`], the only impure piece in this module.

use crate::protocol::RawMessage;
use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT event to the action the event loop should take
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) if connack.code == ConnectReturnCode::Success => {
                    EventRoute::ConnectionAcknowledged
                }
                Packet::ConnAck(connack) => EventRoute::ConnectionRefused(connack.code),
                Packet::Publish(publish) => EventRoute::MessageReceived(RawMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                }),
                Packet::PubAck(puback) => EventRoute::PublishAcknowledged(puback.pkid),
                Packet::PubComp(pubcomp) => EventRoute::PublishCompleted(pubcomp.pkid),
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed(suback.pkid),
                Packet::Disconnect => EventRoute::Disconnected,
                other => EventRoute::Infrastructure(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::OutgoingPublish(*pkid),
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(other) => EventRoute::Infrastructure(format!("{other:?}")),
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Session established
    ConnectionAcknowledged,
    /// Broker refused the session
    ConnectionRefused(ConnectReturnCode),
    /// Message received on a subscribed topic
    MessageReceived(RawMessage),
    /// Publish written to the network; QoS 0 publishes carry pkid 0
    OutgoingPublish(u16),
    /// QoS 1 publish acknowledged
    PublishAcknowledged(u16),
    /// QoS 2 publish completed
    PublishCompleted(u16),
    SubscriptionConfirmed(u16),
    /// Broker closed the session
    Disconnected,
    /// Our own disconnect request was written
    DisconnectSent,
    /// Pings and other protocol traffic
    Infrastructure(String),
}

/// Hands inbound messages to whoever registered a sender
#[derive(Debug, Default, Clone)]
pub struct MessageForwarder {
    message_sender: Option<mpsc::Sender<RawMessage>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_message_sender(&mut self, sender: mpsc::Sender<RawMessage>) {
        self.message_sender = Some(sender);
    }

    /// Forward an inbound message (impure I/O)
    pub async fn forward(&self, message: RawMessage) -> Result<(), String> {
        match &self.message_sender {
            Some(sender) => {
                debug!(topic = %message.topic, "Forwarding inbound message");
                sender
                    .send(message)
                    .await
                    .map_err(|e| format!("Failed to forward message: {e}"))
            }
            None => {
                warn!(topic = %message.topic, "Received MQTT message but no message sender configured - message dropped");
                Err("No message sender configured".to_string())
            }
        }
    }
}
