//! Mock implementations for testing
//!
//! [`MockTransport`] records publishes and subscriptions in memory and lets a
//! test inject inbound messages, so clients can be exercised without a broker.

use crate::protocol::RawMessage;
use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::{OnPublish, QoS, Transport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// A publish seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

impl PublishedMessage {
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

/// Mock transport for testing
///
/// Clones share state, so a test can keep one handle while a client owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    pub should_fail: bool,
    connected: Arc<AtomicBool>,
    message_sender: Arc<std::sync::Mutex<Option<mpsc::Sender<RawMessage>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    fn failure(&self, operation: &str) -> MqttError {
        MqttError::ConnectionFailed {
            address: "mock".to_string(),
            reason: format!("Mock {operation} failure"),
        }
    }

    fn not_connected(&self) -> MqttError {
        MqttError::NotConnected {
            state: ConnectionState::Disconnected("Mock transport not connected".to_string()),
        }
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    pub async fn get_subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.published_messages.lock().await.clear();
        self.subscriptions.lock().await.clear();
    }

    /// Deliver `message` as if it arrived from the broker
    ///
    /// Returns false when no sender is registered or the receiver is gone.
    pub async fn inject(&self, message: RawMessage) -> bool {
        let sender = self
            .message_sender
            .lock()
            .ok()
            .and_then(|sender| sender.clone());
        match sender {
            Some(sender) => sender.send(message).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(self.failure("connection"));
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(MqttError::AlreadyConnected);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(self.failure("subscribe"));
        }
        if !self.is_connected() {
            return Err(self.not_connected());
        }

        let mut subscriptions = self.subscriptions.lock().await;
        match subscriptions.iter_mut().find(|(existing, _)| existing == topic) {
            Some(entry) => entry.1 = qos,
            None => subscriptions.push((topic.to_string(), qos)),
        }
        Ok(())
    }

    /// Records the publish and fires `on_publish` immediately
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        on_publish: Option<OnPublish>,
    ) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(self.failure("publish"));
        }
        if !self.is_connected() {
            return Err(self.not_connected());
        }

        self.published_messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
        });
        if let Some(callback) = on_publish {
            callback();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        if self.is_connected() {
            Some(ConnectionState::Connected)
        } else {
            Some(ConnectionState::Disconnected(
                "Mock disconnection".to_string(),
            ))
        }
    }

    fn set_message_sender(&self, sender: mpsc::Sender<RawMessage>) {
        if let Ok(mut slot) = self.message_sender.lock() {
            *slot = Some(sender);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_requires_connection() {
        let mut transport = MockTransport::new();
        assert!(transport
            .publish("iot-2/evt/a/fmt/json", vec![], QoS::AtMostOnce, None)
            .await
            .is_err());

        transport.connect().await.unwrap();
        transport
            .publish("iot-2/evt/a/fmt/json", b"{}".to_vec(), QoS::AtLeastOnce, None)
            .await
            .unwrap();

        let published = transport.get_published_messages().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
        assert_eq!(published[0].json(), Some(serde_json::json!({})));
    }

    #[tokio::test]
    async fn test_mock_failure_mode() {
        let mut transport = MockTransport::with_failure();
        assert!(transport.connect().await.is_err());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_inject_reaches_sender() {
        let transport = MockTransport::new();
        assert!(!transport.inject(RawMessage::new("t", "x")).await);

        let (tx, mut rx) = mpsc::channel(1);
        transport.set_message_sender(tx);
        assert!(transport.inject(RawMessage::new("t", "x")).await);
        assert_eq!(rx.recv().await.unwrap().topic, "t");
    }
}
