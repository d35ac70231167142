//! Device, gateway and application clients
//!
//! Each client owns a [`ClientCore`]: the transport, the codec registry and a
//! dispatcher task that turns raw MQTT messages into [`InboundMessage`]s.
//!
//! ```rust,no_run
//! use iot2_sdk::client::DeviceClient;
//! use iot2_sdk::config::DeviceConfig;
//! use iot2_sdk::transport::QoS;
//! use serde_json::json;
//!
//! # async fn example() -> iot2_sdk::IotResult<()> {
//! let config = DeviceConfig::from_env()?;
//! let mut client = DeviceClient::new(config)?;
//! client.connect().await?;
//! client
//!     .publish_event("status", "json", json!({"cpu": 12}), QoS::AtMostOnce, None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod device;
pub mod gateway;

pub use application::ApplicationClient;
pub use device::DeviceClient;
pub use gateway::GatewayClient;

use crate::error::IotResult;
use crate::mqtt_span;
use crate::protocol::{
    CodecRegistry, InboundMessage, MessageCodec, MessageData, MessageError, RawMessage,
    TopicRouter,
};
use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::{OnPublish, QoS, Transport};
use chrono::Utc;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// MQTT single-level wildcard, the default for every subscription helper
pub const ANY: &str = "+";

const RAW_CHANNEL_CAPACITY: usize = 256;

type SharedSender = Arc<std::sync::Mutex<Option<mpsc::Sender<InboundMessage>>>>;

/// State and behavior shared by every client kind
///
/// The routes are fixed at construction; codecs and the message sender can be
/// changed at any time, including while connected.
pub struct ClientCore<T: Transport<Error = MqttError>> {
    client_id: String,
    transport: T,
    codecs: Arc<RwLock<CodecRegistry>>,
    router: Arc<TopicRouter>,
    message_tx: SharedSender,
    dispatcher: Option<JoinHandle<()>>,
    startup_subscriptions: Vec<(String, QoS)>,
}

impl<T: Transport<Error = MqttError>> ClientCore<T> {
    pub fn new(client_id: impl Into<String>, transport: T, router: TopicRouter) -> Self {
        Self {
            client_id: client_id.into(),
            transport,
            codecs: Arc::new(RwLock::new(CodecRegistry::default())),
            router: Arc::new(router),
            message_tx: Arc::new(std::sync::Mutex::new(None)),
            dispatcher: None,
            startup_subscriptions: Vec::new(),
        }
    }

    /// Subscribe to `topic` every time the client connects
    pub fn with_startup_subscription(mut self, topic: impl Into<String>, qos: QoS) -> Self {
        self.startup_subscriptions.push((topic.into(), qos));
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Connect to the platform and start dispatching inbound messages
    pub async fn connect(&mut self) -> IotResult<()> {
        self.ensure_dispatcher();

        info!(client_id = %self.client_id, "Connecting");
        self.transport
            .connect()
            .instrument(mqtt_span!(operation = "connect", client_id = %self.client_id))
            .await?;

        for (topic, qos) in &self.startup_subscriptions {
            self.transport.subscribe(topic, *qos).await?;
        }
        info!(client_id = %self.client_id, "Connected");
        Ok(())
    }

    pub async fn disconnect(&mut self) -> IotResult<()> {
        self.transport.disconnect().await?;
        info!(client_id = %self.client_id, "Disconnected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.transport.connection_state()
    }

    /// Register `codec` for `format`, replacing any codec already registered
    pub fn set_message_codec(&self, format: impl Into<String>, codec: Arc<dyn MessageCodec>) {
        write_lock(&self.codecs).register(format, codec);
    }

    pub fn message_codec(&self, format: &str) -> Option<Arc<dyn MessageCodec>> {
        read_lock(&self.codecs).get(format)
    }

    /// Channel decoded inbound messages are delivered to
    ///
    /// Messages arriving while no sender is set are dropped.
    pub fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        if let Ok(mut slot) = self.message_tx.lock() {
            *slot = Some(sender);
        }
    }

    pub async fn subscribe(&self, topic: &str, qos: QoS) -> IotResult<()> {
        self.transport.subscribe(topic, qos).await?;
        Ok(())
    }

    /// Encode `data` with the codec registered for `format` and publish it
    pub async fn publish(
        &self,
        topic: &str,
        format: &str,
        data: &MessageData,
        qos: QoS,
        on_publish: Option<OnPublish>,
    ) -> IotResult<()> {
        let payload = read_lock(&self.codecs).encode(format, data, Utc::now())?;
        self.transport
            .publish(topic, payload, qos, on_publish)
            .instrument(mqtt_span!(operation = "publish", topic = %topic, format = %format))
            .await?;
        Ok(())
    }

    fn ensure_dispatcher(&mut self) {
        if self.dispatcher.is_some() {
            return;
        }

        let (raw_tx, raw_rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);
        self.transport.set_message_sender(raw_tx);
        self.dispatcher = Some(tokio::spawn(dispatch(
            raw_rx,
            Arc::clone(&self.router),
            Arc::clone(&self.codecs),
            Arc::clone(&self.message_tx),
        )));
    }
}

impl<T: Transport<Error = MqttError>> Drop for ClientCore<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            handle.abort();
        }
    }
}

/// Route, decode and forward inbound messages until the transport goes away
async fn dispatch(
    mut raw_rx: mpsc::Receiver<RawMessage>,
    router: Arc<TopicRouter>,
    codecs: Arc<RwLock<CodecRegistry>>,
    message_tx: SharedSender,
) {
    while let Some(raw) = raw_rx.recv().await {
        let routed = {
            let codecs = read_lock(&codecs);
            router.route(&raw, &codecs)
        };

        let message = match routed {
            Ok(message) => message,
            Err(MessageError::UnsupportedTopic { topic }) => {
                warn!(topic = %topic, "Received message on unsupported topic");
                continue;
            }
            Err(e) => {
                error!(topic = %raw.topic, error = %e, "Dropping message that could not be decoded");
                continue;
            }
        };

        let sender = message_tx.lock().ok().and_then(|sender| sender.clone());
        match sender {
            Some(sender) => {
                debug!(topic = %raw.topic, kind = ?message.kind(), "Dispatching message");
                if sender.send(message).await.is_err() {
                    debug!(topic = %raw.topic, "Message receiver closed, dropping message");
                }
            }
            None => debug!(topic = %raw.topic, "No message receiver set, dropping message"),
        }
    }
    debug!("Message dispatcher stopped");
}

fn read_lock(codecs: &RwLock<CodecRegistry>) -> std::sync::RwLockReadGuard<'_, CodecRegistry> {
    codecs.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock(codecs: &RwLock<CodecRegistry>) -> std::sync::RwLockWriteGuard<'_, CodecRegistry> {
    codecs.write().unwrap_or_else(|e| e.into_inner())
}
