//! Impure I/O operations for the MQTT client
//!
//! This module owns the rumqttc event loop task, publishes connection state
//! through a watch channel and implements [`Transport`].

use super::connection::{
    configure_mqtt_options, describe_refusal, ConnectionState, MqttError, MqttSettings,
    ReconnectConfig,
};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler};
use super::publish_tracker::PublishTracker;
use crate::error::sanitize_error_message;
use crate::protocol::RawMessage;
use crate::transport::{OnPublish, Transport};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Subscriptions = Arc<std::sync::Mutex<Vec<(String, QoS)>>>;

/// State shared between the caller and the event loop task
#[derive(Clone)]
struct EventLoopShared {
    client: Arc<Mutex<AsyncClient>>,
    state_tx: watch::Sender<ConnectionState>,
    subscriptions: Subscriptions,
    message_forwarder: Arc<std::sync::Mutex<MessageForwarder>>,
    publish_tracker: Arc<PublishTracker>,
}

/// MQTT transport client for the iot-2 platform
pub struct MqttClient {
    settings: MqttSettings,
    address: String,
    client: Arc<Mutex<AsyncClient>>,
    event_loop: std::sync::Mutex<Option<EventLoop>>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    reconnect_config: ReconnectConfig,
    ready_timeout: Duration,
    subscriptions: Subscriptions,
    message_forwarder: Arc<std::sync::Mutex<MessageForwarder>>,
    publish_tracker: Arc<PublishTracker>,
}

impl MqttClient {
    /// How long publish and subscribe wait for a session before failing
    pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(settings: MqttSettings) -> Result<Self, MqttError> {
        let address = settings.endpoint()?.address();
        let (client, event_loop) = Self::create_connection(&settings)?;

        Ok(MqttClient {
            settings,
            address,
            client: Arc::new(Mutex::new(client)),
            event_loop: std::sync::Mutex::new(Some(event_loop)),
            event_loop_handle: None,
            state_rx: None,
            state_tx: None,
            shutdown_tx: None,
            reconnect_config: ReconnectConfig::default(),
            ready_timeout: Self::DEFAULT_READY_TIMEOUT,
            subscriptions: Arc::new(std::sync::Mutex::new(Vec::new())),
            message_forwarder: Arc::new(std::sync::Mutex::new(MessageForwarder::new())),
            publish_tracker: Arc::new(PublishTracker::new()),
        })
    }

    /// Override the wait for a connected session used by publish and subscribe
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    /// Broker `host:port` this client connects to
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn client_id(&self) -> &str {
        &self.settings.client_id
    }

    /// Set the sender inbound messages are forwarded to
    pub fn set_message_sender(&self, sender: mpsc::Sender<RawMessage>) {
        lock(&self.message_forwarder).set_message_sender(sender);
    }

    /// Helper to create a client and event loop from settings
    /// Used for the first connection and for connecting again after a failure
    fn create_connection(settings: &MqttSettings) -> Result<(AsyncClient, EventLoop), MqttError> {
        let mqtt_options = configure_mqtt_options(settings)?;
        Ok(AsyncClient::new(mqtt_options, 10))
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(ConnectionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
        address: &str,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed {
                        address: address.to_string(),
                        reason: "State channel closed".to_string(),
                    });
                }
                match *state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailed {
                            address: address.to_string(),
                            reason: reason.clone(),
                        });
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => continue,
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectTimeout {
                address: address.to_string(),
            }),
        }
    }

    /// Connect to the broker and wait for the ConnAck
    ///
    /// A refused or failed first connection stops the event loop; once the
    /// session has been established the loop reconnects on its own.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        if self.is_connected() {
            return Err(MqttError::AlreadyConnected);
        }
        self.stop_event_loop();

        let pending = lock(&self.event_loop).take();
        let event_loop = match pending {
            Some(event_loop) => event_loop,
            None => {
                let (client, event_loop) = Self::create_connection(&self.settings)?;
                *self.client.lock().await = client;
                event_loop
            }
        };

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.state_tx = Some(state_tx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let shared = EventLoopShared {
            client: self.client.clone(),
            state_tx,
            subscriptions: self.subscriptions.clone(),
            message_forwarder: self.message_forwarder.clone(),
            publish_tracker: self.publish_tracker.clone(),
        };

        info!(
            client_id = %self.settings.client_id,
            address = %self.address,
            "Connecting to MQTT broker"
        );
        self.event_loop_handle = Some(tokio::spawn(Self::run_event_loop(
            event_loop,
            shared,
            shutdown_rx,
            self.reconnect_config.clone(),
            self.settings.client_id.clone(),
        )));

        match Self::wait_for_connection_confirmation(
            state_rx,
            self.settings.connect_timeout,
            &self.address,
        )
        .await
        {
            Ok(()) => {
                info!(address = %self.address, "Connected to MQTT broker");
                Ok(())
            }
            Err(e) => {
                error!(address = %self.address, error = %e, "Failed to connect to MQTT broker");
                self.stop_event_loop();
                Err(e)
            }
        }
    }

    async fn run_event_loop(
        mut event_loop: EventLoop,
        shared: EventLoopShared,
        mut shutdown_rx: watch::Receiver<bool>,
        reconnect_config: ReconnectConfig,
        client_id: String,
    ) {
        debug!(client_id = %client_id, "Starting MQTT event loop");
        let mut reconnect_attempts = 0u32;
        let mut connected_once = false;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Shutdown signal received, stopping event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    let lost = match event_result {
                        Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                            EventRoute::ConnectionAcknowledged => {
                                connected_once = true;
                                reconnect_attempts = 0;
                                let _ = shared.state_tx.send(ConnectionState::Connected);
                                Self::resubscribe_to_topics(&shared);
                                None
                            }
                            EventRoute::ConnectionRefused(code) => Some(describe_refusal(code)),
                            EventRoute::DisconnectSent => {
                                let _ = shared.state_tx.send(ConnectionState::Disconnected(
                                    "Client disconnected".to_string(),
                                ));
                                break;
                            }
                            route => {
                                Self::process_event_route(route, &shared).await;
                                None
                            }
                        },
                        Err(e) => Some(Self::describe_connection_error(&e)),
                    };

                    if let Some(reason) = lost {
                        warn!(client_id = %client_id, reason = %reason, "MQTT connection lost");
                        let _ = shared.state_tx.send(ConnectionState::Disconnected(reason));
                        if !connected_once {
                            break;
                        }

                        reconnect_attempts += 1;
                        let delay_ms = reconnect_config.calculate_backoff_delay(reconnect_attempts);
                        let _ = shared
                            .state_tx
                            .send(ConnectionState::Reconnecting(reconnect_attempts));
                        info!(
                            "Attempting reconnection {} after {}ms delay",
                            reconnect_attempts, delay_ms
                        );
                        if !Self::interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
                            break;
                        }
                    }
                }
            }
        }
        debug!(client_id = %client_id, "MQTT event loop stopped");
    }

    fn describe_connection_error(error: &ConnectionError) -> String {
        match error {
            ConnectionError::ConnectionRefused(code) => describe_refusal(*code),
            other => sanitize_error_message(&other.to_string()),
        }
    }

    /// Act on a routed event that does not change the connection state
    async fn process_event_route(route: EventRoute, shared: &EventLoopShared) {
        match route {
            EventRoute::MessageReceived(message) => {
                debug!(topic = %message.topic, retain = message.retain, "Received MQTT message");
                let forwarder = lock(&shared.message_forwarder).clone();
                if let Err(e) = forwarder.forward(message).await {
                    debug!("Inbound message not forwarded: {}", e);
                }
            }
            EventRoute::OutgoingPublish(pkid) => shared.publish_tracker.on_outgoing(pkid),
            EventRoute::PublishAcknowledged(pkid) => shared.publish_tracker.on_acknowledged(pkid),
            EventRoute::PublishCompleted(pkid) => shared.publish_tracker.on_completed(pkid),
            EventRoute::SubscriptionConfirmed(pkid) => {
                debug!(pkid, "Subscription confirmed");
            }
            EventRoute::Disconnected => {
                warn!("Broker closed the MQTT session");
                let _ = shared.state_tx.send(ConnectionState::Disconnected(
                    "Disconnected by broker".to_string(),
                ));
            }
            EventRoute::Infrastructure(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
            }
            EventRoute::ConnectionAcknowledged
            | EventRoute::ConnectionRefused(_)
            | EventRoute::DisconnectSent => {}
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                true
            }
        }
    }

    /// Restore every tracked subscription after a ConnAck
    ///
    /// Runs on its own task: the requests are only sent while the event loop
    /// keeps polling.
    fn resubscribe_to_topics(shared: &EventLoopShared) {
        let topics = lock(&shared.subscriptions).clone();
        if topics.is_empty() {
            return;
        }

        let client = shared.client.clone();
        tokio::spawn(async move {
            let client_guard = client.lock().await;
            for (topic, qos) in topics {
                if let Err(e) = client_guard.subscribe(&topic, qos).await {
                    error!("Failed to re-subscribe to {}: {}", topic, e);
                } else {
                    debug!(target: "mqtt_transport", "Re-subscribed to: {}", topic);
                }
            }
        });
    }

    fn stop_event_loop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }

    /// Disconnect from the broker and stop the event loop
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        if self.event_loop_handle.is_none() {
            return Ok(());
        }

        let result = {
            let client = self.client.lock().await;
            client.disconnect().await
        };
        if let Err(e) = &result {
            warn!("Disconnect request failed: {}", e);
        }

        if let Some(handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e);
                }
                Err(_) => warn!("Event loop task didn't shut down gracefully, forcing abort"),
                _ => {}
            }
        }
        self.stop_event_loop();

        if let Some(state_tx) = &self.state_tx {
            let _ = state_tx.send(ConnectionState::Disconnected(
                "Client disconnected".to_string(),
            ));
        }

        info!(address = %self.address, "MQTT client disconnected");
        result.map_err(|e| MqttError::ConnectionFailed {
            address: self.address.clone(),
            reason: e.to_string(),
        })
    }

    /// Get current connection state
    /// Returns None if connection hasn't been attempted yet
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    /// Wait up to the ready timeout for a connected session
    async fn wait_until_connected(&self) -> Result<(), MqttError> {
        let Some(state_rx) = &self.state_rx else {
            return Err(MqttError::NotConnected {
                state: ConnectionState::Disconnected("Client not connected".to_string()),
            });
        };

        let mut state_rx = state_rx.clone();
        let connected = tokio::time::timeout(
            self.ready_timeout,
            state_rx.wait_for(|state| *state == ConnectionState::Connected),
        )
        .await
        .map(|result| result.is_ok())
        .unwrap_or(false);

        if connected {
            Ok(())
        } else {
            Err(MqttError::NotConnected {
                state: state_rx.borrow().clone(),
            })
        }
    }

    /// Publish `payload`, firing `on_publish` once the broker completes it
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        on_publish: Option<OnPublish>,
    ) -> Result<(), MqttError> {
        self.wait_until_connected().await?;

        let seq = {
            let client = self.client.lock().await;
            let seq = self.publish_tracker.begin(qos);
            if let Err(e) = client.publish(topic, qos, false, payload).await {
                self.publish_tracker.abort(seq);
                return Err(MqttError::PublishFailed(e));
            }
            seq
        };
        self.publish_tracker.register(seq, on_publish);

        debug!(topic = %topic, ?qos, "Published message");
        Ok(())
    }

    /// Subscribe to `topic` and restore it on every reconnect
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.wait_until_connected().await?;

        {
            let mut subscriptions = lock(&self.subscriptions);
            match subscriptions.iter_mut().find(|(existing, _)| existing == topic) {
                Some(entry) => entry.1 = qos,
                None => subscriptions.push((topic.to_string(), qos)),
            }
        }

        let client = self.client.lock().await;
        client
            .subscribe(topic, qos)
            .await
            .map_err(MqttError::SubscriptionFailed)?;

        info!("Subscribed to: {}", topic);
        Ok(())
    }

    /// Topics restored on reconnect, in subscription order
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        lock(&self.subscriptions).clone()
    }
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Implementation of Transport trait for MqttClient
#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        MqttClient::subscribe(self, topic, qos).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        on_publish: Option<OnPublish>,
    ) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, payload, qos, on_publish).await
    }

    fn is_connected(&self) -> bool {
        MqttClient::is_connected(self)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }

    fn set_message_sender(&self, sender: mpsc::Sender<RawMessage>) {
        MqttClient::set_message_sender(self, sender)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // Drop can't await disconnect(); it only stops the background task
        self.stop_event_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quickstart_settings() -> MqttSettings {
        MqttSettings::new(
            "a:quickstart:test",
            "quickstart",
            "internetofthings.ibmcloud.com",
        )
    }

    fn assert_transport<T: Transport + Send + Sync + 'static>() {}

    #[test]
    fn test_mqtt_client_is_a_shareable_transport() {
        assert_transport::<MqttClient>();

        let client = MqttClient::new(quickstart_settings()).unwrap();
        assert!(!client.is_connected());
        assert!(lock(&client.event_loop).is_some());
    }

    #[test]
    fn test_setup_connection_channels() {
        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            MqttClient::setup_connection_channels();

        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);
        assert!(!(*shutdown_rx.borrow()));

        state_tx.send(ConnectionState::Connected).unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);

        shutdown_tx.send(true).unwrap();
        assert!(*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Connected);
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result = MqttClient::wait_for_connection_confirmation(
            state_rx,
            Duration::from_millis(500),
            "broker:1883",
        )
        .await;
        assert!(result.is_ok(), "Should successfully wait for connection");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();

        let result = MqttClient::wait_for_connection_confirmation(
            state_rx,
            Duration::from_millis(10),
            "broker:1883",
        )
        .await;
        drop(state_tx);

        assert!(matches!(result, Err(MqttError::ConnectTimeout { .. })));
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_refused() {
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Disconnected(
                "Bad username or password".to_string(),
            ));
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let err = MqttClient::wait_for_connection_confirmation(
            state_rx,
            Duration::from_millis(500),
            "broker:8883",
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to connect to broker:8883: Bad username or password"
        );
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let ((_, _), (_shutdown_tx, shutdown_rx)) = MqttClient::setup_connection_channels();
        assert!(MqttClient::interruptible_sleep(shutdown_rx, 10).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let ((_, _), (shutdown_tx, shutdown_rx)) = MqttClient::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        assert!(!MqttClient::interruptible_sleep(shutdown_rx, 1000).await);
    }

    #[tokio::test]
    async fn test_connection_state_before_connect() {
        let client = MqttClient::new(quickstart_settings()).unwrap();
        assert!(client.connection_state().is_none());
        assert!(!client.is_connected());
        assert_eq!(
            client.address(),
            "quickstart.messaging.internetofthings.ibmcloud.com:1883"
        );
    }

    #[tokio::test]
    async fn test_publish_fails_without_connection() {
        let client = MqttClient::new(quickstart_settings()).unwrap();

        let err = client
            .publish("iot-2/evt/status/fmt/json", b"{}".to_vec(), QoS::AtMostOnce, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MqttError::NotConnected { .. }));

        let err = client
            .subscribe("iot-2/cmd/+/fmt/+", QoS::AtLeastOnce)
            .await
            .unwrap_err();
        assert!(matches!(err, MqttError::NotConnected { .. }));
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let mut client = MqttClient::new(quickstart_settings()).unwrap();
        assert!(client.disconnect().await.is_ok());
    }

    #[test]
    fn test_unsupported_port_rejected_at_construction() {
        let mut settings = quickstart_settings();
        settings.port = Some(9999);
        assert!(matches!(
            MqttClient::new(settings),
            Err(MqttError::InvalidConfiguration(_))
        ));
    }
}
