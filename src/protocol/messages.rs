//! Typed inbound messages and the topic router
//!
//! An inbound [`RawMessage`] is matched against the subscription filters a
//! client registered, parsed with the grammar of the matching kind, and its
//! payload decoded by the codec named in the topic. The result is one
//! [`InboundMessage`] variant.

use super::codec::{CodecRegistry, MessageData, RawMessage};
use super::topics::{
    parse_app_status_topic, parse_command_topic, parse_device_command_topic, parse_device_error_topic,
    parse_device_state_topic, parse_event_topic, parse_notification_topic, parse_status_topic,
    parse_thing_error_topic, parse_thing_state_topic, topic_matches_filter,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

/// Failures while interpreting or producing message payloads
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MessageError {
    #[error("Invalid Event: {reason}")]
    InvalidEvent { reason: String },

    #[error("No message decoder defined for message format: {format}")]
    MissingMessageDecoder { format: String },

    #[error("No message encoder defined for message format: {format}")]
    MissingMessageEncoder { format: String },

    #[error("No route registered for topic: {topic}")]
    UnsupportedTopic { topic: String },
}

impl MessageError {
    pub fn invalid_event<S: Into<String>>(reason: S) -> Self {
        Self::InvalidEvent {
            reason: reason.into(),
        }
    }

    pub fn missing_decoder<S: Into<String>>(format: S) -> Self {
        Self::MissingMessageDecoder {
            format: format.into(),
        }
    }

    pub fn missing_encoder<S: Into<String>>(format: S) -> Self {
        Self::MissingMessageEncoder {
            format: format.into(),
        }
    }
}

/// Device event received by an application
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub type_id: String,
    pub device_id: String,
    pub event_id: String,
    pub format: String,
    pub data: MessageData,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Event {
    pub fn parse(raw: &RawMessage, codecs: &CodecRegistry) -> Result<Self, MessageError> {
        let topic = parse_event_topic(&raw.topic)?;
        let message = codecs.decode(&topic.format, raw)?;
        Ok(Self {
            type_id: topic.type_id,
            device_id: topic.device_id,
            event_id: topic.event_id,
            format: topic.format,
            data: message.data,
            timestamp: message.timestamp,
        })
    }

    /// `typeId:deviceId` of the publishing device
    pub fn device(&self) -> String {
        format!("{}:{}", self.type_id, self.device_id)
    }
}

/// Command addressed to a device, as seen by applications and gateways
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub type_id: String,
    pub device_id: String,
    pub command_id: String,
    pub format: String,
    pub data: MessageData,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Command {
    pub fn parse(raw: &RawMessage, codecs: &CodecRegistry) -> Result<Self, MessageError> {
        let topic = parse_command_topic(&raw.topic)?;
        let message = codecs.decode(&topic.format, raw)?;
        Ok(Self {
            type_id: topic.type_id,
            device_id: topic.device_id,
            command_id: topic.command_id,
            format: topic.format,
            data: message.data,
            timestamp: message.timestamp,
        })
    }

    pub fn device(&self) -> String {
        format!("{}:{}", self.type_id, self.device_id)
    }
}

/// Command received by a device on its own `iot-2/cmd/...` topic
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCommand {
    pub command_id: String,
    pub format: String,
    pub data: MessageData,
    pub timestamp: Option<DateTime<Utc>>,
}

impl DeviceCommand {
    pub fn parse(raw: &RawMessage, codecs: &CodecRegistry) -> Result<Self, MessageError> {
        let topic = parse_device_command_topic(&raw.topic)?;
        let message = codecs.decode(&topic.format, raw)?;
        Ok(Self {
            command_id: topic.command_id,
            format: topic.format,
            data: message.data,
            timestamp: message.timestamp,
        })
    }
}

/// Gateway notification; the topic carries no format and the payload is JSON
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub type_id: String,
    pub device_id: String,
    pub data: MessageData,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Notification {
    pub const FORMAT: &'static str = "json";

    pub fn parse(raw: &RawMessage, codecs: &CodecRegistry) -> Result<Self, MessageError> {
        let topic = parse_notification_topic(&raw.topic)?;
        let message = codecs.decode(Self::FORMAT, raw)?;
        Ok(Self {
            type_id: topic.type_id,
            device_id: topic.device_id,
            data: message.data,
            timestamp: message.timestamp,
        })
    }
}

/// Status payloads are read by key without validation; numeric counters are
/// passed through as sent and text fields accept any scalar.
#[derive(Debug, Default, Deserialize)]
struct StatusPayload {
    #[serde(rename = "ClientAddr", default, deserialize_with = "lenient_text")]
    client_addr: Option<String>,
    #[serde(rename = "Protocol", default, deserialize_with = "lenient_text")]
    protocol: Option<String>,
    #[serde(rename = "ClientID", default, deserialize_with = "lenient_text")]
    client_id: Option<String>,
    #[serde(rename = "User", default, deserialize_with = "lenient_text")]
    user: Option<String>,
    #[serde(rename = "Time")]
    time: Option<DateTime<Utc>>,
    #[serde(rename = "Action", default, deserialize_with = "lenient_text")]
    action: Option<String>,
    #[serde(rename = "ConnectTime")]
    connect_time: Option<DateTime<Utc>>,
    #[serde(rename = "Port")]
    port: Option<Value>,
    #[serde(rename = "WriteMsg")]
    write_msg: Option<Value>,
    #[serde(rename = "ReadMsg")]
    read_msg: Option<Value>,
    #[serde(rename = "Reason", default, deserialize_with = "lenient_text")]
    reason: Option<String>,
    #[serde(rename = "ReadBytes")]
    read_bytes: Option<Value>,
    #[serde(rename = "WriteBytes")]
    write_bytes: Option<Value>,
    #[serde(rename = "CloseCode")]
    close_code: Option<Value>,
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    })
}

/// Connection status of a device, published by the platform on `.../mon`
///
/// Every payload field is optional; absent keys stay `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub type_id: String,
    pub device_id: String,
    pub retained: bool,
    pub client_addr: Option<String>,
    pub protocol: Option<String>,
    pub client_id: Option<String>,
    pub user: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub action: Option<String>,
    pub connect_time: Option<DateTime<Utc>>,
    pub port: Option<Value>,
    pub write_msg: Option<Value>,
    pub read_msg: Option<Value>,
    pub reason: Option<String>,
    pub read_bytes: Option<Value>,
    pub write_bytes: Option<Value>,
    pub close_code: Option<Value>,
}

impl Status {
    /// Status payloads are always JSON and bypass the codec registry
    pub fn parse(raw: &RawMessage) -> Result<Self, MessageError> {
        let topic = parse_status_topic(&raw.topic)?;
        let payload: StatusPayload = read_status_payload(raw, "device")?;

        Ok(Self {
            type_id: topic.type_id,
            device_id: topic.device_id,
            retained: raw.retain,
            client_addr: payload.client_addr,
            protocol: payload.protocol,
            client_id: payload.client_id,
            user: payload.user,
            time: payload.time,
            action: payload.action,
            connect_time: payload.connect_time,
            port: payload.port,
            write_msg: payload.write_msg,
            read_msg: payload.read_msg,
            reason: payload.reason,
            read_bytes: payload.read_bytes,
            write_bytes: payload.write_bytes,
            close_code: payload.close_code,
        })
    }

    pub fn device(&self) -> String {
        format!("{}:{}", self.type_id, self.device_id)
    }

    pub fn is_connect(&self) -> bool {
        self.action.as_deref() == Some("Connect")
    }

    pub fn is_disconnect(&self) -> bool {
        self.action.as_deref() == Some("Disconnect")
    }
}

fn read_status_payload<P: serde::de::DeserializeOwned>(
    raw: &RawMessage,
    source: &str,
) -> Result<P, MessageError> {
    serde_json::from_slice(&raw.payload).map_err(|e| {
        MessageError::invalid_event(format!(
            "Unable to parse {source} status.  payload=\"{}\" error={e}",
            String::from_utf8_lossy(&raw.payload)
        ))
    })
}

/// Connection status of an application, published on `iot-2/app/{appId}/mon`
///
/// `data` holds the whole payload; the common fields are also read out.
#[derive(Debug, Clone, PartialEq)]
pub struct AppStatus {
    pub app_id: String,
    pub retained: bool,
    pub client_id: Option<String>,
    pub action: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub data: Value,
}

impl AppStatus {
    pub fn parse(raw: &RawMessage) -> Result<Self, MessageError> {
        let topic = parse_app_status_topic(&raw.topic)?;
        let data: Value = read_status_payload(raw, "application")?;
        let payload: StatusPayload = serde_json::from_value(data.clone()).map_err(|e| {
            MessageError::invalid_event(format!(
                "Unable to parse application status.  payload=\"{data}\" error={e}"
            ))
        })?;

        Ok(Self {
            app_id: topic.app_id,
            retained: raw.retain,
            client_id: payload.client_id,
            action: payload.action,
            time: payload.time,
            reason: payload.reason,
            data,
        })
    }

    pub fn is_connect(&self) -> bool {
        self.action.as_deref() == Some("Connect")
    }

    pub fn is_disconnect(&self) -> bool {
        self.action.as_deref() == Some("Disconnect")
    }
}

/// Whether a state or error message concerns a device or a thing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Device,
    Thing,
}

/// Logical interface state published by the platform
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub scope: Scope,
    pub type_id: String,
    pub id: String,
    pub logical_interface_id: String,
    pub payload: Bytes,
}

impl State {
    pub fn parse_device(raw: &RawMessage) -> Result<Self, MessageError> {
        let topic = parse_device_state_topic(&raw.topic)?;
        Ok(Self {
            scope: Scope::Device,
            type_id: topic.type_id,
            id: topic.id,
            logical_interface_id: topic.logical_interface_id,
            payload: raw.payload.clone(),
        })
    }

    pub fn parse_thing(raw: &RawMessage) -> Result<Self, MessageError> {
        let topic = parse_thing_state_topic(&raw.topic)?;
        Ok(Self {
            scope: Scope::Thing,
            type_id: topic.type_id,
            id: topic.id,
            logical_interface_id: topic.logical_interface_id,
            payload: raw.payload.clone(),
        })
    }

    pub fn json(&self) -> Result<Value, MessageError> {
        payload_json(&self.payload)
    }
}

/// Processing error reported by the platform for a device or thing
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub scope: Scope,
    pub type_id: String,
    pub id: String,
    pub payload: Bytes,
}

impl ErrorMessage {
    pub fn parse_device(raw: &RawMessage) -> Result<Self, MessageError> {
        let topic = parse_device_error_topic(&raw.topic)?;
        Ok(Self {
            scope: Scope::Device,
            type_id: topic.type_id,
            id: topic.id,
            payload: raw.payload.clone(),
        })
    }

    pub fn parse_thing(raw: &RawMessage) -> Result<Self, MessageError> {
        let topic = parse_thing_error_topic(&raw.topic)?;
        Ok(Self {
            scope: Scope::Thing,
            type_id: topic.type_id,
            id: topic.id,
            payload: raw.payload.clone(),
        })
    }

    /// `typeId:id` of the resource the error concerns
    pub fn source(&self) -> String {
        format!("{}:{}", self.type_id, self.id)
    }

    pub fn json(&self) -> Result<Value, MessageError> {
        payload_json(&self.payload)
    }
}

fn payload_json(payload: &[u8]) -> Result<Value, MessageError> {
    serde_json::from_slice(payload).map_err(|e| {
        MessageError::invalid_event(format!(
            "Unable to parse JSON.  payload=\"{}\" error={e}",
            String::from_utf8_lossy(payload)
        ))
    })
}

/// Closed set of message kinds a client can route to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Event,
    Command,
    /// Command addressed to the gateway itself rather than a device behind it
    GatewayCommand,
    DeviceCommand,
    Status,
    AppStatus,
    DeviceState,
    ThingState,
    DeviceError,
    ThingError,
    Notification,
}

impl MessageKind {
    /// Parse `raw` with the grammar of this kind (pure function)
    pub fn parse(
        self,
        raw: &RawMessage,
        codecs: &CodecRegistry,
    ) -> Result<InboundMessage, MessageError> {
        Ok(match self {
            MessageKind::Event => InboundMessage::Event(Event::parse(raw, codecs)?),
            MessageKind::Command => InboundMessage::Command(Command::parse(raw, codecs)?),
            MessageKind::GatewayCommand => {
                InboundMessage::GatewayCommand(Command::parse(raw, codecs)?)
            }
            MessageKind::DeviceCommand => {
                InboundMessage::DeviceCommand(DeviceCommand::parse(raw, codecs)?)
            }
            MessageKind::Status => InboundMessage::Status(Status::parse(raw)?),
            MessageKind::AppStatus => InboundMessage::AppStatus(AppStatus::parse(raw)?),
            MessageKind::DeviceState => InboundMessage::State(State::parse_device(raw)?),
            MessageKind::ThingState => InboundMessage::State(State::parse_thing(raw)?),
            MessageKind::DeviceError => InboundMessage::Error(ErrorMessage::parse_device(raw)?),
            MessageKind::ThingError => InboundMessage::Error(ErrorMessage::parse_thing(raw)?),
            MessageKind::Notification => {
                InboundMessage::Notification(Notification::parse(raw, codecs)?)
            }
        })
    }
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Event(Event),
    Command(Command),
    GatewayCommand(Command),
    DeviceCommand(DeviceCommand),
    Status(Status),
    AppStatus(AppStatus),
    State(State),
    Error(ErrorMessage),
    Notification(Notification),
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::Event(_) => MessageKind::Event,
            InboundMessage::Command(_) => MessageKind::Command,
            InboundMessage::GatewayCommand(_) => MessageKind::GatewayCommand,
            InboundMessage::DeviceCommand(_) => MessageKind::DeviceCommand,
            InboundMessage::Status(_) => MessageKind::Status,
            InboundMessage::AppStatus(_) => MessageKind::AppStatus,
            InboundMessage::State(state) => match state.scope {
                Scope::Device => MessageKind::DeviceState,
                Scope::Thing => MessageKind::ThingState,
            },
            InboundMessage::Error(error) => match error.scope {
                Scope::Device => MessageKind::DeviceError,
                Scope::Thing => MessageKind::ThingError,
            },
            InboundMessage::Notification(_) => MessageKind::Notification,
        }
    }
}

/// Ordered subscription-filter to message-kind routes
///
/// The first filter matching an inbound topic selects the parser; filters
/// are matched with MQTT wildcard rules.
#[derive(Debug, Clone, Default)]
pub struct TopicRouter {
    routes: Vec<(String, MessageKind)>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `filter`; registering the same filter twice keeps the first kind
    pub fn add_route(&mut self, filter: impl Into<String>, kind: MessageKind) {
        let filter = filter.into();
        if !self.routes.iter().any(|(existing, _)| *existing == filter) {
            self.routes.push((filter, kind));
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Kind selected for `topic`, if any filter matches (pure function)
    pub fn resolve(&self, topic: &str) -> Option<MessageKind> {
        self.routes
            .iter()
            .find(|(filter, _)| topic_matches_filter(filter, topic))
            .map(|(_, kind)| *kind)
    }

    /// Route and decode one inbound message
    pub fn route(
        &self,
        raw: &RawMessage,
        codecs: &CodecRegistry,
    ) -> Result<InboundMessage, MessageError> {
        let kind = self
            .resolve(&raw.topic)
            .ok_or_else(|| MessageError::UnsupportedTopic {
                topic: raw.topic.clone(),
            })?;
        kind.parse(raw, codecs)
    }
}
