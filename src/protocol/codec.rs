//! Message codecs keyed by wire format
//!
//! A codec turns a [`MessageData`] value into payload bytes and back again.
//! Every client owns a [`CodecRegistry`]; the format segment of a topic
//! (`.../fmt/json`) selects the codec used to decode the payload.
//!
//! Four codecs ship with the crate:
//!
//! - [`JsonCodec`] (`json`) - plain JSON, no embedded timestamp
//! - [`JsonIotfCodec`] (`json-iotf`) - JSON wrapped as `{"d": data, "ts": timestamp}`
//! - [`RawCodec`] (`raw`) - opaque bytes
//! - [`Utf8Codec`] (`utf8`) - UTF-8 text

use super::messages::MessageError;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Payload value handed to encoders and produced by decoders
#[derive(Debug, Clone, PartialEq)]
pub enum MessageData {
    Json(Value),
    Text(String),
    Bytes(Bytes),
}

impl MessageData {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            MessageData::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageData::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MessageData::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl From<Value> for MessageData {
    fn from(value: Value) -> Self {
        MessageData::Json(value)
    }
}

impl From<String> for MessageData {
    fn from(text: String) -> Self {
        MessageData::Text(text)
    }
}

impl From<&str> for MessageData {
    fn from(text: &str) -> Self {
        MessageData::Text(text.to_string())
    }
}

impl From<Vec<u8>> for MessageData {
    fn from(bytes: Vec<u8>) -> Self {
        MessageData::Bytes(Bytes::from(bytes))
    }
}

impl From<Bytes> for MessageData {
    fn from(bytes: Bytes) -> Self {
        MessageData::Bytes(bytes)
    }
}

/// Inbound wire message as delivered by the MQTT layer
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }

    /// Mark the message as a retained publication
    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }
}

/// Result of a codec's decode step
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub data: MessageData,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(data: MessageData, timestamp: Option<DateTime<Utc>>) -> Self {
        Self { data, timestamp }
    }
}

/// Encode/decode capability for one wire format
///
/// Implementations must be shareable between the caller and the background
/// dispatcher, hence the `Send + Sync` bound.
pub trait MessageCodec: Send + Sync {
    /// Serialize `data` for publication at `timestamp`
    fn encode(&self, data: &MessageData, timestamp: DateTime<Utc>)
        -> Result<Vec<u8>, MessageError>;

    /// Interpret the payload of an inbound message
    fn decode(&self, message: &RawMessage) -> Result<Message, MessageError>;
}

/// Plain JSON. Decode stamps the message with the decode-time clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode(
        &self,
        data: &MessageData,
        _timestamp: DateTime<Utc>,
    ) -> Result<Vec<u8>, MessageError> {
        let result = match data {
            MessageData::Json(value) => serde_json::to_vec(value),
            MessageData::Text(text) => serde_json::to_vec(text),
            MessageData::Bytes(_) => {
                return Err(MessageError::invalid_event(
                    "Unable to encode data, binary payloads are not JSON serializable",
                ))
            }
        };
        result.map_err(|e| MessageError::invalid_event(format!("Unable to encode JSON: {e}")))
    }

    fn decode(&self, message: &RawMessage) -> Result<Message, MessageError> {
        let value = parse_json_payload(&message.payload)?;
        Ok(Message::new(MessageData::Json(value), Some(Utc::now())))
    }
}

/// JSON wrapped in the `{"d": ..., "ts": ...}` envelope
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonIotfCodec;

impl MessageCodec for JsonIotfCodec {
    fn encode(
        &self,
        data: &MessageData,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<u8>, MessageError> {
        let d = match data {
            MessageData::Json(value) => value.clone(),
            MessageData::Text(text) => Value::String(text.clone()),
            MessageData::Bytes(_) => {
                return Err(MessageError::invalid_event(
                    "Unable to encode data, binary payloads are not JSON serializable",
                ))
            }
        };
        let envelope = json!({
            "d": d,
            "ts": timestamp.to_rfc3339_opts(SecondsFormat::Micros, false),
        });
        serde_json::to_vec(&envelope)
            .map_err(|e| MessageError::invalid_event(format!("Unable to encode JSON: {e}")))
    }

    fn decode(&self, message: &RawMessage) -> Result<Message, MessageError> {
        let mut value = parse_json_payload(&message.payload)?;

        let timestamp = match value.get("ts") {
            Some(Value::String(ts)) => DateTime::parse_from_rfc3339(ts)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|e| {
                    MessageError::invalid_event(format!("Unable to parse event timestamp: {e}"))
                })?,
            Some(other) => {
                return Err(MessageError::invalid_event(format!(
                    "Unable to parse event timestamp: {other}"
                )))
            }
            None => Utc::now(),
        };

        let data = value
            .get_mut("d")
            .map(Value::take)
            .unwrap_or(Value::Null);

        Ok(Message::new(MessageData::Json(data), Some(timestamp)))
    }
}

/// Opaque bytes, passed through untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl MessageCodec for RawCodec {
    fn encode(
        &self,
        data: &MessageData,
        _timestamp: DateTime<Utc>,
    ) -> Result<Vec<u8>, MessageError> {
        match data {
            MessageData::Bytes(bytes) => Ok(bytes.to_vec()),
            _ => Err(MessageError::invalid_event(
                "Unable to encode data, it is not a bytearray",
            )),
        }
    }

    fn decode(&self, message: &RawMessage) -> Result<Message, MessageError> {
        Ok(Message::new(
            MessageData::Bytes(message.payload.clone()),
            Some(Utc::now()),
        ))
    }
}

/// UTF-8 text
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl MessageCodec for Utf8Codec {
    fn encode(
        &self,
        data: &MessageData,
        _timestamp: DateTime<Utc>,
    ) -> Result<Vec<u8>, MessageError> {
        match data {
            MessageData::Text(text) => Ok(text.as_bytes().to_vec()),
            _ => Err(MessageError::invalid_event(
                "Unable to encode data, it is not a string",
            )),
        }
    }

    fn decode(&self, message: &RawMessage) -> Result<Message, MessageError> {
        let text = std::str::from_utf8(&message.payload).map_err(|e| {
            MessageError::invalid_event(format!("Unable to decode event to UTF-8 string: {e}"))
        })?;
        Ok(Message::new(
            MessageData::Text(text.to_string()),
            Some(Utc::now()),
        ))
    }
}

fn parse_json_payload(payload: &[u8]) -> Result<Value, MessageError> {
    serde_json::from_slice(payload).map_err(|e| {
        MessageError::invalid_event(format!(
            "Unable to parse JSON.  payload=\"{}\" error={e}",
            String::from_utf8_lossy(payload)
        ))
    })
}

/// Per-client mapping from format name to codec
///
/// Registering a format that is already present replaces the previous codec.
/// Lookups that miss fail with a typed error rather than falling back to a
/// default.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn MessageCodec>>,
}

impl CodecRegistry {
    /// Registry with no codecs at all
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register `codec` for `format`, returning the codec it replaced
    pub fn register(
        &mut self,
        format: impl Into<String>,
        codec: Arc<dyn MessageCodec>,
    ) -> Option<Arc<dyn MessageCodec>> {
        self.codecs.insert(format.into(), codec)
    }

    pub fn get(&self, format: &str) -> Option<Arc<dyn MessageCodec>> {
        self.codecs.get(format).cloned()
    }

    pub fn contains(&self, format: &str) -> bool {
        self.codecs.contains_key(format)
    }

    /// Resolve the codec used to decode `format`
    pub fn decoder(&self, format: &str) -> Result<Arc<dyn MessageCodec>, MessageError> {
        self.get(format)
            .ok_or_else(|| MessageError::missing_decoder(format))
    }

    /// Resolve the codec used to encode `format`
    pub fn encoder(&self, format: &str) -> Result<Arc<dyn MessageCodec>, MessageError> {
        self.get(format)
            .ok_or_else(|| MessageError::missing_encoder(format))
    }

    pub fn decode(&self, format: &str, message: &RawMessage) -> Result<Message, MessageError> {
        self.decoder(format)?.decode(message)
    }

    pub fn encode(
        &self,
        format: &str,
        data: &MessageData,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<u8>, MessageError> {
        self.encoder(format)?.encode(data, timestamp)
    }

    /// Registered format names, sorted
    pub fn formats(&self) -> Vec<&str> {
        let mut formats: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        formats.sort_unstable();
        formats
    }
}

impl Default for CodecRegistry {
    /// `json`, `raw` and `utf8` are available on every new client
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("json", Arc::new(JsonCodec));
        registry.register("raw", Arc::new(RawCodec));
        registry.register("utf8", Arc::new(Utf8Codec));
        registry
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}
