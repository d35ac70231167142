//! iot-2 platform SDK
//!
//! Clients for the iot-2 MQTT platform and its registry REST API.
//!
//! # Overview
//!
//! This crate provides:
//! - Device, gateway and application clients over MQTT 3.1.1
//! - Topic grammars and typed inbound messages
//! - A per-client codec registry for payload formats
//! - A registry API client with bookmark pagination
//!
//! # Quick Start
//!
//! ```rust
//! use iot2_sdk::protocol::{CodecRegistry, RawMessage, TopicRouter, MessageKind, InboundMessage};
//!
//! let mut router = TopicRouter::new();
//! router.add_route("iot-2/type/+/id/+/evt/+/fmt/+", MessageKind::Event);
//!
//! let raw = RawMessage::new("iot-2/type/pi/id/0001/evt/status/fmt/json", r#"{"cpu": 12}"#);
//! match router.route(&raw, &CodecRegistry::default()).unwrap() {
//!     InboundMessage::Event(event) => assert_eq!(event.device(), "pi:0001"),
//!     other => panic!("unexpected message: {other:?}"),
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use client::{ApplicationClient, DeviceClient, GatewayClient};
pub use config::{ApplicationConfig, ConfigError, DeviceConfig, GatewayConfig};
pub use error::{IotError, IotResult};
pub use protocol::*;
pub use transport::mqtt::MqttClient;
