//! Testing utilities
//!
//! Mock implementations for exercising the clients without an MQTT broker.

pub mod mocks;

pub use mocks::*;
