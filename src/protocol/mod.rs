//! Wire-level pieces of the iot-2 protocol
//!
//! Topic grammars, payload codecs and the typed messages a client receives.

pub mod codec;
pub mod messages;
pub mod topics;

pub use codec::*;
pub use messages::*;
pub use topics::*;
