//! # databroker-protocol
//!
//! Databroker protocol message types, call status and value parsing.
//!
//! This crate defines the request/response envelopes exchanged with the broker.

pub mod codec;
pub mod messages;
pub mod status;

pub use codec::{parse_datapoint, CodecError};
pub use messages::*;
pub use status::{StatusCode, TransportError};
