//! Protocol layer for server communication.
//!
//! This module defines the JSON wire messages and the codec that turns
//! client requests into frames and inbound frames into typed events.

pub mod codec;
pub mod messages;

pub use codec::{MessageCodec, Outbound, ProtocolEvent, WireMessage};
pub use messages::{ErrorCode, ScalarSubcommand, MESSAGE_VERSION};
