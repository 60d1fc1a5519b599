//! Client-side protocol and device-session engine for remote haptic
//! device-control servers.
//!
//! The crate is organized in layers:
//!
//! - **connector**: transport to the server (WebSocket by default)
//! - **protocol**: JSON wire messages and the handshake-aware codec
//! - **device**: device records, the ordered registry and command handles
//! - **client**: the session state machine and public API
//! - **config**: file-backed client configuration

pub mod client;
pub mod config;
pub mod connector;
pub mod device;
pub mod error;
pub mod protocol;

pub use client::{ClientSession, ConnectionState};
pub use config::{default_config_path, ClientConfig};
pub use connector::{Connector, WebSocketConnector};
pub use device::{CommandKind, CommandRequest, DeviceHandle, DeviceId, DeviceRecord, FeatureDescriptor};
pub use error::{
    CommandError, ConnectError, CoreError, DecodeError, DisconnectError, ProtocolFault, Result,
    ScanError, SendError,
};
