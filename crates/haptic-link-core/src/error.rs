//! Error types for the haptic-link client.

use thiserror::Error;

use crate::device::{CommandKind, DeviceId};
use crate::protocol::ErrorCode;

/// Core error type wrapping every failure the client can surface.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Disconnect error: {0}")]
    Disconnect(#[from] DisconnectError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Failures establishing a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Server rejected handshake: {0}")]
    HandshakeRejected(String),

    #[error("Session is already connected")]
    AlreadyConnected,
}

/// Failures tearing down a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisconnectError {
    #[error("Session is already disconnected")]
    AlreadyDisconnected,
}

/// Transport-level send failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Failures starting or stopping device discovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("Session is not connected")]
    NotConnected,

    #[error("Server rejected scan request: {0}")]
    ServerRejected(String),

    #[error("Scan request timed out")]
    Timeout,
}

/// Failures sending a device command.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("Session is not connected")]
    NotConnected,

    #[error("Device {device} exposes {expected} {kind} feature(s), got {actual} value(s)")]
    ArgumentCountMismatch {
        device: DeviceId,
        kind: CommandKind,
        expected: usize,
        actual: usize,
    },

    #[error("Value {0} is outside 0.0..=1.0")]
    ValueOutOfRange(f64),

    #[error("Device {0} does not support {1}")]
    Unsupported(DeviceId, CommandKind),

    #[error("Device {0} is no longer connected")]
    DeviceGone(DeviceId),

    #[error("Server rejected command: {0}")]
    ServerRejected(String),

    #[error("Command timed out")]
    Timeout,
}

/// Inbound frame decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Received {0} before handshake completed")]
    HandshakeIncomplete(String),
}

impl DecodeError {
    /// Whether this error violates a connection-level invariant and must tear the session down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::HandshakeIncomplete(_))
    }
}

/// Steady-state protocol problems reported to error observers.
///
/// None of these tear the connection down on their own.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolFault {
    #[error("{0}")]
    Decode(#[from] DecodeError),

    #[error("Server error ({code:?}): {reason}")]
    Server { reason: String, code: ErrorCode },

    #[error("Reply for unknown request id {0}")]
    UnexpectedReply(u32),

    #[error("Removal of unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("Ping failed: {0}")]
    PingFailed(String),
}

/// Outbound message encoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("Cannot send {0} before handshake completed")]
    HandshakeRequired(&'static str),

    #[error("Failed to serialize message: {0}")]
    Serialize(String),
}

/// Configuration file errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No platform configuration directory available")]
    NoConfigDir,
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_display() {
        let err = CommandError::ArgumentCountMismatch {
            device: DeviceId(3),
            kind: CommandKind::Vibrate,
            expected: 2,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Device 3 exposes 2 Vibrate feature(s), got 3 value(s)"
        );
    }

    #[test]
    fn test_core_error_from() {
        let err: CoreError = ConnectError::Unreachable("ws://127.0.0.1:1".to_string()).into();
        assert!(matches!(err, CoreError::Connect(ConnectError::Unreachable(_))));
        assert_eq!(
            err.to_string(),
            "Connect error: Endpoint unreachable: ws://127.0.0.1:1"
        );
    }

    #[test]
    fn test_decode_error_fatality() {
        assert!(!DecodeError::Malformed("x".to_string()).is_fatal());
        assert!(DecodeError::HandshakeIncomplete("Ok".to_string()).is_fatal());
    }
}
