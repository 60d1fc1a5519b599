//! Encoding of outbound requests and decoding of inbound frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::trace;

use crate::device::{CommandKind, DeviceId, DeviceRecord, Feature};
use crate::error::{DecodeError, EncodeError};

use super::messages::{
    ClientMessage, DeviceInfo, Envelope, ErrorCode, RequestServerInfo, ScalarCmd,
    ScalarSubcommand, ServerMessage, StopDeviceCmd, SYSTEM_MESSAGE_ID,
};

/// A serialized protocol frame.
pub type WireMessage = String;

/// Requests the client can issue.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Handshake {
        client_name: String,
        message_version: u32,
    },
    RequestDeviceList,
    StartScanning,
    StopScanning,
    Scalar {
        device: DeviceId,
        scalars: Vec<ScalarSubcommand>,
    },
    StopDevice(DeviceId),
    StopAllDevices,
    Ping,
}

impl Outbound {
    pub fn name(&self) -> &'static str {
        match self {
            Outbound::Handshake { .. } => "RequestServerInfo",
            Outbound::RequestDeviceList => "RequestDeviceList",
            Outbound::StartScanning => "StartScanning",
            Outbound::StopScanning => "StopScanning",
            Outbound::Scalar { .. } => "ScalarCmd",
            Outbound::StopDevice(_) => "StopDeviceCmd",
            Outbound::StopAllDevices => "StopAllDevices",
            Outbound::Ping => "Ping",
        }
    }

    fn into_message(self, id: u32) -> ClientMessage {
        match self {
            Outbound::Handshake {
                client_name,
                message_version,
            } => ClientMessage::RequestServerInfo(RequestServerInfo {
                id,
                client_name,
                message_version,
            }),
            Outbound::RequestDeviceList => ClientMessage::RequestDeviceList(Envelope { id }),
            Outbound::StartScanning => ClientMessage::StartScanning(Envelope { id }),
            Outbound::StopScanning => ClientMessage::StopScanning(Envelope { id }),
            Outbound::Scalar { device, scalars } => ClientMessage::ScalarCmd(ScalarCmd {
                id,
                device_index: device.0,
                scalars,
            }),
            Outbound::StopDevice(device) => ClientMessage::StopDeviceCmd(StopDeviceCmd {
                id,
                device_index: device.0,
            }),
            Outbound::StopAllDevices => ClientMessage::StopAllDevices(Envelope { id }),
            Outbound::Ping => ClientMessage::Ping(Envelope { id }),
        }
    }
}

/// Typed view of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    HandshakeAck {
        id: u32,
        server_name: String,
        message_version: u32,
        max_ping_time: Duration,
    },
    DeviceList {
        id: u32,
        devices: Vec<DeviceRecord>,
    },
    DeviceAdded(DeviceRecord),
    DeviceRemoved(DeviceId),
    ScanningFinished,
    CommandAck {
        id: u32,
    },
    CommandError {
        id: u32,
        reason: String,
        code: ErrorCode,
    },
    /// The transport closed.
    Disconnected,
}

/// Stateful codec enforcing that the handshake precedes all other traffic.
#[derive(Debug, Default)]
pub struct MessageCodec {
    handshake_complete: AtomicBool,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete.load(Ordering::Acquire)
    }

    /// Forget the handshake, ahead of a new connection.
    pub fn reset(&self) {
        self.handshake_complete.store(false, Ordering::Release);
    }

    pub fn encode(&self, id: u32, outbound: Outbound) -> Result<WireMessage, EncodeError> {
        let is_handshake = matches!(outbound, Outbound::Handshake { .. });
        if !is_handshake && !self.handshake_complete() {
            return Err(EncodeError::HandshakeRequired(outbound.name()));
        }

        let frame = [outbound.into_message(id)];
        serde_json::to_string(&frame).map_err(|e| EncodeError::Serialize(e.to_string()))
    }

    /// Decode one frame into per-message results, in message order.
    ///
    /// A message that fails to decode does not affect the others in its frame.
    /// A frame that is not a non-empty array yields a single `Malformed` error.
    /// Before the handshake completes only `ServerInfo` and `Error` are accepted.
    pub fn decode(&self, frame: &str) -> Vec<Result<ProtocolEvent, DecodeError>> {
        let messages: Vec<Value> = match serde_json::from_str(frame) {
            Ok(messages) => messages,
            Err(e) => return vec![Err(DecodeError::Malformed(e.to_string()))],
        };

        if messages.is_empty() {
            return vec![Err(DecodeError::Malformed("empty frame".to_string()))];
        }

        messages
            .into_iter()
            .map(|message| self.decode_message(message))
            .collect()
    }

    fn decode_message(&self, value: Value) -> Result<ProtocolEvent, DecodeError> {
        let message: ServerMessage =
            serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        if !self.handshake_complete()
            && !matches!(message, ServerMessage::ServerInfo(_) | ServerMessage::Error(_))
        {
            return Err(DecodeError::HandshakeIncomplete(message.name().to_string()));
        }
        trace!(message = message.name(), "decoded inbound message");
        self.to_event(message)
    }

    fn to_event(&self, message: ServerMessage) -> Result<ProtocolEvent, DecodeError> {
        let event = match message {
            ServerMessage::ServerInfo(info) => {
                self.handshake_complete.store(true, Ordering::Release);
                ProtocolEvent::HandshakeAck {
                    id: info.id,
                    server_name: info.server_name,
                    message_version: info.message_version,
                    max_ping_time: Duration::from_millis(u64::from(info.max_ping_time)),
                }
            }
            ServerMessage::Ok(m) => ProtocolEvent::CommandAck { id: m.id },
            ServerMessage::Error(e) => ProtocolEvent::CommandError {
                id: e.id,
                reason: e.error_message,
                code: ErrorCode::from(e.error_code),
            },
            ServerMessage::DeviceList(list) => ProtocolEvent::DeviceList {
                id: list.id,
                devices: list.devices.into_iter().map(device_record).collect(),
            },
            ServerMessage::DeviceAdded(added) => {
                if added.id != SYSTEM_MESSAGE_ID {
                    return Err(DecodeError::Malformed(format!(
                        "DeviceAdded with non-system id {}",
                        added.id
                    )));
                }
                ProtocolEvent::DeviceAdded(device_record(added.device))
            }
            ServerMessage::DeviceRemoved(removed) => {
                ProtocolEvent::DeviceRemoved(DeviceId(removed.device_index))
            }
            ServerMessage::ScanningFinished(_) => ProtocolEvent::ScanningFinished,
        };
        Ok(event)
    }
}

/// Build a device record, grouping scalar actuators by kind in attribute order.
fn device_record(info: DeviceInfo) -> DeviceRecord {
    let mut record = DeviceRecord::new(DeviceId(info.device_index), info.device_name);
    record.display_name = info.device_display_name;
    record.message_timing_gap_ms = info.device_message_timing_gap;

    for (index, attr) in info.device_messages.scalar_cmd.into_iter().enumerate() {
        // Unknown actuator types keep their slot in the index space.
        let Some(kind) = CommandKind::from_actuator_type(&attr.actuator_type) else {
            continue;
        };
        record.capabilities.entry(kind).or_default().features.push(Feature {
            index: index as u32,
            step_count: attr.step_count,
            descriptor: attr.feature_descriptor,
        });
    }

    record
}
