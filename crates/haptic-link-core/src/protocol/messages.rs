//! Wire message structures (JSON, protocol version 3).
//!
//! A frame is a JSON array of messages. Each message is an object with a
//! single key naming its type:
//!
//! ```text
//! [{"ScalarCmd":{"Id":4,"DeviceIndex":0,"Scalars":[{"Index":0,"Scalar":1.0,"ActuatorType":"Vibrate"}]}}]
//! ```

use serde::{Deserialize, Serialize};

use crate::device::CommandKind;

/// Protocol version spoken by this client.
pub const MESSAGE_VERSION: u32 = 3;

/// Id carried by server-initiated messages.
pub const SYSTEM_MESSAGE_ID: u32 = 0;

/// Messages a client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    RequestServerInfo(RequestServerInfo),
    RequestDeviceList(Envelope),
    StartScanning(Envelope),
    StopScanning(Envelope),
    ScalarCmd(ScalarCmd),
    StopDeviceCmd(StopDeviceCmd),
    StopAllDevices(Envelope),
    Ping(Envelope),
}

impl ClientMessage {
    pub fn id(&self) -> u32 {
        match self {
            ClientMessage::RequestServerInfo(m) => m.id,
            ClientMessage::ScalarCmd(m) => m.id,
            ClientMessage::StopDeviceCmd(m) => m.id,
            ClientMessage::RequestDeviceList(m)
            | ClientMessage::StartScanning(m)
            | ClientMessage::StopScanning(m)
            | ClientMessage::StopAllDevices(m)
            | ClientMessage::Ping(m) => m.id,
        }
    }
}

/// Messages a server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    ServerInfo(ServerInfo),
    Ok(Envelope),
    Error(ErrorMessage),
    DeviceList(DeviceList),
    DeviceAdded(DeviceAdded),
    DeviceRemoved(DeviceRemoved),
    ScanningFinished(Envelope),
}

impl ServerMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::ServerInfo(_) => "ServerInfo",
            ServerMessage::Ok(_) => "Ok",
            ServerMessage::Error(_) => "Error",
            ServerMessage::DeviceList(_) => "DeviceList",
            ServerMessage::DeviceAdded(_) => "DeviceAdded",
            ServerMessage::DeviceRemoved(_) => "DeviceRemoved",
            ServerMessage::ScanningFinished(_) => "ScanningFinished",
        }
    }
}

/// Message with no payload beyond its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestServerInfo {
    pub id: u32,
    pub client_name: String,
    pub message_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScalarCmd {
    pub id: u32,
    pub device_index: u32,
    pub scalars: Vec<ScalarSubcommand>,
}

/// One actuator setting inside a `ScalarCmd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScalarSubcommand {
    pub index: u32,
    pub scalar: f64,
    pub actuator_type: CommandKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopDeviceCmd {
    pub id: u32,
    pub device_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInfo {
    pub id: u32,
    #[serde(default)]
    pub server_name: String,
    pub message_version: u32,
    /// Milliseconds; 0 disables the ping requirement.
    #[serde(default)]
    pub max_ping_time: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorMessage {
    pub id: u32,
    pub error_message: String,
    #[serde(default)]
    pub error_code: u32,
}

/// Error categories reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unknown,
    Init,
    Ping,
    Message,
    Device,
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        match code {
            1 => ErrorCode::Init,
            2 => ErrorCode::Ping,
            3 => ErrorCode::Message,
            4 => ErrorCode::Device,
            _ => ErrorCode::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceList {
    pub id: u32,
    pub devices: Vec<DeviceInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceAdded {
    pub id: u32,
    #[serde(flatten)]
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceRemoved {
    pub id: u32,
    pub device_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInfo {
    pub device_index: u32,
    pub device_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_message_timing_gap: Option<u32>,
    #[serde(default)]
    pub device_messages: DeviceMessageAttributes,
}

/// Per-message capability attributes. Message types this client does not
/// drive are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMessageAttributes {
    #[serde(rename = "ScalarCmd", default, skip_serializing_if = "Vec::is_empty")]
    pub scalar_cmd: Vec<ScalarAttribute>,
    #[serde(rename = "StopDeviceCmd", default, skip_serializing_if = "Option::is_none")]
    pub stop_device_cmd: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScalarAttribute {
    #[serde(default)]
    pub feature_descriptor: String,
    #[serde(default)]
    pub step_count: u32,
    pub actuator_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_shape() {
        let msg = ClientMessage::RequestServerInfo(RequestServerInfo {
            id: 1,
            client_name: "Example Client".to_string(),
            message_version: MESSAGE_VERSION,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["RequestServerInfo"]["Id"], 1);
        assert_eq!(json["RequestServerInfo"]["ClientName"], "Example Client");
        assert_eq!(json["RequestServerInfo"]["MessageVersion"], 3);
    }

    #[test]
    fn test_device_added_parses_flattened_info() {
        let raw = r#"{"DeviceAdded":{"Id":0,"DeviceIndex":4,"DeviceName":"Lush",
            "DeviceMessages":{"ScalarCmd":[{"StepCount":20,"ActuatorType":"Vibrate","FeatureDescriptor":"Main"}],
            "StopDeviceCmd":{},"SensorReadCmd":[{"SensorType":"Battery"}]}}}"#;

        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        let ServerMessage::DeviceAdded(added) = msg else {
            panic!("expected DeviceAdded");
        };
        assert_eq!(added.id, SYSTEM_MESSAGE_ID);
        assert_eq!(added.device.device_index, 4);
        assert_eq!(added.device.device_messages.scalar_cmd.len(), 1);
        assert_eq!(added.device.device_messages.scalar_cmd[0].actuator_type, "Vibrate");
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(ErrorCode::from(4), ErrorCode::Device);
        assert_eq!(ErrorCode::from(99), ErrorCode::Unknown);
    }
}
