//! In-memory transport that plays a scripted server and records traffic.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{ConnectError, DisconnectError, SendError};
use crate::protocol::messages::{
    ClientMessage, DeviceAdded, DeviceInfo, DeviceList, DeviceMessageAttributes, Envelope,
    ErrorMessage, ScalarAttribute, ServerInfo, ServerMessage, SYSTEM_MESSAGE_ID,
};
use crate::protocol::WireMessage;

use super::{Connector, Inbound};

/// How the fake server answers.
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    pub max_ping_time: u32,
    pub reject_handshake: Option<String>,
    /// Sent ahead of the handshake reply.
    pub before_handshake: Vec<ServerMessage>,
    pub initial_devices: Vec<DeviceInfo>,
    /// Announce the initial devices with DeviceAdded before the list reply.
    pub announce_initial: bool,
    /// Announced right after acknowledging `StartScanning`.
    pub scan_devices: Vec<DeviceInfo>,
    pub finish_scan: bool,
    pub ignore_scanning: bool,
    pub reject_commands: Option<String>,
    pub ignore_commands: bool,
}

#[derive(Default)]
struct State {
    script: Script,
    unreachable: bool,
    inbound: Option<mpsc::UnboundedSender<WireMessage>>,
    sent: Vec<ClientMessage>,
    connects: usize,
}

#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<Mutex<State>>,
}

pub(crate) fn device_info(index: u32, name: &str, vibrators: usize) -> DeviceInfo {
    DeviceInfo {
        device_index: index,
        device_name: name.to_string(),
        device_display_name: None,
        device_message_timing_gap: None,
        device_messages: DeviceMessageAttributes {
            scalar_cmd: (0..vibrators)
                .map(|_| ScalarAttribute {
                    feature_descriptor: String::new(),
                    step_count: 20,
                    actuator_type: "Vibrate".to_string(),
                })
                .collect(),
            stop_device_cmd: Some(serde_json::json!({})),
        },
    }
}

impl MockConnector {
    pub fn new(script: Script) -> Self {
        let connector = Self::default();
        connector.state.lock().script = script;
        connector
    }

    pub fn unreachable() -> Self {
        let connector = Self::default();
        connector.state.lock().unreachable = true;
        connector
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.state.lock().sent.clone()
    }

    pub fn sent_matching(&self, pred: impl Fn(&ClientMessage) -> bool) -> Vec<ClientMessage> {
        self.state.lock().sent.iter().filter(|m| pred(m)).cloned().collect()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().inbound.is_some()
    }

    pub fn script_mut(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.state.lock().script);
    }

    /// Deliver server messages as one frame.
    pub fn push(&self, messages: Vec<ServerMessage>) {
        let frame = serde_json::to_string(&messages).unwrap();
        self.push_raw(&frame);
    }

    pub fn push_raw(&self, frame: &str) {
        if let Some(tx) = self.state.lock().inbound.as_ref() {
            let _ = tx.send(frame.to_string());
        }
    }

    pub fn device_added(&self, info: DeviceInfo) {
        self.push(vec![ServerMessage::DeviceAdded(DeviceAdded {
            id: SYSTEM_MESSAGE_ID,
            device: info,
        })]);
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self) {
        self.state.lock().inbound = None;
    }

    fn respond(script: &Script, message: &ClientMessage) -> Vec<ServerMessage> {
        let id = message.id();
        let ok = ServerMessage::Ok(Envelope { id });
        match message {
            ClientMessage::RequestServerInfo(_) => {
                let mut replies = script.before_handshake.clone();
                replies.push(match &script.reject_handshake {
                    Some(reason) => ServerMessage::Error(ErrorMessage {
                        id,
                        error_message: reason.clone(),
                        error_code: 1,
                    }),
                    None => ServerMessage::ServerInfo(ServerInfo {
                        id,
                        server_name: "Mock Server".to_string(),
                        message_version: 3,
                        max_ping_time: script.max_ping_time,
                    }),
                });
                replies
            }
            ClientMessage::RequestDeviceList(_) => {
                let mut replies = Vec::new();
                if script.announce_initial {
                    replies.extend(script.initial_devices.iter().cloned().map(|device| {
                        ServerMessage::DeviceAdded(DeviceAdded {
                            id: SYSTEM_MESSAGE_ID,
                            device,
                        })
                    }));
                }
                replies.push(ServerMessage::DeviceList(DeviceList {
                    id,
                    devices: script.initial_devices.clone(),
                }));
                replies
            }
            ClientMessage::StartScanning(_) if script.ignore_scanning => Vec::new(),
            ClientMessage::StartScanning(_) => {
                let mut replies = vec![ok];
                replies.extend(script.scan_devices.iter().cloned().map(|device| {
                    ServerMessage::DeviceAdded(DeviceAdded {
                        id: SYSTEM_MESSAGE_ID,
                        device,
                    })
                }));
                if script.finish_scan {
                    replies.push(ServerMessage::ScanningFinished(Envelope {
                        id: SYSTEM_MESSAGE_ID,
                    }));
                }
                replies
            }
            ClientMessage::ScalarCmd(_) | ClientMessage::StopDeviceCmd(_) => {
                if script.ignore_commands {
                    return Vec::new();
                }
                match &script.reject_commands {
                    Some(reason) => vec![ServerMessage::Error(ErrorMessage {
                        id,
                        error_message: reason.clone(),
                        error_code: 4,
                    })],
                    None => vec![ok],
                }
            }
            _ => vec![ok],
        }
    }
}

impl Connector for MockConnector {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Inbound, ConnectError>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            if state.unreachable {
                return Err(ConnectError::Unreachable(endpoint.to_string()));
            }
            if state.inbound.is_some() {
                return Err(ConnectError::AlreadyConnected);
            }
            let (tx, rx) = mpsc::unbounded_channel();
            state.inbound = Some(tx);
            state.connects += 1;
            Ok(rx)
        })
    }

    fn send(&self, message: WireMessage) -> BoxFuture<'_, Result<(), SendError>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            let Some(tx) = state.inbound.clone() else {
                return Err(SendError::NotConnected);
            };
            let messages: Vec<ClientMessage> = serde_json::from_str(&message)
                .map_err(|e| SendError::Transport(e.to_string()))?;

            for message in messages {
                let replies = Self::respond(&state.script, &message);
                state.sent.push(message);
                for reply in replies {
                    let frame = serde_json::to_string(&[reply]).unwrap();
                    let _ = tx.send(frame);
                }
            }
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), DisconnectError>> {
        Box::pin(async move {
            self.state
                .lock()
                .inbound
                .take()
                .map(|_| ())
                .ok_or(DisconnectError::AlreadyDisconnected)
        })
    }
}
