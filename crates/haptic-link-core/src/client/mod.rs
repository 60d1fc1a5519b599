//! Client session: connection state machine and public API.
//!
//! A [`ClientSession`] drives a [`Connector`] through the handshake, keeps the
//! device registry in sync with the server and correlates requests with their
//! replies by message id.
//!
//! ```no_run
//! use haptic_link_core::{ClientSession, CommandKind};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClientSession::new("Example Client");
//! client.on_device_added(|device| println!("Device {} connected", device.name()));
//!
//! client.connect("ws://127.0.0.1:12345").await?;
//! client.start_scanning().await?;
//! client.stop_scanning().await?;
//!
//! for device in client.devices() {
//!     if device.capability_count(CommandKind::Vibrate) > 0 {
//!         device.vibrate([1.0]).await?;
//!     }
//! }
//!
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

mod event_loop;
mod observers;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connector::{Connector, WebSocketConnector};
use crate::device::{DeviceHandle, DeviceId, DeviceRecord, DeviceRegistry};
use crate::error::{CommandError, ConnectError, DisconnectError, ProtocolFault, ScanError};
use crate::protocol::messages::SYSTEM_MESSAGE_ID;
use crate::protocol::{MessageCodec, Outbound};

use observers::{Notification, Observers};

/// Connection lifecycle. Scanning is tracked separately as a sub-state of
/// `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Successful reply to a request.
#[derive(Debug)]
enum Reply {
    Ok,
    ServerInfo {
        server_name: String,
        max_ping_time: Duration,
    },
    DeviceList,
}

/// Why a request did not get a successful reply.
#[derive(Debug)]
enum RequestError {
    NotConnected,
    Rejected(String),
    Timeout,
}

type PendingReply = oneshot::Receiver<Result<Reply, RequestError>>;

struct SessionState {
    connection: ConnectionState,
    scanning: bool,
    /// Bumped on every connect and teardown; events from older epochs are ignored.
    epoch: u64,
    server_name: Option<String>,
    registry: DeviceRegistry,
    pending: HashMap<u32, oneshot::Sender<Result<Reply, RequestError>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            scanning: false,
            epoch: 0,
            server_name: None,
            registry: DeviceRegistry::new(),
            pending: HashMap::new(),
            tasks: Vec::new(),
        }
    }

    /// Return to `Disconnected`: clear devices, fail in-flight requests and
    /// hand back background tasks for the caller to abort.
    fn teardown(&mut self) -> Vec<JoinHandle<()>> {
        self.connection = ConnectionState::Disconnected;
        self.scanning = false;
        self.epoch += 1;
        self.server_name = None;
        let dropped = self.registry.clear();
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(RequestError::NotConnected));
        }
        debug!(dropped_devices = dropped, "session state cleared");
        std::mem::take(&mut self.tasks)
    }
}

pub(crate) struct Shared {
    identity: String,
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    codec: MessageCodec,
    state: Mutex<SessionState>,
    observers: Observers,
    next_id: AtomicU32,
    /// Serializes connect, disconnect and scan state changes. Never held while
    /// waiting for a scan reply.
    transitions: tokio::sync::Mutex<()>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        for task in self.state.get_mut().tasks.drain(..) {
            task.abort();
        }
    }
}

impl Shared {
    fn next_message_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != SYSTEM_MESSAGE_ID {
                return id;
            }
        }
    }

    fn register(&self, state: &mut SessionState) -> (u32, PendingReply) {
        let id = self.next_message_id();
        let (tx, rx) = oneshot::channel();
        state.pending.insert(id, tx);
        (id, rx)
    }

    /// Encode and send a registered request, then wait for its reply.
    async fn dispatch(
        &self,
        id: u32,
        rx: PendingReply,
        outbound: Outbound,
    ) -> Result<Reply, RequestError> {
        let name = outbound.name();
        let frame = match self.codec.encode(id, outbound) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(id, error = %e, "failed to encode request");
                self.state.lock().pending.remove(&id);
                return Err(RequestError::NotConnected);
            }
        };

        debug!(id, message = name, "sending request");
        if let Err(e) = self.connector.send(frame).await {
            warn!(id, message = name, error = %e, "failed to send request");
            self.state.lock().pending.remove(&id);
            return Err(RequestError::NotConnected);
        }

        match timeout(self.config.request_timeout(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RequestError::NotConnected),
            Err(_) => {
                warn!(id, message = name, "request timed out");
                self.state.lock().pending.remove(&id);
                Err(RequestError::Timeout)
            }
        }
    }

    /// Send a request that is only valid while connected.
    async fn request(&self, outbound: Outbound) -> Result<Reply, RequestError> {
        let (id, rx) = {
            let mut state = self.state.lock();
            if state.connection != ConnectionState::Connected {
                return Err(RequestError::NotConnected);
            }
            self.register(&mut state)
        };
        self.dispatch(id, rx, outbound).await
    }

    /// Validate a command against the live registry and send it.
    ///
    /// The handle's record must still be the registered one; a device removed
    /// (or replaced) since the handle was obtained is reported as gone.
    pub(crate) async fn device_command(
        &self,
        record: &Arc<DeviceRecord>,
        build: impl FnOnce(&DeviceRecord) -> Result<Outbound, CommandError>,
    ) -> Result<(), CommandError> {
        let (id, rx, outbound) = {
            let mut state = self.state.lock();
            if state.connection != ConnectionState::Connected {
                return Err(CommandError::NotConnected);
            }
            let current = state
                .registry
                .get(record.id)
                .filter(|current| Arc::ptr_eq(current, record))
                .ok_or(CommandError::DeviceGone(record.id))?;
            let outbound = build(&current)?;
            let (id, rx) = self.register(&mut state);
            (id, rx, outbound)
        };

        self.dispatch(id, rx, outbound)
            .await
            .map(|_| ())
            .map_err(command_error)
    }

    async fn handshake(&self, epoch: u64) -> Result<(String, Duration), ConnectError> {
        let (id, rx) = {
            let mut state = self.state.lock();
            if state.epoch != epoch || state.connection != ConnectionState::Connecting {
                return Err(ConnectError::HandshakeRejected(
                    "connection closed during handshake".to_string(),
                ));
            }
            self.register(&mut state)
        };

        let outbound = Outbound::Handshake {
            client_name: self.identity.clone(),
            message_version: self.config.message_version,
        };
        match self.dispatch(id, rx, outbound).await {
            Ok(Reply::ServerInfo {
                server_name,
                max_ping_time,
            }) => Ok((server_name, max_ping_time)),
            Ok(other) => Err(ConnectError::HandshakeRejected(format!(
                "unexpected handshake reply {:?}",
                other
            ))),
            Err(RequestError::Rejected(reason)) => Err(ConnectError::HandshakeRejected(reason)),
            Err(RequestError::Timeout) => Err(ConnectError::HandshakeRejected(
                "timed out waiting for server info".to_string(),
            )),
            Err(RequestError::NotConnected) => Err(ConnectError::HandshakeRejected(
                "connection closed during handshake".to_string(),
            )),
        }
    }

    /// Tear down a connection attempt that failed after the transport opened.
    async fn abort_connection(&self, epoch: u64) {
        let tasks = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                Vec::new()
            } else {
                state.teardown()
            }
        };
        tasks.iter().for_each(JoinHandle::abort);
        let _ = self.connector.disconnect().await;
    }

    fn handle(self: &Arc<Self>, record: Arc<DeviceRecord>) -> DeviceHandle {
        DeviceHandle::new(record, Arc::downgrade(self))
    }

    fn resolve(
        state: &mut SessionState,
        id: u32,
        result: Result<Reply, RequestError>,
        out: &mut Vec<Notification>,
    ) {
        match state.pending.remove(&id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => {
                warn!(id, "reply for unknown request");
                out.push(Notification::Fault(ProtocolFault::UnexpectedReply(id)));
            }
        }
    }

    fn add_device(
        self: &Arc<Self>,
        state: &mut SessionState,
        record: DeviceRecord,
        out: &mut Vec<Notification>,
    ) {
        let (record, replaced) = state.registry.upsert(record);
        if let Some(old) = replaced {
            debug!(device = %old.id, name = %old.name, "device replaced");
            out.push(Notification::DeviceRemoved(self.handle(old)));
        }
        info!(device = %record.id, name = %record.name, "device added");
        out.push(Notification::DeviceAdded(self.handle(record)));
    }
}

fn command_error(e: RequestError) -> CommandError {
    match e {
        RequestError::NotConnected => CommandError::NotConnected,
        RequestError::Rejected(reason) => CommandError::ServerRejected(reason),
        RequestError::Timeout => CommandError::Timeout,
    }
}

fn scan_error(e: RequestError) -> ScanError {
    match e {
        RequestError::NotConnected => ScanError::NotConnected,
        RequestError::Rejected(reason) => ScanError::ServerRejected(reason),
        RequestError::Timeout => ScanError::Timeout,
    }
}

/// A client session with a device-control server.
///
/// Cloning yields another handle to the same session. Sessions are reusable:
/// after a disconnect, `connect` starts a fresh connection with fresh device ids.
#[derive(Clone)]
pub struct ClientSession {
    shared: Arc<Shared>,
}

impl ClientSession {
    /// Create a session with default configuration over WebSocket.
    pub fn new(identity: impl Into<String>) -> Self {
        Self::with_config(identity, ClientConfig::default())
    }

    pub fn with_config(identity: impl Into<String>, config: ClientConfig) -> Self {
        let connector = Arc::new(WebSocketConnector::new(config.connect_timeout()));
        Self::with_connector(identity, config, connector)
    }

    pub fn with_connector(
        identity: impl Into<String>,
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                identity: identity.into(),
                config,
                connector,
                codec: MessageCodec::new(),
                state: Mutex::new(SessionState::new()),
                observers: Observers::default(),
                next_id: AtomicU32::new(1),
                transitions: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn identity(&self) -> &str {
        &self.shared.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.state.lock().scanning
    }

    /// Name the server announced during the handshake.
    pub fn server_name(&self) -> Option<String> {
        self.shared.state.lock().server_name.clone()
    }

    /// Connect to `endpoint`, perform the handshake and load the current
    /// device list.
    pub async fn connect(&self, endpoint: &str) -> Result<(), ConnectError> {
        let shared = &self.shared;
        let _transition = shared.transitions.lock().await;

        let epoch = {
            let mut state = shared.state.lock();
            if state.connection != ConnectionState::Disconnected {
                return Err(ConnectError::AlreadyConnected);
            }
            state.connection = ConnectionState::Connecting;
            state.epoch += 1;
            state.epoch
        };
        shared.codec.reset();
        info!(endpoint, identity = %shared.identity, "connecting");

        let inbound = match shared.connector.connect(endpoint).await {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(endpoint, error = %e, "connect failed");
                shared.state.lock().connection = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        let event_loop = tokio::spawn(event_loop::run(Arc::downgrade(shared), inbound, epoch));
        shared.state.lock().tasks.push(event_loop);

        let (server_name, max_ping_time) = match shared.handshake(epoch).await {
            Ok(info) => info,
            Err(e) => {
                warn!(endpoint, error = %e, "handshake failed");
                shared.abort_connection(epoch).await;
                return Err(e);
            }
        };

        {
            let mut state = shared.state.lock();
            if state.epoch != epoch {
                return Err(ConnectError::HandshakeRejected(
                    "connection closed during handshake".to_string(),
                ));
            }
            state.connection = ConnectionState::Connected;
            state.server_name = Some(server_name.clone());
            if shared.config.ping_enabled && !max_ping_time.is_zero() {
                let interval = max_ping_time / 2;
                debug!(?interval, "starting keep-alive pings");
                state.tasks.push(tokio::spawn(event_loop::ping(
                    Arc::downgrade(shared),
                    epoch,
                    interval,
                )));
            }
        }

        if let Err(e) = shared.request(Outbound::RequestDeviceList).await {
            let reason = format!("device list request failed: {:?}", e);
            warn!(endpoint, %reason, "connect failed");
            shared.abort_connection(epoch).await;
            return Err(ConnectError::HandshakeRejected(reason));
        }

        info!(endpoint, server = %server_name, devices = self.devices().len(), "connected");
        Ok(())
    }

    /// Close the connection. Devices are dropped without removal notifications
    /// and in-flight requests fail with `NotConnected`.
    pub async fn disconnect(&self) -> Result<(), DisconnectError> {
        let shared = &self.shared;
        let _transition = shared.transitions.lock().await;

        let tasks = {
            let mut state = shared.state.lock();
            if state.connection == ConnectionState::Disconnected {
                return Err(DisconnectError::AlreadyDisconnected);
            }
            state.teardown()
        };
        tasks.iter().for_each(JoinHandle::abort);

        if let Err(e) = shared.connector.disconnect().await {
            debug!(error = %e, "transport already closed");
        }
        info!(identity = %shared.identity, "disconnected");
        Ok(())
    }

    /// Ask the server to start discovering devices.
    pub async fn start_scanning(&self) -> Result<(), ScanError> {
        let shared = &self.shared;

        let (epoch, id, rx) = {
            let _transition = shared.transitions.lock().await;
            let mut state = shared.state.lock();
            if state.connection != ConnectionState::Connected {
                return Err(ScanError::NotConnected);
            }
            // Set before sending so a ScanningFinished racing the ack is not lost.
            state.scanning = true;
            let (id, rx) = shared.register(&mut state);
            (state.epoch, id, rx)
        };

        // Not under `transitions`: a disconnect must be able to fail this wait.
        match shared.dispatch(id, rx, Outbound::StartScanning).await {
            Ok(_) => {
                info!("scanning started");
                Ok(())
            }
            Err(e) => {
                let mut state = shared.state.lock();
                if state.epoch == epoch {
                    state.scanning = false;
                }
                Err(scan_error(e))
            }
        }
    }

    /// Ask the server to stop discovering devices. A no-op when not scanning.
    pub async fn stop_scanning(&self) -> Result<(), ScanError> {
        let shared = &self.shared;

        let (epoch, id, rx) = {
            let _transition = shared.transitions.lock().await;
            let mut state = shared.state.lock();
            if state.connection != ConnectionState::Connected {
                return Err(ScanError::NotConnected);
            }
            if !state.scanning {
                debug!("scanning already stopped");
                return Ok(());
            }
            let (id, rx) = shared.register(&mut state);
            (state.epoch, id, rx)
        };

        shared
            .dispatch(id, rx, Outbound::StopScanning)
            .await
            .map_err(scan_error)?;
        let mut state = shared.state.lock();
        if state.epoch == epoch {
            state.scanning = false;
        }
        info!("scanning stopped");
        Ok(())
    }

    /// Stop every device the server controls.
    pub async fn stop_all_devices(&self) -> Result<(), CommandError> {
        self.shared
            .request(Outbound::StopAllDevices)
            .await
            .map(|_| ())
            .map_err(command_error)
    }

    /// Known devices, in the order the server reported them.
    pub fn devices(&self) -> Vec<DeviceHandle> {
        let records = self.shared.state.lock().registry.list();
        records
            .into_iter()
            .map(|record| self.shared.handle(record))
            .collect()
    }

    pub fn device(&self, id: DeviceId) -> Option<DeviceHandle> {
        let record = self.shared.state.lock().registry.get(id)?;
        Some(self.shared.handle(record))
    }

    /// Called for each device the server reports, in report order.
    pub fn on_device_added(&self, f: impl Fn(&DeviceHandle) + Send + Sync + 'static) {
        self.shared.observers.on_device_added(Arc::new(f));
    }

    pub fn on_device_removed(&self, f: impl Fn(&DeviceHandle) + Send + Sync + 'static) {
        self.shared.observers.on_device_removed(Arc::new(f));
    }

    pub fn on_scanning_finished(&self, f: impl Fn() + Send + Sync + 'static) {
        self.shared.observers.on_scanning_finished(Arc::new(f));
    }

    /// Called when the server or transport ends the connection.
    pub fn on_server_disconnect(&self, f: impl Fn() + Send + Sync + 'static) {
        self.shared.observers.on_server_disconnect(Arc::new(f));
    }

    /// Called for protocol faults that do not end the connection.
    pub fn on_error(&self, f: impl Fn(&ProtocolFault) + Send + Sync + 'static) {
        self.shared.observers.on_fault(Arc::new(f));
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("identity", &self.shared.identity)
            .field("state", &self.state())
            .finish()
    }
}
