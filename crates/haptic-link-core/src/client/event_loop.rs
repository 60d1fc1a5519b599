//! Serialized processing of inbound events, plus the keep-alive task.
//!
//! Exactly one event loop runs per connection. Registry mutations, reply
//! delivery and observer callbacks all happen here, in frame order.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::connector::Inbound;
use crate::error::ProtocolFault;
use crate::protocol::messages::SYSTEM_MESSAGE_ID;
use crate::protocol::{Outbound, ProtocolEvent};

use super::observers::Notification;
use super::{ConnectionState, Reply, RequestError, Shared};

pub(super) async fn run(shared: Weak<Shared>, mut inbound: Inbound, epoch: u64) {
    while let Some(frame) = inbound.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        trace!(frame = %frame, "inbound frame");

        for decoded in shared.codec.decode(&frame) {
            match decoded {
                Ok(event) => {
                    let notifications = shared.apply(epoch, event);
                    shared.observers.notify(notifications);
                }
                Err(e) if e.is_fatal() => {
                    warn!(error = %e, "protocol violation, closing connection");
                    shared
                        .observers
                        .notify(vec![Notification::Fault(ProtocolFault::Decode(e))]);
                    close(&shared, epoch).await;
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "dropping malformed message");
                    shared
                        .observers
                        .notify(vec![Notification::Fault(ProtocolFault::Decode(e))]);
                }
            }
        }
    }

    if let Some(shared) = shared.upgrade() {
        close(&shared, epoch).await;
    }
}

/// Handle the end of the transport for `epoch`, unless the session has
/// already moved on.
async fn close(shared: &Arc<Shared>, epoch: u64) {
    {
        let state = shared.state.lock();
        if state.epoch != epoch || state.connection == ConnectionState::Disconnected {
            return;
        }
    }

    let _ = shared.connector.disconnect().await;
    let notifications = shared.apply(epoch, ProtocolEvent::Disconnected);
    shared.observers.notify(notifications);
}

/// Send keep-alive pings every `interval` until the connection ends.
pub(super) async fn ping(shared: Weak<Shared>, epoch: u64, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if shared.state.lock().epoch != epoch {
            return;
        }

        match shared.request(Outbound::Ping).await {
            Ok(_) => trace!("ping acknowledged"),
            Err(RequestError::NotConnected) => return,
            Err(e) => {
                warn!(error = ?e, "ping failed");
                shared
                    .observers
                    .notify(vec![Notification::Fault(ProtocolFault::PingFailed(format!(
                        "{:?}",
                        e
                    )))]);
            }
        }
    }
}

impl Shared {
    /// Apply one event to the session state, returning what observers must hear.
    fn apply(self: &Arc<Self>, epoch: u64, event: ProtocolEvent) -> Vec<Notification> {
        let mut out = Vec::new();
        let mut stale_tasks: Vec<JoinHandle<()>> = Vec::new();

        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                trace!(?event, "ignoring event from previous connection");
                return out;
            }

            match event {
                ProtocolEvent::HandshakeAck {
                    id,
                    server_name,
                    message_version,
                    max_ping_time,
                } => {
                    debug!(%server_name, message_version, ?max_ping_time, "server info received");
                    let reply = Reply::ServerInfo {
                        server_name,
                        max_ping_time,
                    };
                    Self::resolve(&mut state, id, Ok(reply), &mut out);
                }
                ProtocolEvent::DeviceList { id, devices } => {
                    for record in devices {
                        // Already announced through DeviceAdded on this connection.
                        if state
                            .registry
                            .get(record.id)
                            .is_some_and(|current| *current == record)
                        {
                            continue;
                        }
                        self.add_device(&mut state, record, &mut out);
                    }
                    Self::resolve(&mut state, id, Ok(Reply::DeviceList), &mut out);
                }
                ProtocolEvent::DeviceAdded(record) => {
                    self.add_device(&mut state, record, &mut out);
                }
                ProtocolEvent::DeviceRemoved(id) => match state.registry.remove(id) {
                    Some(record) => {
                        info!(device = %id, name = %record.name, "device removed");
                        out.push(Notification::DeviceRemoved(self.handle(record)));
                    }
                    None => {
                        warn!(device = %id, "removal of unknown device");
                        out.push(Notification::Fault(ProtocolFault::UnknownDevice(id)));
                    }
                },
                ProtocolEvent::ScanningFinished => {
                    debug!("scanning finished");
                    state.scanning = false;
                    out.push(Notification::ScanningFinished);
                }
                ProtocolEvent::CommandAck { id } => {
                    Self::resolve(&mut state, id, Ok(Reply::Ok), &mut out);
                }
                ProtocolEvent::CommandError {
                    id: SYSTEM_MESSAGE_ID,
                    reason,
                    code,
                } => {
                    warn!(?code, %reason, "server error");
                    out.push(Notification::Fault(ProtocolFault::Server { reason, code }));
                }
                ProtocolEvent::CommandError { id, reason, .. } => {
                    Self::resolve(&mut state, id, Err(RequestError::Rejected(reason)), &mut out);
                }
                ProtocolEvent::Disconnected => {
                    let was_connected = state.connection == ConnectionState::Connected;
                    if state.connection != ConnectionState::Disconnected {
                        info!("connection closed by server");
                        stale_tasks = state.teardown();
                    }
                    // A failed connect attempt is reported through `connect` alone.
                    if was_connected {
                        out.push(Notification::ServerDisconnect);
                    }
                }
            }
        }

        // Includes this loop's own task, which finishes without awaiting again.
        stale_tasks.iter().for_each(JoinHandle::abort);
        out
    }
}
