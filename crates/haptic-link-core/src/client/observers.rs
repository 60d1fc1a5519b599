//! Caller-registered callbacks for session events.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::device::DeviceHandle;
use crate::error::ProtocolFault;

type DeviceCallback = Arc<dyn Fn(&DeviceHandle) + Send + Sync>;
type SignalCallback = Arc<dyn Fn() + Send + Sync>;
type FaultCallback = Arc<dyn Fn(&ProtocolFault) + Send + Sync>;

/// Something observers must hear about, collected while the session state is
/// locked and delivered after it is released.
pub(crate) enum Notification {
    DeviceAdded(DeviceHandle),
    DeviceRemoved(DeviceHandle),
    ScanningFinished,
    ServerDisconnect,
    Fault(ProtocolFault),
}

#[derive(Default)]
pub(crate) struct Observers {
    device_added: RwLock<Vec<DeviceCallback>>,
    device_removed: RwLock<Vec<DeviceCallback>>,
    scanning_finished: RwLock<Vec<SignalCallback>>,
    server_disconnect: RwLock<Vec<SignalCallback>>,
    fault: RwLock<Vec<FaultCallback>>,
}

impl Observers {
    pub fn on_device_added(&self, f: DeviceCallback) {
        self.device_added.write().push(f);
    }

    pub fn on_device_removed(&self, f: DeviceCallback) {
        self.device_removed.write().push(f);
    }

    pub fn on_scanning_finished(&self, f: SignalCallback) {
        self.scanning_finished.write().push(f);
    }

    pub fn on_server_disconnect(&self, f: SignalCallback) {
        self.server_disconnect.write().push(f);
    }

    pub fn on_fault(&self, f: FaultCallback) {
        self.fault.write().push(f);
    }

    /// Deliver notifications in order.
    ///
    /// Callback lists are snapshotted before invocation so a callback may
    /// register further observers.
    pub fn notify(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            match notification {
                Notification::DeviceAdded(device) => {
                    let callbacks = self.device_added.read().clone();
                    callbacks.iter().for_each(|f| f(&device));
                }
                Notification::DeviceRemoved(device) => {
                    let callbacks = self.device_removed.read().clone();
                    callbacks.iter().for_each(|f| f(&device));
                }
                Notification::ScanningFinished => {
                    let callbacks = self.scanning_finished.read().clone();
                    callbacks.iter().for_each(|f| f());
                }
                Notification::ServerDisconnect => {
                    let callbacks = self.server_disconnect.read().clone();
                    callbacks.iter().for_each(|f| f());
                }
                Notification::Fault(fault) => {
                    let callbacks = self.fault.read().clone();
                    callbacks.iter().for_each(|f| f(&fault));
                }
            }
        }
    }
}
