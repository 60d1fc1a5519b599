//! Per-device command handle.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::client::Shared;
use crate::error::CommandError;
use crate::protocol::Outbound;

use super::record::{CommandKind, CommandRequest, DeviceId, DeviceRecord};

/// A device as seen by callers: cached capabilities plus validated commands.
///
/// Handles stay valid only while their device is registered in the session
/// that produced them. Afterwards commands fail with `NotConnected` (session
/// disconnected) or `DeviceGone` (device removed, or a newer connection).
#[derive(Clone)]
pub struct DeviceHandle {
    record: Arc<DeviceRecord>,
    session: Weak<Shared>,
}

impl DeviceHandle {
    pub(crate) fn new(record: Arc<DeviceRecord>, session: Weak<Shared>) -> Self {
        Self { record, session }
    }

    pub fn id(&self) -> DeviceId {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn display_name(&self) -> Option<&str> {
        self.record.display_name.as_deref()
    }

    pub fn record(&self) -> &DeviceRecord {
        &self.record
    }

    /// Number of independently controllable features of `kind`; 0 if unsupported.
    pub fn capability_count(&self, kind: CommandKind) -> usize {
        self.record.capability_count(kind)
    }

    /// Drive every feature of `kind`.
    ///
    /// One value is applied to all features; otherwise there must be exactly
    /// one value per feature. Values must lie in `0.0..=1.0`. Validation
    /// happens locally, before anything is sent. Returns once the server
    /// acknowledges the command.
    pub async fn command(
        &self,
        kind: CommandKind,
        values: impl Into<Vec<f64>>,
    ) -> Result<(), CommandError> {
        let request = CommandRequest::new(self.id(), kind, values);
        let session = self.session.upgrade().ok_or(CommandError::NotConnected)?;
        session
            .device_command(&self.record, |record| {
                let scalars = request.resolve(record)?;
                Ok(Outbound::Scalar {
                    device: record.id,
                    scalars,
                })
            })
            .await
    }

    pub async fn vibrate(&self, values: impl Into<Vec<f64>>) -> Result<(), CommandError> {
        self.command(CommandKind::Vibrate, values).await
    }

    /// Stop all actuators on this device.
    pub async fn stop(&self) -> Result<(), CommandError> {
        let session = self.session.upgrade().ok_or(CommandError::NotConnected)?;
        session
            .device_command(&self.record, |record| Ok(Outbound::StopDevice(record.id)))
            .await
    }
}

impl PartialEq for DeviceHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.record.id)
            .field("name", &self.record.name)
            .finish()
    }
}
