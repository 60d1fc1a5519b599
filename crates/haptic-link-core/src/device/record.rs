//! Device records and command validation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CommandError;
use crate::protocol::messages::ScalarSubcommand;

/// Server-assigned device identifier, valid for a single connection epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of scalar actuator a command drives.
///
/// Names match the `ActuatorType` strings of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommandKind {
    Vibrate,
    Rotate,
    Oscillate,
    Constrict,
    Inflate,
    Position,
}

impl CommandKind {
    pub const ALL: [CommandKind; 6] = [
        CommandKind::Vibrate,
        CommandKind::Rotate,
        CommandKind::Oscillate,
        CommandKind::Constrict,
        CommandKind::Inflate,
        CommandKind::Position,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Vibrate => "Vibrate",
            CommandKind::Rotate => "Rotate",
            CommandKind::Oscillate => "Oscillate",
            CommandKind::Constrict => "Constrict",
            CommandKind::Inflate => "Inflate",
            CommandKind::Position => "Position",
        }
    }

    /// Map a wire actuator type to a command kind. Unknown types yield `None`.
    pub fn from_actuator_type(actuator: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == actuator)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single independently controllable actuator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    /// Position of the actuator in the device's scalar attribute list.
    pub index: u32,
    pub step_count: u32,
    pub descriptor: String,
}

/// How many actuators of one kind a device exposes, and how to address them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureDescriptor {
    pub features: Vec<Feature>,
}

impl FeatureDescriptor {
    pub fn count(&self) -> usize {
        self.features.len()
    }
}

/// Immutable description of a device for the lifetime of a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    pub display_name: Option<String>,
    pub message_timing_gap_ms: Option<u32>,
    pub capabilities: BTreeMap<CommandKind, FeatureDescriptor>,
}

impl DeviceRecord {
    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            display_name: None,
            message_timing_gap_ms: None,
            capabilities: BTreeMap::new(),
        }
    }

    /// Append an actuator of `kind` at wire index `index`.
    pub fn with_feature(mut self, kind: CommandKind, index: u32, step_count: u32) -> Self {
        self.capabilities.entry(kind).or_default().features.push(Feature {
            index,
            step_count,
            descriptor: String::new(),
        });
        self
    }

    /// Number of actuators of `kind`; 0 if unsupported.
    pub fn capability_count(&self, kind: CommandKind) -> usize {
        self.capabilities.get(&kind).map_or(0, FeatureDescriptor::count)
    }
}

/// A high-level command against one device.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub device_id: DeviceId,
    pub kind: CommandKind,
    pub values: Vec<f64>,
}

impl CommandRequest {
    pub fn new(device_id: DeviceId, kind: CommandKind, values: impl Into<Vec<f64>>) -> Self {
        Self {
            device_id,
            kind,
            values: values.into(),
        }
    }

    /// Validate against `record` and expand into one subcommand per actuator.
    ///
    /// A single value is broadcast to every actuator of the kind; otherwise the
    /// value count must equal the actuator count.
    pub fn resolve(&self, record: &DeviceRecord) -> Result<Vec<ScalarSubcommand>, CommandError> {
        let descriptor = match record.capabilities.get(&self.kind) {
            Some(d) if d.count() > 0 => d,
            _ => return Err(CommandError::Unsupported(record.id, self.kind)),
        };

        let count = descriptor.count();
        if self.values.len() != 1 && self.values.len() != count {
            return Err(CommandError::ArgumentCountMismatch {
                device: record.id,
                kind: self.kind,
                expected: count,
                actual: self.values.len(),
            });
        }

        if let Some(bad) = self
            .values
            .iter()
            .copied()
            .find(|v| !(0.0..=1.0).contains(v))
        {
            return Err(CommandError::ValueOutOfRange(bad));
        }

        let scalars = descriptor
            .features
            .iter()
            .enumerate()
            .map(|(i, feature)| ScalarSubcommand {
                index: feature.index,
                scalar: if self.values.len() == 1 {
                    self.values[0]
                } else {
                    self.values[i]
                },
                actuator_type: self.kind,
            })
            .collect();

        Ok(scalars)
    }
}
