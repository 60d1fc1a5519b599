//! Device model.
//!
//! Provides device records, the per-session registry and the command handles
//! handed out to callers.

pub mod handle;
pub mod record;
pub mod registry;

pub use handle::DeviceHandle;
pub use record::{CommandKind, CommandRequest, DeviceId, DeviceRecord, Feature, FeatureDescriptor};
pub use registry::DeviceRegistry;
