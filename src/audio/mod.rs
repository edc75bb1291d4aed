//! Bluetooth-backed audio endpoint discovery and control.
//!
//! The platform enumerates audio endpoints and physical device containers in
//! two independent domains; this module walks the endpoint topology, filters
//! to Bluetooth-backed connectors and regroups the scattered control handles
//! into one aggregate per physical device.

pub mod aggregate;
pub mod manager;
pub mod topology;

use std::{fmt, sync::Arc};

use uuid::Uuid;

use crate::error::Result;

pub use aggregate::{ConnectorAggregate, aggregate};
pub use manager::DiscoveryManager;

/// Opaque 128-bit identity grouping the logical sub-devices of one physical
/// product. Immutable once obtained from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ContainerId(pub Uuid);

impl fmt::Display for ContainerId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{{{}}}", self.0)
   }
}

/// Presence state of an audio endpoint, matching the platform state mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display)]
#[repr(u32)]
pub enum EndpointState {
   #[strum(serialize = "active")]
   Active = 0x1,
   #[strum(serialize = "disabled")]
   Disabled = 0x2,
   #[strum(serialize = "absent")]
   NotPresent = 0x4,
   #[strum(serialize = "unplugged")]
   Unplugged = 0x8,
}

/// One-shot property commands understood by Bluetooth audio transport nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneshotCommand {
   Reconnect,
   Disconnect,
}

/// Capability to send a one-shot property command to one logical sub-device.
///
/// Handles carry no identity beyond the object itself and are not comparable
/// or orderable.
pub trait OneshotControl: Send + Sync {
   fn oneshot(&self, command: OneshotCommand) -> Result<()>;
}

pub type ControlHandle = Arc<dyn OneshotControl>;
