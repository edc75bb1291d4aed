//! Event fan-out for device state changes.
//!
//! Decoders and the discovery manager publish through this seam; the
//! processing loop in `main` forwards events to the D-Bus signal surface.

use std::sync::Arc;

use smol_str::SmolStr;

use crate::address::Address;

/// Events emitted by the discovery and watch pipelines.
#[derive(Debug, Clone)]
pub enum TrayEvent {
   /// The set of Bluetooth audio aggregates changed after a refresh.
   AudioDevicesChanged,
   WatchDeviceAdded {
      id: SmolStr,
      name: SmolStr,
   },
   WatchDeviceUpdated {
      id: SmolStr,
      changes: Vec<SmolStr>,
   },
   WatchDeviceRemoved {
      id: SmolStr,
   },
   /// A device-presence broadcast reported changed radio state.
   PresenceChanged {
      address: Address,
      report: SmolStr,
   },
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, event: TrayEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;
