//! Registry of watched pairing-capable devices.

use std::collections::HashMap;

use log::debug;
use smol_str::SmolStr;

use crate::error::{BlueTrayError, Result};

/// Property keys the registry tracks. Everything else in a delta is ignored.
pub const PROP_NAME: &str = "System.ItemNameDisplay";
pub const PROP_CAN_PAIR: &str = "System.Devices.Aep.CanPair";
pub const PROP_IS_PAIRED: &str = "System.Devices.Aep.IsPaired";

/// A watch-delta property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
   Text(SmolStr),
   Flag(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
   pub name: SmolStr,
   pub can_pair: bool,
   pub is_paired: bool,
}

/// Devices currently visible to the watcher, keyed by device-id string.
#[derive(Debug, Default)]
pub struct DeviceWatchRegistry {
   devices: HashMap<SmolStr, DeviceInfo>,
}

impl DeviceWatchRegistry {
   /// Inserts or replaces the device. Re-adds of a known id are normal
   /// watcher behavior, not an error.
   pub fn add(&mut self, id: SmolStr, info: DeviceInfo) {
      self.devices.insert(id, info);
   }

   /// Applies recognized properties to a known device and returns one
   /// `field: old -> new` line per value that actually changed.
   pub fn update(
      &mut self,
      id: &str,
      properties: &[(SmolStr, PropValue)],
   ) -> Result<Vec<SmolStr>> {
      let device = self
         .devices
         .get_mut(id)
         .ok_or_else(|| BlueTrayError::NotFound(id.into()))?;

      let mut transitions = Vec::new();
      for (key, value) in properties {
         match (key.as_str(), value) {
            (PROP_NAME, PropValue::Text(name)) => {
               if device.name != *name {
                  transitions
                     .push(SmolStr::new(format!("name: {} -> {name}", device.name)));
                  device.name = name.clone();
               }
            },
            (PROP_CAN_PAIR, PropValue::Flag(can_pair)) => {
               if device.can_pair != *can_pair {
                  transitions.push(SmolStr::new(format!(
                     "can pair: {} -> {can_pair}",
                     device.can_pair
                  )));
                  device.can_pair = *can_pair;
               }
            },
            (PROP_IS_PAIRED, PropValue::Flag(is_paired)) => {
               if device.is_paired != *is_paired {
                  transitions.push(SmolStr::new(format!(
                     "paired: {} -> {is_paired}",
                     device.is_paired
                  )));
                  device.is_paired = *is_paired;
               }
            },
            _ => debug!("Ignoring property {key} on {id}"),
         }
      }
      Ok(transitions)
   }

   /// Evicts a device, returning its last known state.
   pub fn remove(&mut self, id: &str) -> Result<DeviceInfo> {
      self
         .devices
         .remove(id)
         .ok_or_else(|| BlueTrayError::NotFound(id.into()))
   }

   pub fn get(&self, id: &str) -> Option<&DeviceInfo> {
      self.devices.get(id)
   }

   pub fn len(&self) -> usize {
      self.devices.len()
   }

   pub fn is_empty(&self) -> bool {
      self.devices.is_empty()
   }
}
