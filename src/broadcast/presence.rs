//! Radio-presence flags and the minimal field-level diff.
//!
//! In-range reports arrive repeatedly while a radio is visible, each carrying
//! the current flag set plus the previous one. The diff keeps repeated
//! polling readable: every field is reported once, with a change marker only
//! where the two snapshots disagree.

use std::fmt;

use smol_str::SmolStr;

use crate::{address::Address, device_class::DeviceClass};

/// Bit set describing which presence fields a report carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PresenceFlags(pub u32);

impl PresenceFlags {
   pub const ADDRESS: u32 = 0x0000_0001;
   pub const CLASS_OF_DEVICE: u32 = 0x0000_0002;
   pub const NAME: u32 = 0x0000_0004;
   pub const PAIRED: u32 = 0x0000_0008;
   pub const PERSONAL: u32 = 0x0000_0010;
   pub const CONNECTED: u32 = 0x0000_0020;
   pub const SSP_SUPPORTED: u32 = 0x0000_0100;
   pub const SSP_PAIRED: u32 = 0x0000_0200;
   pub const SSP_MITM_PROTECTED: u32 = 0x0000_0400;

   pub const fn contains(self, bit: u32) -> bool {
      self.0 & bit != 0
   }

   pub const fn xor(self, other: Self) -> Self {
      Self(self.0 ^ other.0)
   }
}

/// A decoded radio-in-range report: current flags paired with the previous
/// snapshot for diffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioInRange {
   pub flags: PresenceFlags,
   pub address: Address,
   pub class_of_device: DeviceClass,
   pub name: Option<SmolStr>,
   pub previous: PresenceFlags,
}

impl RadioInRange {
   /// Produces the field-by-field change description, in fixed field order.
   pub fn diff(&self) -> PresenceReport {
      let changed = self.flags.xor(self.previous);
      let mut parts = Vec::with_capacity(9);

      let marker = |bit: u32| {
         if changed.contains(bit) { " (changed)" } else { "" }
      };

      if self.flags.contains(PresenceFlags::ADDRESS) {
         parts.push(format!(
            "address={}{}",
            self.address,
            marker(PresenceFlags::ADDRESS)
         ));
      } else if changed.contains(PresenceFlags::ADDRESS) {
         parts.push("address removed".to_string());
      }

      if self.flags.contains(PresenceFlags::CLASS_OF_DEVICE) {
         parts.push(format!(
            "class={}{}",
            self.class_of_device,
            marker(PresenceFlags::CLASS_OF_DEVICE)
         ));
      } else if changed.contains(PresenceFlags::CLASS_OF_DEVICE) {
         parts.push("class removed".to_string());
      }

      if self.flags.contains(PresenceFlags::NAME) {
         match &self.name {
            Some(name) => parts.push(format!("name={name}{}", marker(PresenceFlags::NAME))),
            None => parts.push("failed to get name".to_string()),
         }
      } else if changed.contains(PresenceFlags::NAME) {
         parts.push("name removed".to_string());
      }

      for (bit, label) in [
         (PresenceFlags::PAIRED, "paired"),
         (PresenceFlags::PERSONAL, "personal"),
         (PresenceFlags::CONNECTED, "connected"),
         (PresenceFlags::SSP_SUPPORTED, "support SSP"),
         (PresenceFlags::SSP_PAIRED, "paired with SSP"),
         (PresenceFlags::SSP_MITM_PROTECTED, "protected with SSP"),
      ] {
         parts.push(format!(
            "{label}={}{}",
            self.flags.contains(bit),
            marker(bit)
         ));
      }

      PresenceReport { parts }
   }
}

/// The rendered diff, one entry per reported field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceReport {
   pub parts: Vec<String>,
}

impl fmt::Display for PresenceReport {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      for (i, part) in self.parts.iter().enumerate() {
         if i > 0 {
            f.write_str(", ")?;
         }
         f.write_str(part)?;
      }
      Ok(())
   }
}
