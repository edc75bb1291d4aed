//! Bluetooth device addresses.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// A 48-bit Bluetooth device address, stored in the low bits of a `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Address(pub u64);

impl Address {
   pub const fn to_u64(self) -> u64 {
      self.0
   }

   pub const fn octets(self) -> [u8; 6] {
      let b = self.0.to_be_bytes();
      [b[2], b[3], b[4], b[5], b[6], b[7]]
   }
}

impl From<u64> for Address {
   fn from(raw: u64) -> Self {
      Self(raw & 0x0000_FFFF_FFFF_FFFF)
   }
}

impl fmt::Display for Address {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let o = self.octets();
      write!(
         f,
         "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
         o[0], o[1], o[2], o[3], o[4], o[5]
      )
   }
}

/// Error returned when parsing an [`Address`] from text fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidAddress;

impl fmt::Display for InvalidAddress {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str("invalid Bluetooth address")
   }
}

impl std::error::Error for InvalidAddress {}

impl FromStr for Address {
   type Err = InvalidAddress;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      let mut raw = 0u64;
      let mut octets = 0usize;
      for part in s.split(':') {
         if part.len() != 2 || octets == 6 {
            return Err(InvalidAddress);
         }
         let byte = u8::from_str_radix(part, 16).map_err(|_| InvalidAddress)?;
         raw = (raw << 8) | u64::from(byte);
         octets += 1;
      }
      if octets != 6 {
         return Err(InvalidAddress);
      }
      Ok(Self(raw))
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_display_round_trip() {
      let addr = Address(0x0012_34AB_CDEF);
      let text = addr.to_string();
      assert_eq!(text, "00:12:34:AB:CD:EF");
      assert_eq!(text.parse::<Address>().unwrap(), addr);
   }

   #[test]
   fn test_rejects_malformed_text() {
      assert!("001234ABCDEF".parse::<Address>().is_err());
      assert!("00:12:34:AB:CD".parse::<Address>().is_err());
      assert!("00:12:34:AB:CD:EF:01".parse::<Address>().is_err());
      assert!("zz:12:34:AB:CD:EF".parse::<Address>().is_err());
   }
}
