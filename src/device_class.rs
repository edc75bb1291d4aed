//! Class-of-device decoding for log and diff output.
//!
//! Splits the 24-bit class-of-device word into its major service bits, major
//! class and minor class so presence events can be reported readably instead
//! of as a raw integer.

use std::fmt;

/// Major device class, bits 8..=12 of the class-of-device word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display)]
#[repr(u8)]
pub enum MajorClass {
   #[strum(serialize = "miscellaneous")]
   Miscellaneous = 0x00,
   #[strum(serialize = "computer")]
   Computer = 0x01,
   #[strum(serialize = "phone")]
   Phone = 0x02,
   #[strum(serialize = "lan")]
   Lan = 0x03,
   #[strum(serialize = "audio/video")]
   AudioVideo = 0x04,
   #[strum(serialize = "peripheral")]
   Peripheral = 0x05,
   #[strum(serialize = "imaging")]
   Imaging = 0x06,
   #[strum(serialize = "wearable")]
   Wearable = 0x07,
   #[strum(serialize = "toy")]
   Toy = 0x08,
   #[strum(serialize = "health")]
   Health = 0x09,
   #[strum(serialize = "uncategorized")]
   Uncategorized = 0x1F,
}

/// Major service class bits, bits 16..=23 of the class-of-device word.
const SERVICE_NAMES: &[(u32, &str)] = &[
   (1 << 16, "positioning"),
   (1 << 17, "networking"),
   (1 << 18, "rendering"),
   (1 << 19, "capturing"),
   (1 << 20, "object-transfer"),
   (1 << 21, "audio"),
   (1 << 22, "telephony"),
   (1 << 23, "information"),
];

/// Decoded 24-bit Bluetooth class-of-device word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceClass(pub u32);

impl DeviceClass {
   pub fn major(self) -> Option<MajorClass> {
      MajorClass::from_repr(((self.0 >> 8) & 0x1F) as u8)
   }

   pub const fn minor(self) -> u8 {
      ((self.0 >> 2) & 0x3F) as u8
   }
}

impl fmt::Display for DeviceClass {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self.major() {
         Some(major) => write!(f, "{major}")?,
         None => write!(f, "major 0x{:02x}", (self.0 >> 8) & 0x1F)?,
      }
      write!(f, "/0x{:02x}", self.minor())?;

      let mut first = true;
      for (bit, name) in SERVICE_NAMES {
         if self.0 & bit != 0 {
            f.write_str(if first { " (" } else { "|" })?;
            f.write_str(name)?;
            first = false;
         }
      }
      if !first {
         f.write_str(")")?;
      }
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_headphones_class() {
      // Audio/video major, wearable-headset minor 0x01, audio+rendering services
      let cod = DeviceClass(0x24_04_04);
      assert_eq!(cod.major(), Some(MajorClass::AudioVideo));
      assert_eq!(cod.minor(), 0x01);
      assert_eq!(cod.to_string(), "audio/video/0x01 (rendering|audio)");
   }

   #[test]
   fn test_unknown_major_is_printed_raw() {
      let cod = DeviceClass(0x00_0B_00);
      assert_eq!(cod.major(), None);
      assert_eq!(cod.to_string(), "major 0x0b/0x00");
   }
}
