//! SDP service record decoding.
//!
//! A service record arrives from the platform as one self-describing binary
//! blob per service: a data-element sequence of (attribute-id, value) pairs.
//! This module walks those pairs and deep-decodes the service-class-id list
//! (attribute 1); every other attribute is recorded as seen but left opaque.

pub mod element;
pub mod record;

use std::fmt;

use uuid::Uuid;

pub use record::{Attribute, AttributeRecord, decode_service_record, decode_service_records};

/// Attribute id of the service-class-id list, the only deeply-decoded one.
pub const ATTR_SERVICE_CLASS_ID_LIST: u16 = 0x0001;

/// Base UUID against which 16- and 32-bit service class ids are promoted.
pub const BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5F9B_34FB);

/// General SDP attribute ids, for log output.
const ATTRIBUTE_NAMES: &[(u16, &str)] = &[
   (0, "service record handle"),
   (1, "service class id list"),
   (2, "service record state"),
   (3, "service id"),
   (4, "protocol descriptor list"),
   (5, "browse group list"),
   (6, "language base attribute list"),
   (8, "service availability"),
   (9, "profile descriptor list"),
   (13, "additional protocol descriptor list"),
];

pub fn attribute_name(id: u16) -> Option<&'static str> {
   ATTRIBUTE_NAMES
      .iter()
      .find(|(attr, _)| *attr == id)
      .map(|(_, name)| *name)
}

/// Service class names worth printing by their short id.
const SERVICE_CLASS_NAMES: &[(u16, &str)] = &[
   (0x1101, "serial port"),
   (0x110B, "audio sink"),
   (0x110C, "remote control target"),
   (0x110E, "remote control"),
   (0x111E, "hands free"),
];

/// A decoded service class identifier from the class-id list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceClassId {
   Uuid16(u16),
   Uuid32(u32),
   Uuid128(Uuid),
}

impl ServiceClassId {
   /// Promotes short forms to a full 128-bit UUID using the Bluetooth base.
   pub fn to_uuid(self) -> Uuid {
      match self {
         Self::Uuid16(short) => Self::Uuid32(u32::from(short)).to_uuid(),
         Self::Uuid32(short) => {
            Uuid::from_u128((u128::from(short) << 96) | BASE_UUID.as_u128())
         },
         Self::Uuid128(uuid) => uuid,
      }
   }

   pub fn well_known_name(self) -> Option<&'static str> {
      let short = match self {
         Self::Uuid16(short) => short,
         _ => return None,
      };
      SERVICE_CLASS_NAMES
         .iter()
         .find(|(id, _)| *id == short)
         .map(|(_, name)| *name)
   }
}

impl fmt::Display for ServiceClassId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Self::Uuid16(id) => write!(f, "{id:04x}")?,
         Self::Uuid32(id) => write!(f, "{id:08x}")?,
         Self::Uuid128(uuid) => write!(f, "{uuid}")?,
      }
      if let Some(name) = self.well_known_name() {
         write!(f, " ({name})")?;
      }
      Ok(())
   }
}
