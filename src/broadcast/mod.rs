//! Device-change broadcast decoding.
//!
//! Broadcast payloads start with a fixed header whose type tag selects the
//! body layout. Handle events carry a second discriminator, an event GUID in
//! the trailing variable-data region, which selects the Bluetooth-specific
//! payload.

pub mod presence;

use smol_str::SmolStr;
use uuid::{Uuid, uuid};

use crate::{address::Address, device_class::DeviceClass, error::ParseError};

pub use presence::{PresenceFlags, PresenceReport, RadioInRange};

/// Event GUID discriminators for handle events.
pub const GUID_HCI_EVENT: Uuid = uuid!("fc240062-1541-49be-b463-84c4dcd7bf7f");
pub const GUID_L2CAP_EVENT: Uuid = uuid!("7eae4030-b709-4aa8-ac55-e953829c9daa");
pub const GUID_RADIO_IN_RANGE: Uuid = uuid!("ea3b5b82-26ee-450e-b0d8-d26fe30a3869");
pub const GUID_RADIO_OUT_OF_RANGE: Uuid = uuid!("e0cbf06c-cd8b-4647-bb8a-263b43f0f974");

/// Fixed width of the radio-presence name buffer.
const PRESENCE_NAME_SIZE: usize = 248;

/// Outer broadcast type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr)]
#[repr(u32)]
enum DeviceType {
   Oem = 0x0000,
   Volume = 0x0002,
   Port = 0x0003,
   DeviceInterface = 0x0005,
   Handle = 0x0006,
}

/// A decoded device-change broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastEvent {
   DeviceInterfaceArrival { class: Uuid, name: SmolStr },
   Handle { handle: u64, event: HandleEvent },
   Oem { identifier: u32, supp_func: u32 },
   Port { name: SmolStr },
   Volume { unit_mask: u32, flags: u16 },
}

/// Bluetooth payloads carried by handle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleEvent {
   Hci {
      address: Address,
      connection_type: u8,
      connected: bool,
   },
   L2cap {
      address: Address,
      psm: u16,
      connected: bool,
      initiated: bool,
   },
   RadioInRange(RadioInRange),
   RadioOutOfRange { address: Address },
   UnknownCustom { guid: Uuid },
}

/// Little-endian field reader with bounds accounting.
struct Reader<'a> {
   buf: &'a [u8],
   pos: usize,
}

impl<'a> Reader<'a> {
   const fn new(buf: &'a [u8]) -> Self {
      Self { buf, pos: 0 }
   }

   fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
      if self.buf.len() - self.pos < n {
         return Err(ParseError::EventTooShort {
            expected: self.pos + n,
            actual: self.buf.len(),
         });
      }
      let slice = &self.buf[self.pos..self.pos + n];
      self.pos += n;
      Ok(slice)
   }

   fn u8(&mut self) -> Result<u8, ParseError> {
      Ok(self.take(1)?[0])
   }

   fn u16(&mut self) -> Result<u16, ParseError> {
      let b = self.take(2)?;
      Ok(u16::from_le_bytes([b[0], b[1]]))
   }

   fn u32(&mut self) -> Result<u32, ParseError> {
      let b = self.take(4)?;
      Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
   }

   fn u64(&mut self) -> Result<u64, ParseError> {
      let b = self.take(8)?;
      let mut raw = [0u8; 8];
      raw.copy_from_slice(b);
      Ok(u64::from_le_bytes(raw))
   }

   /// Reads a GUID in its on-wire mixed-endian layout.
   fn guid(&mut self) -> Result<Uuid, ParseError> {
      let d1 = self.u32()?;
      let d2 = self.u16()?;
      let d3 = self.u16()?;
      let mut d4 = [0u8; 8];
      d4.copy_from_slice(self.take(8)?);
      Ok(Uuid::from_fields(d1, d2, d3, &d4))
   }

   fn rest(&mut self) -> &'a [u8] {
      let slice = &self.buf[self.pos..];
      self.pos = self.buf.len();
      slice
   }
}

/// Decodes a UTF-16LE NUL-terminated name from the tail of a payload.
fn utf16_name(bytes: &[u8]) -> Result<SmolStr, ParseError> {
   let units: Vec<u16> = bytes
      .chunks_exact(2)
      .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
      .take_while(|unit| *unit != 0)
      .collect();
   let name = String::from_utf16(&units).map_err(|_| ParseError::InvalidName)?;
   Ok(name.into())
}

/// Decodes a fixed-width NUL-padded UTF-8 name buffer. Returns `None` when
/// the buffer does not hold valid text; presence diffing reports that case
/// instead of failing the whole event.
fn presence_name(bytes: &[u8]) -> Option<SmolStr> {
   let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
   std::str::from_utf8(&bytes[..end]).ok().map(Into::into)
}

/// Decodes one broadcast payload, outer tag first.
pub fn decode_broadcast(payload: &[u8]) -> Result<BroadcastEvent, ParseError> {
   let mut r = Reader::new(payload);
   let _size = r.u32()?;
   let raw_type = r.u32()?;
   let _reserved = r.u32()?;

   let Some(device_type) = DeviceType::from_repr(raw_type) else {
      return Err(ParseError::UnknownBroadcastType(raw_type));
   };

   match device_type {
      DeviceType::DeviceInterface => {
         let class = r.guid()?;
         let name = utf16_name(r.rest())?;
         Ok(BroadcastEvent::DeviceInterfaceArrival { class, name })
      },
      DeviceType::Handle => {
         let handle = r.u64()?;
         let guid = r.guid()?;
         let event = decode_handle_event(guid, r.rest())?;
         Ok(BroadcastEvent::Handle { handle, event })
      },
      DeviceType::Oem => Ok(BroadcastEvent::Oem {
         identifier: r.u32()?,
         supp_func: r.u32()?,
      }),
      DeviceType::Port => Ok(BroadcastEvent::Port {
         name: utf16_name(r.rest())?,
      }),
      DeviceType::Volume => Ok(BroadcastEvent::Volume {
         unit_mask: r.u32()?,
         flags: r.u16()?,
      }),
   }
}

/// Dispatches the trailing data region of a handle event on its event GUID.
fn decode_handle_event(guid: Uuid, data: &[u8]) -> Result<HandleEvent, ParseError> {
   let mut r = Reader::new(data);
   match guid {
      GUID_HCI_EVENT => Ok(HandleEvent::Hci {
         address: Address::from(r.u64()?),
         connection_type: r.u8()?,
         connected: r.u8()? != 0,
      }),
      GUID_L2CAP_EVENT => Ok(HandleEvent::L2cap {
         address: Address::from(r.u64()?),
         psm: r.u16()?,
         connected: r.u8()? != 0,
         initiated: r.u8()? != 0,
      }),
      GUID_RADIO_IN_RANGE => {
         let flags = PresenceFlags(r.u32()?);
         let address = Address::from(r.u64()?);
         let class_of_device = DeviceClass(r.u32()?);
         let name = presence_name(r.take(PRESENCE_NAME_SIZE)?);
         let previous = PresenceFlags(r.u32()?);
         Ok(HandleEvent::RadioInRange(RadioInRange {
            flags,
            address,
            class_of_device,
            name,
            previous,
         }))
      },
      GUID_RADIO_OUT_OF_RANGE => Ok(HandleEvent::RadioOutOfRange {
         address: Address::from(r.u64()?),
      }),
      guid => Ok(HandleEvent::UnknownCustom { guid }),
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn header(device_type: u32, body: &[u8]) -> Vec<u8> {
      let mut payload = Vec::new();
      payload.extend_from_slice(&(12 + body.len() as u32).to_le_bytes());
      payload.extend_from_slice(&device_type.to_le_bytes());
      payload.extend_from_slice(&0u32.to_le_bytes());
      payload.extend_from_slice(body);
      payload
   }

   fn guid_bytes(uuid: Uuid) -> Vec<u8> {
      let (d1, d2, d3, d4) = uuid.as_fields();
      let mut out = Vec::with_capacity(16);
      out.extend_from_slice(&d1.to_le_bytes());
      out.extend_from_slice(&d2.to_le_bytes());
      out.extend_from_slice(&d3.to_le_bytes());
      out.extend_from_slice(d4);
      out
   }

   fn handle_body(event_guid: Uuid, data: &[u8]) -> Vec<u8> {
      let mut body = Vec::new();
      body.extend_from_slice(&0xDEAD_BEEFu64.to_le_bytes());
      body.extend_from_slice(&guid_bytes(event_guid));
      body.extend_from_slice(data);
      body
   }

   #[test]
   fn test_hci_event() {
      let mut data = 0x0011_2233_4455u64.to_le_bytes().to_vec();
      data.push(0x01); // ACL
      data.push(0x01);
      let event = decode_broadcast(&header(6, &handle_body(GUID_HCI_EVENT, &data))).unwrap();
      assert_eq!(
         event,
         BroadcastEvent::Handle {
            handle: 0xDEAD_BEEF,
            event: HandleEvent::Hci {
               address: Address(0x0011_2233_4455),
               connection_type: 0x01,
               connected: true,
            },
         }
      );
   }

   #[test]
   fn test_l2cap_event() {
      let mut data = 0x0011_2233_4455u64.to_le_bytes().to_vec();
      data.extend_from_slice(&0x1001u16.to_le_bytes());
      data.push(0x00);
      data.push(0x01);
      let event = decode_broadcast(&header(6, &handle_body(GUID_L2CAP_EVENT, &data))).unwrap();
      let BroadcastEvent::Handle {
         event: HandleEvent::L2cap {
            psm,
            connected,
            initiated,
            ..
         },
         ..
      } = event
      else {
         panic!("wrong variant: {event:?}");
      };
      assert_eq!(psm, 0x1001);
      assert!(!connected);
      assert!(initiated);
   }

   #[test]
   fn test_radio_in_range_round_trip() {
      let mut data = Vec::new();
      data.extend_from_slice(&(PresenceFlags::ADDRESS | PresenceFlags::NAME).to_le_bytes());
      data.extend_from_slice(&0x0011_2233_4455u64.to_le_bytes());
      data.extend_from_slice(&0x0024_0404u32.to_le_bytes());
      let mut name = [0u8; 248];
      name[..8].copy_from_slice(b"WH-CH510");
      data.extend_from_slice(&name);
      data.extend_from_slice(&PresenceFlags::ADDRESS.to_le_bytes());

      let event = decode_broadcast(&header(6, &handle_body(GUID_RADIO_IN_RANGE, &data))).unwrap();
      let BroadcastEvent::Handle {
         event: HandleEvent::RadioInRange(in_range),
         ..
      } = event
      else {
         panic!("wrong variant: {event:?}");
      };
      assert_eq!(in_range.name.as_deref(), Some("WH-CH510"));
      assert_eq!(in_range.address, Address(0x0011_2233_4455));
      assert!(in_range.flags.contains(PresenceFlags::NAME));
      assert_eq!(in_range.previous, PresenceFlags(PresenceFlags::ADDRESS));
   }

   #[test]
   fn test_unknown_event_guid_is_explicit() {
      let stray = uuid!("01234567-89ab-cdef-0123-456789abcdef");
      let event = decode_broadcast(&header(6, &handle_body(stray, &[]))).unwrap();
      assert_eq!(
         event,
         BroadcastEvent::Handle {
            handle: 0xDEAD_BEEF,
            event: HandleEvent::UnknownCustom { guid: stray },
         }
      );
   }

   #[test]
   fn test_device_interface_arrival() {
      let class = uuid!("e0cbf06c-cd8b-4647-bb8a-263b43f0f974");
      let mut body = guid_bytes(class);
      for unit in "Headset".encode_utf16() {
         body.extend_from_slice(&unit.to_le_bytes());
      }
      body.extend_from_slice(&[0, 0]);
      let event = decode_broadcast(&header(5, &body)).unwrap();
      assert_eq!(
         event,
         BroadcastEvent::DeviceInterfaceArrival {
            class,
            name: "Headset".into(),
         }
      );
   }

   #[test]
   fn test_unknown_outer_tag_is_an_error() {
      let payload = header(0x0001, &[]);
      assert!(matches!(
         decode_broadcast(&payload),
         Err(ParseError::UnknownBroadcastType(1))
      ));
   }

   #[test]
   fn test_truncated_header() {
      assert!(matches!(
         decode_broadcast(&[0x00; 8]),
         Err(ParseError::EventTooShort { .. })
      ));
   }
}
