//! Stateful cursor over SDP data elements.
//!
//! Every SDP value is a data element: a one-byte descriptor (five bits of
//! type, three bits of size index) followed by the value bytes, with size
//! indexes 5..=7 carrying an explicit big-endian length prefix instead of a
//! fixed width.

use crate::{
   error::ParseError,
   sdp::ServiceClassId,
};

/// Data element type tags (descriptor bits 7..=3).
pub const TYPE_NIL: u8 = 0;
pub const TYPE_UINT: u8 = 1;
pub const TYPE_INT: u8 = 2;
pub const TYPE_UUID: u8 = 3;
pub const TYPE_TEXT: u8 = 4;
pub const TYPE_BOOL: u8 = 5;
pub const TYPE_SEQUENCE: u8 = 6;
pub const TYPE_ALTERNATIVE: u8 = 7;
pub const TYPE_URL: u8 = 8;

/// One data element borrowed from a record buffer.
///
/// `raw` spans the whole element including its descriptor; `data` only the
/// value bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
   pub type_tag: u8,
   pub data: &'a [u8],
   pub raw: &'a [u8],
}

impl<'a> Element<'a> {
   pub const fn is_container(&self) -> bool {
      matches!(self.type_tag, TYPE_SEQUENCE | TYPE_ALTERNATIVE)
   }

   /// Reads this element as an unsigned 16-bit integer (attribute ids).
   pub fn as_u16(&self) -> Result<u16, ParseError> {
      if self.type_tag != TYPE_UINT || self.data.len() != 2 {
         return Err(ParseError::BadAttributeId);
      }
      Ok(u16::from_be_bytes([self.data[0], self.data[1]]))
   }

   /// Reads this element as a service class id. The element must be a UUID;
   /// its byte width selects the 16-, 32- or 128-bit form.
   pub fn as_service_class(&self) -> Result<ServiceClassId, ParseError> {
      if self.type_tag != TYPE_UUID {
         return Err(ParseError::NotAUuid {
            type_tag: self.type_tag,
         });
      }
      match self.data {
         [a, b] => Ok(ServiceClassId::Uuid16(u16::from_be_bytes([*a, *b]))),
         [a, b, c, d] => Ok(ServiceClassId::Uuid32(u32::from_be_bytes([*a, *b, *c, *d]))),
         bytes if bytes.len() == 16 => {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(bytes);
            Ok(ServiceClassId::Uuid128(uuid::Uuid::from_bytes(raw)))
         },
         bytes => Err(ParseError::UnsupportedUuidWidth { len: bytes.len() }),
      }
   }
}

/// Cursor yielding the data elements of one buffer in order.
///
/// Exhaustion is signalled by the iterator ending, which mirrors the
/// "no more items" sentinel of the platform container enumeration; a decode
/// failure is yielded once and the cursor stops afterwards.
#[derive(Debug)]
pub struct ElementCursor<'a> {
   buf: &'a [u8],
   pos: usize,
   poisoned: bool,
}

impl<'a> ElementCursor<'a> {
   pub const fn new(buf: &'a [u8]) -> Self {
      Self {
         buf,
         pos: 0,
         poisoned: false,
      }
   }

   /// Opens a cursor over the children of a container element.
   pub fn over_container(element: &Element<'a>) -> Result<Self, ParseError> {
      if !element.is_container() {
         return Err(ParseError::NotAContainer {
            type_tag: element.type_tag,
         });
      }
      Ok(Self::new(element.data))
   }

   fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
      let remaining = self.buf.len() - self.pos;
      if remaining < n {
         return Err(ParseError::Truncated {
            offset: self.pos,
            need: n - remaining,
         });
      }
      let slice = &self.buf[self.pos..self.pos + n];
      self.pos += n;
      Ok(slice)
   }

   fn next_element(&mut self) -> Result<Element<'a>, ParseError> {
      let start = self.pos;
      let descriptor = self.take(1)?[0];
      let type_tag = descriptor >> 3;
      let size_index = descriptor & 0x07;

      let len = match size_index {
         0 if type_tag == TYPE_NIL => 0,
         0 => 1,
         1 => 2,
         2 => 4,
         3 => 8,
         4 => 16,
         5 => usize::from(self.take(1)?[0]),
         6 => {
            let len = self.take(2)?;
            usize::from(u16::from_be_bytes([len[0], len[1]]))
         },
         7 => {
            let len = self.take(4)?;
            u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize
         },
         _ => unreachable!("size index is three bits"),
      };

      if type_tag > TYPE_URL || (type_tag == TYPE_NIL && size_index != 0) {
         return Err(ParseError::InvalidDescriptor {
            descriptor,
            offset: start,
         });
      }

      let data = self.take(len)?;
      Ok(Element {
         type_tag,
         data,
         raw: &self.buf[start..self.pos],
      })
   }
}

impl<'a> Iterator for ElementCursor<'a> {
   type Item = Result<Element<'a>, ParseError>;

   fn next(&mut self) -> Option<Self::Item> {
      if self.poisoned || self.pos >= self.buf.len() {
         return None;
      }
      let item = self.next_element();
      if item.is_err() {
         self.poisoned = true;
      }
      Some(item)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_fixed_width_elements() {
      // uint16 0x0001, uuid16 0x110B, bool true
      let buf = [0x09, 0x00, 0x01, 0x19, 0x11, 0x0B, 0x28, 0x01];
      let mut cursor = ElementCursor::new(&buf);

      let attr = cursor.next().unwrap().unwrap();
      assert_eq!(attr.as_u16().unwrap(), 0x0001);

      let uuid = cursor.next().unwrap().unwrap();
      assert_eq!(
         uuid.as_service_class().unwrap(),
         ServiceClassId::Uuid16(0x110B)
      );

      let flag = cursor.next().unwrap().unwrap();
      assert_eq!(flag.type_tag, TYPE_BOOL);
      assert_eq!(flag.data, [0x01]);

      assert!(cursor.next().is_none());
   }

   #[test]
   fn test_length_prefixed_sequence() {
      // sequence (u8 length) holding two uuid16 elements
      let buf = [0x35, 0x06, 0x19, 0x11, 0x01, 0x19, 0x11, 0x0B];
      let mut cursor = ElementCursor::new(&buf);
      let seq = cursor.next().unwrap().unwrap();
      assert!(seq.is_container());
      assert_eq!(seq.raw, &buf[..]);

      let inner: Vec<_> = ElementCursor::over_container(&seq)
         .unwrap()
         .map(|e| e.unwrap().as_service_class().unwrap())
         .collect();
      assert_eq!(
         inner,
         [
            ServiceClassId::Uuid16(0x1101),
            ServiceClassId::Uuid16(0x110B)
         ]
      );
   }

   #[test]
   fn test_truncated_element_poisons_cursor() {
      let buf = [0x19, 0x11]; // uuid16 missing one byte
      let mut cursor = ElementCursor::new(&buf);
      assert!(matches!(
         cursor.next(),
         Some(Err(ParseError::Truncated { .. }))
      ));
      assert!(cursor.next().is_none());
   }

   #[test]
   fn test_uuid128_width() {
      let mut buf = vec![0x1C]; // uuid, size index 4
      buf.extend_from_slice(crate::sdp::BASE_UUID.as_bytes());
      let mut cursor = ElementCursor::new(&buf);
      let id = cursor.next().unwrap().unwrap().as_service_class().unwrap();
      assert_eq!(id, ServiceClassId::Uuid128(crate::sdp::BASE_UUID));
   }

   #[test]
   fn test_non_container_rejected() {
      let buf = [0x28, 0x01];
      let mut cursor = ElementCursor::new(&buf);
      let flag = cursor.next().unwrap().unwrap();
      assert!(matches!(
         ElementCursor::over_container(&flag),
         Err(ParseError::NotAContainer { type_tag: 5 })
      ));
   }
}
