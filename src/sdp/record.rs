//! Service record decoding: attribute walk + class-id list.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde_json::json;

use crate::{
   error::ParseError,
   sdp::{
      ATTR_SERVICE_CLASS_ID_LIST, ServiceClassId, attribute_name,
      element::{Element, ElementCursor},
   },
};

/// A decoded attribute value.
///
/// Only the service-class-id list is deeply decoded; every other attribute is
/// recorded as seen so callers can still report which ids a record carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
   ServiceClasses(Vec<ServiceClassId>),
   Unparsed,
}

/// One service's attributes, keyed by attribute id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeRecord {
   attributes: BTreeMap<u16, Attribute>,
}

impl AttributeRecord {
   pub fn get(&self, id: u16) -> Option<&Attribute> {
      self.attributes.get(&id)
   }

   pub fn service_classes(&self) -> &[ServiceClassId] {
      match self.attributes.get(&ATTR_SERVICE_CLASS_ID_LIST) {
         Some(Attribute::ServiceClasses(ids)) => ids,
         _ => &[],
      }
   }

   pub fn iter(&self) -> impl Iterator<Item = (u16, &Attribute)> {
      self.attributes.iter().map(|(id, attr)| (*id, attr))
   }

   pub fn len(&self) -> usize {
      self.attributes.len()
   }

   pub fn is_empty(&self) -> bool {
      self.attributes.is_empty()
   }

   pub fn to_json(&self) -> serde_json::Value {
      let attrs: Vec<serde_json::Value> = self
         .iter()
         .map(|(id, attr)| {
            let name = attribute_name(id);
            match attr {
               Attribute::ServiceClasses(ids) => json!({
                   "id": id,
                   "name": name,
                   "service_classes": ids.iter().map(ToString::to_string).collect::<Vec<_>>(),
               }),
               Attribute::Unparsed => json!({ "id": id, "name": name }),
            }
         })
         .collect();
      json!({ "attributes": attrs })
   }
}

/// Decodes one service's raw attribute blob.
///
/// Fails only when the blob is not a record container at all. Corruption in
/// the middle of the pair stream keeps the attributes collected so far, and a
/// malformed element inside the class-id list skips that element only.
pub fn decode_service_record(blob: &[u8]) -> Result<AttributeRecord, ParseError> {
   let mut outer = ElementCursor::new(blob);
   let root = outer.next().ok_or(ParseError::Truncated {
      offset: 0,
      need: 1,
   })??;
   let mut pairs = ElementCursor::over_container(&root)?;

   let mut record = AttributeRecord::default();
   loop {
      let Some(attr_id) = pairs.next() else {
         break; // no more items, normal termination
      };
      let attr_id = match attr_id.and_then(|el| el.as_u16()) {
         Ok(id) => id,
         Err(e) => {
            warn!("Abandoning attribute walk: {e}");
            break;
         },
      };
      let value = match pairs.next() {
         Some(Ok(value)) => value,
         Some(Err(e)) => {
            warn!("Attribute {attr_id} has malformed value: {e}");
            break;
         },
         None => {
            warn!("Attribute {attr_id} has no value element");
            break;
         },
      };

      if attr_id == ATTR_SERVICE_CLASS_ID_LIST {
         record
            .attributes
            .insert(attr_id, Attribute::ServiceClasses(decode_class_id_list(&value)));
      } else {
         record.attributes.insert(attr_id, Attribute::Unparsed);
      }
   }

   Ok(record)
}

/// Decodes every element of the class-id list that can be decoded.
///
/// A non-UUID element or an unsupported width skips that single element; a
/// cursor failure aborts this list only, keeping the partial result.
fn decode_class_id_list(value: &Element<'_>) -> Vec<ServiceClassId> {
   let cursor = match ElementCursor::over_container(value) {
      Ok(cursor) => cursor,
      Err(e) => {
         warn!("Class id list is not a container: {e}");
         return Vec::new();
      },
   };

   let mut ids = Vec::new();
   for element in cursor {
      match element {
         Ok(element) => match element.as_service_class() {
            Ok(id) => ids.push(id),
            Err(e) => warn!("Skipping class id element: {e}"),
         },
         Err(e) => {
            warn!("Abandoning class id list: {e}");
            break;
         },
      }
   }
   ids
}

/// Decodes a batch of per-service blobs with per-record fault isolation.
pub fn decode_service_records<'a, I>(blobs: I) -> Vec<AttributeRecord>
where
   I: IntoIterator<Item = &'a [u8]>,
{
   blobs
      .into_iter()
      .enumerate()
      .filter_map(|(i, blob)| match decode_service_record(blob) {
         Ok(record) => {
            debug!("Service record {i}: {} attributes", record.len());
            Some(record)
         },
         Err(e) => {
            warn!("Skipping undecodable service record {i}: {e}");
            None
         },
      })
      .collect()
}

#[cfg(test)]
mod tests {
   use super::*;

   fn record(pairs: &[&[u8]]) -> Vec<u8> {
      let body: Vec<u8> = pairs.iter().flat_map(|p| p.iter().copied()).collect();
      let mut blob = vec![0x35, body.len() as u8];
      blob.extend_from_slice(&body);
      blob
   }

   fn attr_id(id: u16) -> Vec<u8> {
      let mut out = vec![0x09];
      out.extend_from_slice(&id.to_be_bytes());
      out
   }

   #[test]
   fn test_single_uuid16_class() {
      // attribute 1 -> sequence [uuid16 0x1101]
      let blob = record(&[&attr_id(1), &[0x35, 0x03, 0x19, 0x11, 0x01]]);
      let decoded = decode_service_record(&blob).unwrap();
      assert_eq!(decoded.service_classes(), [ServiceClassId::Uuid16(0x1101)]);
   }

   #[test]
   fn test_bad_element_between_valid_ones_is_skipped() {
      // uuid16, bool (wrong type), uuid16 -- both uuids survive, in order
      let blob = record(&[
         &attr_id(1),
         &[0x35, 0x08, 0x19, 0x11, 0x01, 0x28, 0x01, 0x19, 0x11, 0x0B],
      ]);
      let decoded = decode_service_record(&blob).unwrap();
      assert_eq!(
         decoded.service_classes(),
         [
            ServiceClassId::Uuid16(0x1101),
            ServiceClassId::Uuid16(0x110B)
         ]
      );
   }

   #[test]
   fn test_other_attributes_stay_opaque() {
      // attribute 0 (record handle, uint32) and attribute 4
      let blob = record(&[
         &attr_id(0),
         &[0x0A, 0x00, 0x01, 0x00, 0x00],
         &attr_id(4),
         &[0x35, 0x00],
      ]);
      let decoded = decode_service_record(&blob).unwrap();
      assert_eq!(decoded.get(0), Some(&Attribute::Unparsed));
      assert_eq!(decoded.get(4), Some(&Attribute::Unparsed));
      assert!(decoded.service_classes().is_empty());
   }

   #[test]
   fn test_truncated_list_keeps_partial_ids() {
      // second element claims 16 bytes but the list ends early
      let blob = record(&[&attr_id(1), &[0x35, 0x05, 0x19, 0x11, 0x01, 0x1C, 0x00]]);
      let decoded = decode_service_record(&blob).unwrap();
      assert_eq!(decoded.service_classes(), [ServiceClassId::Uuid16(0x1101)]);
   }

   #[test]
   fn test_pair_corruption_keeps_prior_attributes() {
      // valid attribute 1, then a value element where an attr id should be
      let blob = record(&[
         &attr_id(1),
         &[0x35, 0x03, 0x19, 0x11, 0x0B],
         &[0x28, 0x01],
         &[0x28, 0x01],
      ]);
      let decoded = decode_service_record(&blob).unwrap();
      assert_eq!(decoded.len(), 1);
      assert_eq!(decoded.service_classes(), [ServiceClassId::Uuid16(0x110B)]);
   }

   #[test]
   fn test_non_record_blob_is_an_error() {
      assert!(decode_service_record(&[0x28, 0x01]).is_err());
      assert!(decode_service_record(&[]).is_err());
   }

   #[test]
   fn test_batch_skips_undecodable_records() {
      let good = record(&[&attr_id(1), &[0x35, 0x03, 0x19, 0x11, 0x01]]);
      let bad = vec![0x28, 0x01];
      let decoded = decode_service_records([good.as_slice(), bad.as_slice()]);
      assert_eq!(decoded.len(), 1);
      assert_eq!(decoded[0].service_classes(), [ServiceClassId::Uuid16(0x1101)]);
   }
}
