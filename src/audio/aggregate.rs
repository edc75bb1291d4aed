//! Grouping of walker output into one aggregate per physical device.

use std::collections::HashMap;

use log::{debug, warn};
use serde_json::json;
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::audio::{ContainerId, ControlHandle, OneshotCommand, topology::EndpointLink};

/// One physical Bluetooth audio device: a display name plus every control
/// handle its logical sub-devices contributed.
///
/// Aggregates are rebuilt from scratch on every enumeration; holding one
/// across enumerations keeps stale handles alive.
#[derive(Clone)]
pub struct ConnectorAggregate {
   pub container: ContainerId,
   pub display_name: SmolStr,
   pub connected: bool,
   handles: SmallVec<[ControlHandle; 2]>,
}

impl ConnectorAggregate {
   fn new(container: ContainerId, display_name: SmolStr) -> Self {
      Self {
         container,
         display_name,
         connected: false,
         handles: SmallVec::new(),
      }
   }

   fn add_link(&mut self, handle: ControlHandle, active: bool) {
      self.handles.push(handle);
      self.connected |= active;
   }

   pub fn handle_count(&self) -> usize {
      self.handles.len()
   }

   /// Issues a reconnect command to every held handle.
   pub fn connect(&self) {
      self.oneshot_all(OneshotCommand::Reconnect);
   }

   /// Issues a disconnect command to every held handle.
   pub fn disconnect(&self) {
      self.oneshot_all(OneshotCommand::Disconnect);
   }

   /// Fans the command out in sequence. A per-handle failure is logged and
   /// the remaining handles are still attempted.
   fn oneshot_all(&self, command: OneshotCommand) {
      for (i, handle) in self.handles.iter().enumerate() {
         if let Err(e) = handle.oneshot(command) {
            warn!(
               "{:?} on {} (handle {i}) failed: {e}",
               command, self.display_name
            );
         }
      }
   }

   /// Content equality: same name, connection state and handle count. Handle
   /// identities differ between enumerations by design.
   pub fn content_eq(&self, other: &Self) -> bool {
      self.container == other.container
         && self.display_name == other.display_name
         && self.connected == other.connected
         && self.handles.len() == other.handles.len()
   }

   pub fn to_json(&self) -> serde_json::Value {
      json!({
          "container": self.container.to_string(),
          "name": self.display_name,
          "connected": self.connected,
          "profiles": self.handles.len(),
      })
   }
}

/// Groups walker output by container id, in first-seen order.
///
/// A link whose container was never returned by container enumeration is
/// skipped and logged; an aggregate is never constructed with a missing
/// display name.
pub fn aggregate(
   links: Vec<EndpointLink>,
   container_names: &HashMap<ContainerId, SmolStr>,
) -> Vec<ConnectorAggregate> {
   let mut aggregates: Vec<ConnectorAggregate> = Vec::new();
   let mut by_container: HashMap<ContainerId, usize> = HashMap::new();

   for link in links {
      let index = match by_container.get(&link.container) {
         Some(index) => *index,
         None => {
            let Some(name) = container_names.get(&link.container) else {
               warn!("Skipping {}: container was not enumerated", link.container);
               continue;
            };
            debug!("New aggregate {} for {}", name, link.container);
            by_container.insert(link.container, aggregates.len());
            aggregates.push(ConnectorAggregate::new(link.container, name.clone()));
            aggregates.len() - 1
         },
      };
      aggregates[index].add_link(link.handle, link.active);
   }

   aggregates
}

#[cfg(test)]
mod tests {
   use std::sync::Arc;

   use uuid::Uuid;

   use super::*;
   use crate::audio::topology::fake::RecordingControl;

   fn container(n: u128) -> ContainerId {
      ContainerId(Uuid::from_u128(n))
   }

   fn link(
      container: ContainerId,
      active: bool,
   ) -> (Arc<RecordingControl>, EndpointLink) {
      let control = Arc::new(RecordingControl::default());
      let link = EndpointLink {
         container,
         handle: control.clone(),
         active,
      };
      (control, link)
   }

   fn names(pairs: &[(ContainerId, &str)]) -> HashMap<ContainerId, SmolStr> {
      pairs.iter().map(|(id, name)| (*id, SmolStr::new(name))).collect()
   }

   #[test]
   fn test_two_links_one_container_merge() {
      let foo = container(1);
      let (h1, l1) = link(foo, false);
      let (h2, l2) = link(foo, true);

      let aggregates = aggregate(vec![l1, l2], &names(&[(foo, "Foo")]));
      assert_eq!(aggregates.len(), 1);
      let agg = &aggregates[0];
      assert_eq!(agg.display_name, "Foo");
      assert_eq!(agg.handle_count(), 2);
      assert!(agg.connected); // OR of inputs

      agg.disconnect();
      assert_eq!(*h1.commands.lock(), [OneshotCommand::Disconnect]);
      assert_eq!(*h2.commands.lock(), [OneshotCommand::Disconnect]);
   }

   #[test]
   fn test_unknown_container_is_skipped() {
      let known = container(1);
      let unknown = container(2);
      let (_, l1) = link(known, true);
      let (_, l2) = link(unknown, true);

      let aggregates = aggregate(vec![l1, l2], &names(&[(known, "Foo")]));
      assert_eq!(aggregates.len(), 1);
      assert_eq!(aggregates[0].container, known);
   }

   #[test]
   fn test_first_seen_order_is_kept() {
      let a = container(1);
      let b = container(2);
      let links = vec![link(b, false).1, link(a, false).1, link(b, true).1];

      let aggregates = aggregate(links, &names(&[(a, "A"), (b, "B")]));
      assert_eq!(aggregates.len(), 2);
      assert_eq!(aggregates[0].display_name, "B");
      assert_eq!(aggregates[1].display_name, "A");
      assert!(aggregates[0].connected);
      assert!(!aggregates[1].connected);
   }

   #[test]
   fn test_failing_handle_does_not_abort_fanout() {
      let foo = container(1);
      let failing = Arc::new(RecordingControl {
         fail: true,
         ..Default::default()
      });
      let (ok_control, l2) = link(foo, true);
      let l1 = EndpointLink {
         container: foo,
         handle: failing.clone(),
         active: false,
      };

      let aggregates = aggregate(vec![l1, l2], &names(&[(foo, "Foo")]));
      aggregates[0].connect();

      assert_eq!(*failing.commands.lock(), [OneshotCommand::Reconnect]);
      assert_eq!(*ok_control.commands.lock(), [OneshotCommand::Reconnect]);
   }
}
