//! Container enumeration and the endpoint topology walk.

use std::collections::HashMap;

use log::{debug, warn};
use smol_str::SmolStr;

use crate::{
   audio::{ContainerId, ControlHandle, EndpointState},
   platform::{AudioTopology, ContainerSource},
};

/// Device-path prefix of the Bluetooth transport enumerators (covers both
/// the A2DP and the hands-free enumerator).
pub const BT_TRANSPORT_PREFIX: &str = r"{2}.\\?\bth";

/// One Bluetooth-backed connector found during the walk: a control handle on
/// the adjacent transport node, keyed by the render endpoint's container.
pub struct EndpointLink {
   pub container: ContainerId,
   pub handle: ControlHandle,
   pub active: bool,
}

/// Enumerates physical device containers into an id -> display-name map.
///
/// Failures degrade to an empty map with a logged cause; container lookup is
/// never allowed to take down the whole discovery pipeline.
pub fn enumerate_containers(source: &dyn ContainerSource) -> HashMap<ContainerId, SmolStr> {
   match source.containers() {
      Ok(containers) => containers.into_iter().collect(),
      Err(e) => {
         warn!("Container enumeration failed: {e}");
         HashMap::new()
      },
   }
}

/// Walks every render endpoint's connectors and yields the Bluetooth-backed
/// adjacent nodes.
///
/// Unreachable edges are skipped, never fatal: a connector without a link, a
/// non-Bluetooth peer and a peer without a control interface all just drop
/// out of the result.
pub fn walk(topology: &dyn AudioTopology, prefixes: &[SmolStr]) -> Vec<EndpointLink> {
   let endpoints = match topology.render_endpoints() {
      Ok(endpoints) => endpoints,
      Err(e) => {
         warn!("Endpoint enumeration failed: {e}");
         return Vec::new();
      },
   };

   let mut links = Vec::new();
   for endpoint in endpoints {
      debug!(
         "Endpoint {} ({}): state {}, container {}",
         endpoint.id, endpoint.name, endpoint.state, endpoint.container
      );

      let peers = match topology.connector_peers(&endpoint.id) {
         Ok(peers) => peers,
         Err(e) => {
            warn!("Connector enumeration failed for {}: {e}", endpoint.id);
            continue;
         },
      };

      for peer in peers {
         // Absence of a link is not an error, the connector is just unwired.
         let Some(path) = peer else { continue };
         debug!("Endpoint {} connected to {path}", endpoint.id);

         if !prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            continue;
         }

         match topology.open_control(&path) {
            Ok(Some(handle)) => links.push(EndpointLink {
               // Keyed by the render endpoint's container: the transport
               // node has no container identity worth surfacing.
               container: endpoint.container,
               handle,
               active: endpoint.state == EndpointState::Active,
            }),
            Ok(None) => debug!("{path} exposes no control interface"),
            Err(e) => warn!("Failed to open control on {path}: {e}"),
         }
      }
   }
   links
}

#[cfg(test)]
pub(crate) mod fake {
   //! In-memory platform used across the discovery tests.

   use std::sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
   };

   use parking_lot::Mutex;
   use smol_str::SmolStr;

   use crate::{
      address::Address,
      audio::{ContainerId, ControlHandle, EndpointState, OneshotCommand, OneshotControl},
      error::{BlueTrayError, Result},
      platform::{AudioTopology, ContainerSource, EndpointDesc, SdpSource},
   };

   #[derive(Default)]
   pub struct RecordingControl {
      pub commands: Mutex<Vec<OneshotCommand>>,
      pub fail: bool,
   }

   impl OneshotControl for RecordingControl {
      fn oneshot(&self, command: OneshotCommand) -> Result<()> {
         self.commands.lock().push(command);
         if self.fail {
            return Err(BlueTrayError::SystemApi {
               op: "oneshot",
               code: -1,
            });
         }
         Ok(())
      }
   }

   pub struct FakeEndpoint {
      pub desc: EndpointDesc,
      pub peers: Vec<Option<SmolStr>>,
   }

   #[derive(Default)]
   pub struct FakePlatform {
      pub endpoints: Vec<FakeEndpoint>,
      pub containers: Vec<(ContainerId, SmolStr)>,
      pub controls: Vec<(SmolStr, Arc<RecordingControl>)>,
      pub sdp_records: Vec<Vec<u8>>,
      pub walk_calls: AtomicUsize,
   }

   impl FakePlatform {
      pub fn endpoint(
         &mut self,
         id: &str,
         container: ContainerId,
         state: EndpointState,
         peers: &[Option<&str>],
      ) {
         self.endpoints.push(FakeEndpoint {
            desc: EndpointDesc {
               id: id.into(),
               name: SmolStr::new(format!("endpoint {id}")),
               container,
               state,
            },
            peers: peers.iter().map(|p| p.map(SmolStr::new)).collect(),
         });
      }

      pub fn control(&mut self, path: &str) -> Arc<RecordingControl> {
         let control = Arc::new(RecordingControl::default());
         self.controls.push((path.into(), control.clone()));
         control
      }
   }

   impl AudioTopology for FakePlatform {
      fn render_endpoints(&self) -> Result<Vec<EndpointDesc>> {
         self.walk_calls.fetch_add(1, Ordering::Relaxed);
         Ok(self.endpoints.iter().map(|e| e.desc.clone()).collect())
      }

      fn connector_peers(&self, endpoint_id: &str) -> Result<Vec<Option<SmolStr>>> {
         Ok(self
            .endpoints
            .iter()
            .find(|e| e.desc.id == endpoint_id)
            .map(|e| e.peers.clone())
            .unwrap_or_default())
      }

      fn open_control(&self, device_path: &str) -> Result<Option<ControlHandle>> {
         Ok(self
            .controls
            .iter()
            .find(|(path, _)| path == device_path)
            .map(|(_, control)| control.clone() as ControlHandle))
      }
   }

   impl ContainerSource for FakePlatform {
      fn containers(&self) -> Result<Vec<(ContainerId, SmolStr)>> {
         Ok(self.containers.clone())
      }
   }

   impl SdpSource for FakePlatform {
      fn service_records(&self, _address: Address) -> Result<Vec<Vec<u8>>> {
         Ok(self.sdp_records.clone())
      }
   }
}

#[cfg(test)]
mod tests {
   use std::sync::Arc;

   use uuid::Uuid;

   use super::{fake::FakePlatform, *};

   fn container(n: u128) -> ContainerId {
      ContainerId(Uuid::from_u128(n))
   }

   fn bt_prefixes() -> Vec<SmolStr> {
      vec![SmolStr::new(BT_TRANSPORT_PREFIX)]
   }

   #[test]
   fn test_walk_filters_to_bluetooth_peers() {
      let mut platform = FakePlatform::default();
      let headphones = container(1);
      platform.endpoint(
         "ep0",
         headphones,
         EndpointState::Active,
         &[
            Some(r"{2}.\\?\bthenum#dev_a"),
            Some(r"{2}.\\?\usb#dev_b"),
            None,
         ],
      );
      let control = platform.control(r"{2}.\\?\bthenum#dev_a");

      let links = walk(&platform, &bt_prefixes());
      assert_eq!(links.len(), 1);
      assert_eq!(links[0].container, headphones);
      assert!(links[0].active);
      let expected: ControlHandle = control;
      assert!(Arc::ptr_eq(&expected, &links[0].handle));
   }

   #[test]
   fn test_inactive_endpoint_yields_inactive_link() {
      let mut platform = FakePlatform::default();
      platform.endpoint(
         "ep0",
         container(1),
         EndpointState::Unplugged,
         &[Some(r"{2}.\\?\bthhfenum#dev_a")],
      );
      platform.control(r"{2}.\\?\bthhfenum#dev_a");

      let links = walk(&platform, &bt_prefixes());
      assert_eq!(links.len(), 1);
      assert!(!links[0].active);
   }

   #[test]
   fn test_endpoint_with_two_connectors_yields_two_links() {
      let mut platform = FakePlatform::default();
      platform.endpoint(
         "ep0",
         container(1),
         EndpointState::Active,
         &[
            Some(r"{2}.\\?\bthenum#a2dp"),
            Some(r"{2}.\\?\bthhfenum#hfp"),
         ],
      );
      platform.control(r"{2}.\\?\bthenum#a2dp");
      platform.control(r"{2}.\\?\bthhfenum#hfp");

      assert_eq!(walk(&platform, &bt_prefixes()).len(), 2);
   }

   #[test]
   fn test_peer_without_control_is_skipped() {
      let mut platform = FakePlatform::default();
      platform.endpoint(
         "ep0",
         container(1),
         EndpointState::Active,
         &[Some(r"{2}.\\?\bthenum#dev_a")],
      );
      // no control registered for the peer
      assert!(walk(&platform, &bt_prefixes()).is_empty());
   }

   #[test]
   fn test_container_enumeration_degrades_to_empty() {
      struct FailingSource;
      impl ContainerSource for FailingSource {
         fn containers(
            &self,
         ) -> crate::error::Result<Vec<(ContainerId, SmolStr)>> {
            Err(crate::error::BlueTrayError::SystemApi {
               op: "containers",
               code: -1,
            })
         }
      }

      assert!(enumerate_containers(&FailingSource).is_empty());
   }
}
