//! Discovery manager actor.
//!
//! Owns the latest set of connector aggregates and serializes all refresh,
//! snapshot and control traffic through one command inbox. Enumeration runs
//! on the blocking pool; completions come back over a loopback channel so the
//! actor never blocks its own loop.

use std::sync::Arc;

use log::{debug, info, warn};
use smol_str::SmolStr;
use tokio::{
   select,
   sync::{mpsc, oneshot},
   task,
};

use crate::{
   address::Address,
   audio::{
      ConnectorAggregate, ContainerId, OneshotCommand, aggregate,
      topology::{enumerate_containers, walk},
   },
   error::{BlueTrayError, Result},
   event::{EventSender, TrayEvent},
   platform::DevicePlatform,
   sdp::record::{AttributeRecord, decode_service_records},
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 1000;

enum Command {
   Refresh(Option<oneshot::Sender<Vec<ConnectorAggregate>>>),
   Snapshot(oneshot::Sender<Vec<ConnectorAggregate>>),
   Oneshot(ContainerId, OneshotCommand, oneshot::Sender<Result<()>>),
   InspectServices(Address, oneshot::Sender<Result<Vec<AttributeRecord>>>),
   RefreshDone {
      generation: u64,
      aggregates: Vec<ConnectorAggregate>,
   },
}

/// Handle to the discovery actor.
///
/// Cheap to clone; all clones feed the same inbox.
#[derive(Clone)]
pub struct DiscoveryManager {
   inbox: mpsc::Sender<Command>,
}

impl DiscoveryManager {
   pub fn new(
      platform: Arc<dyn DevicePlatform>,
      prefixes: Vec<SmolStr>,
      event_tx: EventSender,
   ) -> Self {
      let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      tokio::spawn(ManagerActor::new(platform, prefixes, event_tx, command_rx).run());
      Self { inbox: command_tx }
   }

   /// Triggers a fresh enumeration and waits for its result. Concurrent
   /// callers all receive the newest completed enumeration.
   pub async fn refresh(&self) -> Result<Vec<ConnectorAggregate>> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(Command::Refresh(Some(tx)))
         .await
         .map_err(|_| BlueTrayError::ManagerShutdown)?;
      rx.await.map_err(|_| BlueTrayError::ManagerShutdown)
   }

   /// Last completed enumeration, without touching the platform.
   pub async fn snapshot(&self) -> Vec<ConnectorAggregate> {
      let (tx, rx) = oneshot::channel();
      if self.inbox.send(Command::Snapshot(tx)).await.is_err() {
         return Vec::new();
      }
      rx.await.unwrap_or_default()
   }

   pub async fn connect_device(&self, container: ContainerId) -> Result<()> {
      self.oneshot(container, OneshotCommand::Reconnect).await
   }

   pub async fn disconnect_device(&self, container: ContainerId) -> Result<()> {
      self.oneshot(container, OneshotCommand::Disconnect).await
   }

   async fn oneshot(&self, container: ContainerId, command: OneshotCommand) -> Result<()> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(Command::Oneshot(container, command, tx))
         .await
         .map_err(|_| BlueTrayError::ManagerShutdown)?;
      rx.await.map_err(|_| BlueTrayError::ManagerShutdown)?
   }

   /// Runs an SDP inquiry against the remote device and decodes every record
   /// that survives decoding.
   pub async fn inspect_services(&self, address: Address) -> Result<Vec<AttributeRecord>> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(Command::InspectServices(address, tx))
         .await
         .map_err(|_| BlueTrayError::ManagerShutdown)?;
      rx.await.map_err(|_| BlueTrayError::ManagerShutdown)?
   }
}

struct ManagerActor {
   platform: Arc<dyn DevicePlatform>,
   prefixes: Vec<SmolStr>,
   event_tx: EventSender,
   command_rx: mpsc::Receiver<Command>,
   loopback_rx: mpsc::Receiver<Command>,
   loopback_tx: mpsc::Sender<Command>,

   // State
   aggregates: Vec<ConnectorAggregate>,
   generation: u64,
   waiters: Vec<oneshot::Sender<Vec<ConnectorAggregate>>>,
}

impl ManagerActor {
   fn new(
      platform: Arc<dyn DevicePlatform>,
      prefixes: Vec<SmolStr>,
      event_tx: EventSender,
      command_rx: mpsc::Receiver<Command>,
   ) -> Self {
      let (loopback_tx, loopback_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      Self {
         platform,
         prefixes,
         event_tx,
         command_rx,
         loopback_rx,
         loopback_tx,
         aggregates: Vec::new(),
         generation: 0,
         waiters: Vec::new(),
      }
   }

   async fn run(mut self) {
      info!("Discovery manager starting up");
      self.spawn_refresh();

      loop {
         select! {
             cmd = self.command_rx.recv() => {
                 let Some(cmd) = cmd else {
                     info!("Discovery manager shutting down");
                     break;
                 };
                 self.handle_command(cmd).await;
             }
             Some(cmd) = self.loopback_rx.recv() => {
                 self.handle_command(cmd).await;
             }
         }
      }
   }

   async fn handle_command(&mut self, cmd: Command) {
      match cmd {
         Command::Refresh(reply) => {
            if let Some(reply) = reply {
               self.waiters.push(reply);
            }
            self.spawn_refresh();
         },
         Command::Snapshot(reply) => {
            let _ = reply.send(self.aggregates.clone());
         },
         Command::Oneshot(container, command, reply) => {
            let _ = reply.send(self.handle_oneshot(container, command));
         },
         Command::InspectServices(address, reply) => {
            self.spawn_inspect(address, reply);
         },
         Command::RefreshDone {
            generation,
            aggregates,
         } => {
            self.handle_refresh_done(generation, aggregates);
         },
      }
   }

   /// Starts an enumeration on the blocking pool. A newer spawn supersedes
   /// every older one still in flight.
   fn spawn_refresh(&mut self) {
      self.generation += 1;
      let generation = self.generation;
      debug!("Starting enumeration {generation}");

      let platform = self.platform.clone();
      let prefixes = self.prefixes.clone();
      let loopback = self.loopback_tx.clone();
      tokio::spawn(async move {
         let result =
            task::spawn_blocking(move || discover(&*platform, &prefixes)).await;
         let aggregates = match result {
            Ok(aggregates) => aggregates,
            Err(e) => {
               warn!("Enumeration {generation} panicked: {e}");
               Vec::new()
            },
         };
         if loopback
            .send(Command::RefreshDone {
               generation,
               aggregates,
            })
            .await
            .is_err()
         {
            debug!("Manager gone before enumeration {generation} completed");
         }
      });
   }

   fn handle_refresh_done(&mut self, generation: u64, aggregates: Vec<ConnectorAggregate>) {
      if generation < self.generation {
         debug!(
            "Discarding superseded enumeration {generation} (newest is {})",
            self.generation
         );
         return;
      }

      let changed = self.aggregates.len() != aggregates.len()
         || self
            .aggregates
            .iter()
            .zip(&aggregates)
            .any(|(old, new)| !old.content_eq(new));

      info!(
         "Enumeration {generation} complete: {} device(s)",
         aggregates.len()
      );
      self.aggregates = aggregates;

      for waiter in self.waiters.drain(..) {
         let _ = waiter.send(self.aggregates.clone());
      }

      if changed {
         self.event_tx.emit(TrayEvent::AudioDevicesChanged);
      }
   }

   fn handle_oneshot(&self, container: ContainerId, command: OneshotCommand) -> Result<()> {
      let aggregate = self
         .aggregates
         .iter()
         .find(|a| a.container == container)
         .ok_or(BlueTrayError::ContainerUnknown(container))?;

      info!("{command:?} requested for {}", aggregate.display_name);
      match command {
         OneshotCommand::Reconnect => aggregate.connect(),
         OneshotCommand::Disconnect => aggregate.disconnect(),
      }
      Ok(())
   }

   /// SDP inquiries are independent of the enumeration pipeline; each runs on
   /// the blocking pool and replies directly.
   fn spawn_inspect(&self, address: Address, reply: oneshot::Sender<Result<Vec<AttributeRecord>>>) {
      let platform = self.platform.clone();
      tokio::spawn(async move {
         let result = task::spawn_blocking(move || {
            let blobs = platform.service_records(address)?;
            Ok(decode_service_records(blobs.iter().map(Vec::as_slice)))
         })
         .await
         .unwrap_or_else(|e| Err(BlueTrayError::ActorPanicked(e)));
         let _ = reply.send(result);
      });
   }
}

/// One full enumeration: containers, topology walk, regrouping.
fn discover(platform: &dyn DevicePlatform, prefixes: &[SmolStr]) -> Vec<ConnectorAggregate> {
   let names = enumerate_containers(platform);
   let links = walk(platform, prefixes);
   aggregate(links, &names)
}

#[cfg(test)]
mod tests {
   use uuid::Uuid;

   use super::*;
   use crate::{
      audio::topology::{BT_TRANSPORT_PREFIX, fake::FakePlatform},
      event::EventBus,
      sdp::ServiceClassId,
   };

   struct NullBus;
   impl EventBus for NullBus {
      fn emit(&self, _event: TrayEvent) {}
   }

   fn manager(platform: FakePlatform) -> DiscoveryManager {
      DiscoveryManager::new(
         Arc::new(platform),
         vec![SmolStr::new(BT_TRANSPORT_PREFIX)],
         Arc::new(NullBus),
      )
   }

   fn headset_platform() -> (FakePlatform, ContainerId) {
      let container = ContainerId(Uuid::from_u128(7));
      let mut platform = FakePlatform::default();
      platform.containers.push((container, "Headset".into()));
      platform.endpoint(
         "ep0",
         container,
         crate::audio::EndpointState::Active,
         &[Some(r"{2}.\\?\bthenum#dev")],
      );
      platform.control(r"{2}.\\?\bthenum#dev");
      (platform, container)
   }

   #[tokio::test]
   async fn test_refresh_builds_aggregates() {
      let (platform, container) = headset_platform();
      let manager = manager(platform);

      let devices = manager.refresh().await.unwrap();
      assert_eq!(devices.len(), 1);
      assert_eq!(devices[0].container, container);
      assert_eq!(devices[0].display_name, "Headset");
      assert!(devices[0].connected);

      let snapshot = manager.snapshot().await;
      assert_eq!(snapshot.len(), 1);
      assert!(snapshot[0].content_eq(&devices[0]));
   }

   #[tokio::test]
   async fn test_enumeration_is_idempotent() {
      let (platform, _) = headset_platform();
      let manager = manager(platform);

      let first = manager.refresh().await.unwrap();
      let second = manager.refresh().await.unwrap();
      assert_eq!(first.len(), second.len());
      assert!(first.iter().zip(&second).all(|(a, b)| a.content_eq(b)));
   }

   #[tokio::test]
   async fn test_concurrent_refreshes_all_resolve() {
      let (platform, _) = headset_platform();
      let manager = manager(platform);

      let (a, b) = tokio::join!(manager.refresh(), manager.refresh());
      assert_eq!(a.unwrap().len(), 1);
      assert_eq!(b.unwrap().len(), 1);
   }

   #[tokio::test]
   async fn test_oneshot_reaches_transport_handle() {
      let container = ContainerId(Uuid::from_u128(7));
      let mut platform = FakePlatform::default();
      platform.containers.push((container, "Headset".into()));
      platform.endpoint(
         "ep0",
         container,
         crate::audio::EndpointState::Unplugged,
         &[Some(r"{2}.\\?\bthenum#dev")],
      );
      let control = platform.control(r"{2}.\\?\bthenum#dev");

      let manager = manager(platform);
      manager.refresh().await.unwrap();
      manager.connect_device(container).await.unwrap();

      assert_eq!(*control.commands.lock(), [OneshotCommand::Reconnect]);
   }

   #[tokio::test]
   async fn test_oneshot_on_unknown_container_fails() {
      let (platform, _) = headset_platform();
      let manager = manager(platform);
      manager.refresh().await.unwrap();

      let missing = ContainerId(Uuid::from_u128(99));
      let err = manager.disconnect_device(missing).await.unwrap_err();
      assert!(matches!(err, BlueTrayError::ContainerUnknown(c) if c == missing));
   }

   #[tokio::test]
   async fn test_inspect_services_decodes_records() {
      let (mut platform, _) = headset_platform();
      // audio sink record: attribute 1 -> [uuid16 0x110B]
      platform
         .sdp_records
         .push(vec![0x35, 0x08, 0x09, 0x00, 0x01, 0x35, 0x03, 0x19, 0x11, 0x0B]);
      let manager = manager(platform);

      let records = manager
         .inspect_services(Address(0x1234_5678_9ABC))
         .await
         .unwrap();
      assert_eq!(records.len(), 1);
      assert_eq!(
         records[0].service_classes(),
         [ServiceClassId::Uuid16(0x110B)]
      );
   }
}
