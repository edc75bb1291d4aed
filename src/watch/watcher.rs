//! Asynchronous consumer of platform watch deltas.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use smol_str::SmolStr;
use tokio::{select, sync::oneshot, task::JoinHandle};

use crate::{
   event::{EventSender, TrayEvent},
   watch::registry::{DeviceInfo, DeviceWatchRegistry, PropValue},
};

/// One change reported by the platform device watcher.
#[derive(Debug, Clone)]
pub enum WatchDelta {
   Added {
      id: SmolStr,
      name: SmolStr,
      can_pair: bool,
      is_paired: bool,
   },
   Updated {
      id: SmolStr,
      properties: Vec<(SmolStr, PropValue)>,
   },
   Removed {
      id: SmolStr,
   },
}

/// Single consumer task over a watch delta stream.
///
/// Registry access is serialized behind the shared mutex so D-Bus reads see
/// a consistent view. `stop` stops polling the stream and waits for the
/// in-flight delta to finish before returning.
pub struct DeviceWatcher {
   registry: Arc<Mutex<DeviceWatchRegistry>>,
   shutdown: oneshot::Sender<()>,
   task: JoinHandle<()>,
}

impl DeviceWatcher {
   pub fn start<S>(stream: S, event_tx: EventSender) -> Self
   where
      S: Stream<Item = WatchDelta> + Send + Unpin + 'static,
   {
      let registry = Arc::new(Mutex::new(DeviceWatchRegistry::default()));
      let (shutdown_tx, shutdown_rx) = oneshot::channel();
      let task = tokio::spawn(consume(stream, registry.clone(), event_tx, shutdown_rx));
      Self {
         registry,
         shutdown: shutdown_tx,
         task,
      }
   }

   pub fn registry(&self) -> Arc<Mutex<DeviceWatchRegistry>> {
      self.registry.clone()
   }

   pub async fn stop(self) {
      let _ = self.shutdown.send(());
      if let Err(e) = self.task.await {
         warn!("Watcher task failed on shutdown: {e}");
      }
   }
}

async fn consume<S>(
   mut stream: S,
   registry: Arc<Mutex<DeviceWatchRegistry>>,
   event_tx: EventSender,
   mut shutdown: oneshot::Receiver<()>,
) where
   S: Stream<Item = WatchDelta> + Send + Unpin + 'static,
{
   info!("Device watcher starting up");
   loop {
      select! {
          delta = stream.next() => {
              let Some(delta) = delta else {
                  info!("Watch stream ended");
                  break;
              };
              apply(&registry, &event_tx, delta);
          }
          _ = &mut shutdown => {
              info!("Device watcher stopping");
              break;
          }
      }
   }
}

fn apply(
   registry: &Mutex<DeviceWatchRegistry>,
   event_tx: &EventSender,
   delta: WatchDelta,
) {
   match delta {
      WatchDelta::Added {
         id,
         name,
         can_pair,
         is_paired,
      } => {
         debug!("Device added: {id} ({name})");
         registry.lock().add(
            id.clone(),
            DeviceInfo {
               name: name.clone(),
               can_pair,
               is_paired,
            },
         );
         event_tx.emit(TrayEvent::WatchDeviceAdded { id, name });
      },
      WatchDelta::Updated { id, properties } => {
         match registry.lock().update(&id, &properties) {
            Ok(changes) => {
               if !changes.is_empty() {
                  for change in &changes {
                     debug!("Device {id}: {change}");
                  }
                  event_tx.emit(TrayEvent::WatchDeviceUpdated { id, changes });
               }
            },
            Err(e) => warn!("Update for unwatched device {id}: {e}"),
         }
      },
      WatchDelta::Removed { id } => match registry.lock().remove(&id) {
         Ok(info) => {
            debug!("Device removed: {id} ({})", info.name);
            event_tx.emit(TrayEvent::WatchDeviceRemoved { id });
         },
         Err(e) => warn!("Removal of unwatched device {id}: {e}"),
      },
   }
}
