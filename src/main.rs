//! Bluetooth audio tray daemon.
//!
//! Discovers Bluetooth-backed audio endpoints, groups their control handles
//! per physical device and exposes the result over D-Bus for a tray shell to
//! render. Also decodes device-presence broadcasts and tracks the paired
//! device watch stream.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use futures::{StreamExt, stream::BoxStream};
use log::{debug, info, warn};
use smol_str::SmolStr;
use tokio::{signal, sync::Notify, time};
use zbus::{Connection, connection, object_server::InterfaceRef};

use audio::DiscoveryManager;
use dbus::BlueTrayService;
use event::{EventBus, EventSender, TrayEvent};

mod address;
mod audio;
mod broadcast;
mod config;
mod dbus;
mod device_class;
mod error;
mod event;
mod platform;
mod probe;
mod sdp;
mod watch;

use crate::{
   broadcast::{BroadcastEvent, HandleEvent, decode_broadcast},
   config::Config,
   dbus::BlueTrayServiceSignals,
   error::Result,
   platform::DevicePlatform,
   watch::{DeviceWatcher, WatchDelta},
};

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting bluetrayd D-Bus service...");

   let config = Config::load()?;
   info!(
      "Loaded configuration with {} transport prefix(es)",
      config.transport_prefixes.len()
   );

   let parts = platform_parts(&config)?;

   let event_bus = EventProcessor::new();

   let prefixes: Vec<SmolStr> = config.transport_prefixes.iter().map(SmolStr::new).collect();
   let manager = DiscoveryManager::new(parts.platform, prefixes, event_bus.clone());

   let watcher = DeviceWatcher::start(parts.watch_deltas, event_bus.clone());
   spawn_broadcast_listener(parts.broadcasts, event_bus.clone());

   let service = BlueTrayService::new(manager);

   let connection = connection::Builder::session()?
      .name("org.bluetray")?
      .serve_at("/org/bluetray/manager", service)?
      .build()
      .await?;

   info!("bluetrayd D-Bus service started at org.bluetray");

   event_bus.spawn_dispatcher(connection).await?;

   signal::ctrl_c().await?;
   info!("Shutting down bluetrayd...");

   watcher.stop().await;

   Ok(())
}

/// The OS-specific pieces: the device platform plus its two event streams.
struct PlatformParts {
   platform: Arc<dyn DevicePlatform>,
   watch_deltas: BoxStream<'static, WatchDelta>,
   broadcasts: BoxStream<'static, Vec<u8>>,
}

#[cfg(windows)]
fn platform_parts(config: &Config) -> Result<PlatformParts> {
   let platform = Arc::new(platform::windows::WindowsPlatform::new()?);
   Ok(PlatformParts {
      watch_deltas: platform::windows::watch_deltas(config.watch_channel_capacity)?.boxed(),
      broadcasts: platform::windows::broadcast_payloads()?.boxed(),
      platform,
   })
}

#[cfg(not(windows))]
fn platform_parts(_config: &Config) -> Result<PlatformParts> {
   Err(error::BlueTrayError::UnsupportedPlatform)
}

/// Decodes raw device-change broadcasts and surfaces radio-presence changes.
fn spawn_broadcast_listener(mut payloads: BoxStream<'static, Vec<u8>>, event_tx: EventSender) {
   tokio::spawn(async move {
      while let Some(payload) = payloads.next().await {
         debug!("Broadcast payload: {}", hex::encode(&payload));
         match decode_broadcast(&payload) {
            Ok(BroadcastEvent::Handle {
               event: HandleEvent::RadioInRange(in_range),
               ..
            }) => {
               let report = in_range.diff();
               info!("{} in range: {report}", in_range.address);
               event_tx.emit(TrayEvent::PresenceChanged {
                  address: in_range.address,
                  report: SmolStr::new(report.to_string()),
               });
            },
            Ok(BroadcastEvent::Handle {
               event: HandleEvent::RadioOutOfRange { address },
               ..
            }) => {
               info!("{address} out of range");
            },
            Ok(event) => debug!("Broadcast: {event:?}"),
            Err(e) => warn!("Undecodable broadcast: {e}"),
         }
      }
   });
}

struct EventProcessor {
   queue: SegQueue<TrayEvent>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }

   async fn recv(self: &Arc<Self>) -> Option<TrayEvent> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(
      &self,
      iface: &InterfaceRef<BlueTrayService>,
      event: TrayEvent,
   ) -> Result<()> {
      match event {
         TrayEvent::AudioDevicesChanged => {
            iface.audio_devices_changed().await?;
         },
         TrayEvent::WatchDeviceAdded { id, name } => {
            iface.device_added(&id, &name).await?;
         },
         TrayEvent::WatchDeviceUpdated { id, changes } => {
            let changes = changes.into_iter().map(String::from).collect();
            iface.device_updated(&id, changes).await?;
         },
         TrayEvent::WatchDeviceRemoved { id } => {
            iface.device_removed(&id).await?;
         },
         TrayEvent::PresenceChanged { address, report } => {
            iface.presence_changed(&address.to_string(), &report).await?;
         },
      }
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, BlueTrayService>("/org/bluetray/manager")
         .await?;
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      });

      Ok(())
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, event: TrayEvent) {
      self.queue.push(event);
      self.notifier.notify_waiters();
   }
}
