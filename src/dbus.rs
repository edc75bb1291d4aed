use std::str::FromStr;

use log::info;
use uuid::Uuid;
use zbus::{interface, object_server::SignalEmitter};

use crate::{address::Address, audio::ContainerId, audio::DiscoveryManager};

pub struct BlueTrayService {
   manager: DiscoveryManager,
}

impl BlueTrayService {
   pub const fn new(manager: DiscoveryManager) -> Self {
      Self { manager }
   }
}

fn parse_container(container: &str) -> zbus::fdo::Result<ContainerId> {
   let trimmed = container.trim_start_matches('{').trim_end_matches('}');
   Uuid::parse_str(trimmed)
      .map(ContainerId)
      .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))
}

fn parse_address(address: &str) -> zbus::fdo::Result<Address> {
   Address::from_str(address).map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))
}

#[interface(name = "org.bluetray.Manager")]
impl BlueTrayService {
   /// Runs a fresh enumeration and returns the resulting device list.
   async fn refresh_devices(&self) -> zbus::fdo::Result<String> {
      let devices = self
         .manager
         .refresh()
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      let states: Vec<serde_json::Value> = devices.iter().map(|d| d.to_json()).collect();
      Ok(serde_json::to_string(&states).unwrap())
   }

   /// Last completed enumeration without touching the platform.
   async fn get_devices(&self) -> zbus::fdo::Result<String> {
      let states: Vec<serde_json::Value> = self
         .manager
         .snapshot()
         .await
         .iter()
         .map(|d| d.to_json())
         .collect();
      Ok(serde_json::to_string(&states).unwrap())
   }

   async fn connect_device(&self, container: String) -> zbus::fdo::Result<bool> {
      let container = parse_container(&container)?;
      self
         .manager
         .connect_device(container)
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      info!("Reconnect issued for {container}");
      Ok(true)
   }

   async fn disconnect_device(&self, container: String) -> zbus::fdo::Result<bool> {
      let container = parse_container(&container)?;
      self
         .manager
         .disconnect_device(container)
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      info!("Disconnect issued for {container}");
      Ok(true)
   }

   /// SDP inspection of a remote device; returns the decoded records.
   async fn get_services(&self, address: String) -> zbus::fdo::Result<String> {
      let address = parse_address(&address)?;
      let records = self
         .manager
         .inspect_services(address)
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      let records: Vec<serde_json::Value> = records.iter().map(|r| r.to_json()).collect();
      Ok(serde_json::to_string(&records).unwrap())
   }

   // Signals
   #[zbus(signal)]
   pub async fn audio_devices_changed(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn device_added(
      emitter: &SignalEmitter<'_>,
      id: &str,
      name: &str,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn device_updated(
      emitter: &SignalEmitter<'_>,
      id: &str,
      changes: Vec<String>,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn device_removed(emitter: &SignalEmitter<'_>, id: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn presence_changed(
      emitter: &SignalEmitter<'_>,
      address: &str,
      report: &str,
   ) -> zbus::Result<()>;

   // Properties for polling-free updates
   #[zbus(property)]
   async fn devices(&self) -> String {
      self.get_devices().await.unwrap_or_default()
   }

   #[zbus(property)]
   async fn device_count(&self) -> u32 {
      self.manager.snapshot().await.len() as u32
   }
}
