//! Configuration management for the discovery service.
//!
//! Handles loading and saving configuration from disk, including transport
//! classification prefixes and event dispatch tuning.

use std::{env, fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
   audio::topology::BT_TRANSPORT_PREFIX,
   error::{BlueTrayError, Result},
};

/// Main configuration structure for the service.
#[derive(Serialize, Deserialize, Clone)]
pub struct Config {
   /// Device-path prefixes classifying a connector peer as Bluetooth-backed.
   #[serde(default = "default_transport_prefixes")]
   pub transport_prefixes: Vec<String>,

   #[serde(default = "default_watch_channel_capacity")]
   pub watch_channel_capacity: usize,
}

fn default_transport_prefixes() -> Vec<String> {
   vec![BT_TRANSPORT_PREFIX.to_string()]
}

const fn default_watch_channel_capacity() -> usize {
   1000
}

impl Default for Config {
   fn default() -> Self {
      Self {
         transport_prefixes: default_transport_prefixes(),
         watch_channel_capacity: default_watch_channel_capacity(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      let config_path = Self::config_path()?;

      if config_path.exists() {
         let contents = fs::read_to_string(&config_path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save()?;
         Ok(config)
      }
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      let config_path = Self::config_path()?;

      if let Some(parent) = config_path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(&config_path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(bluetray_home) = env::var("BLUETRAY_HOME") {
         PathBuf::from(bluetray_home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Ok(home) = env::var("HOME") {
         PathBuf::from(home).join(".config")
      } else {
         return Err(BlueTrayError::ConfigDirNotFound);
      };

      Ok(config_dir.join("bluetrayd").join("config.toml"))
   }
}
