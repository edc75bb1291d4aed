//! Paired-device watch: a registry of known devices and the asynchronous
//! consumer that applies platform watch deltas to it.

pub mod registry;
pub mod watcher;

pub use registry::{DeviceInfo, DeviceWatchRegistry, PropValue};
pub use watcher::{DeviceWatcher, WatchDelta};
