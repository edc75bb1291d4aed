//! Error types for the Bluetooth tray service.
//!
//! This module defines all error types that can occur during discovery,
//! record decoding, watch-registry maintenance and D-Bus dispatch.

use smol_str::SmolStr;
use thiserror::Error;
use tokio::task::JoinError;

/// Main error type for the tray service.
#[derive(Error, Debug)]
pub enum BlueTrayError {
   /// Watch-registry update/remove on an id that was never added. This is a
   /// hard contract violation and is surfaced to the caller.
   #[error("Device not found in watch registry: {0}")]
   NotFound(SmolStr),

   /// A variable-length OS query reported its buffer was too small. Handled
   /// internally by the probe retry, never user-visible on the happy path.
   #[error("Buffer too small: {required} bytes required")]
   ShortBuffer { required: usize },

   /// Malformed record element, contained to the smallest decoding unit.
   #[error("Parse error: {0}")]
   Parse(#[from] ParseError),

   /// Enumeration sentinel signalling the end of a lookup. Not a failure.
   #[error("Lookup ended")]
   LookupEnded,

   /// An underlying platform call failed. The dependent operation logs this
   /// and returns an empty or partial result instead of propagating.
   #[error("System API failure in {op}: code {code}")]
   SystemApi { op: &'static str, code: i32 },

   #[error("Container not enumerated: {0}")]
   ContainerUnknown(crate::audio::ContainerId),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("D-Bus connection error: {0}")]
   DBusConnection(#[from] zbus::fdo::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("No device platform backend for this operating system")]
   UnsupportedPlatform,

   #[error("Discovery manager has been shut down")]
   ManagerShutdown,

   #[error("Actor panicked: {0}")]
   ActorPanicked(JoinError),
}

/// Convenience type alias for Results with `BlueTrayError`.
pub type Result<T> = std::result::Result<T, BlueTrayError>;

/// Error type for binary record decoding (SDP records, broadcast events).
///
/// These are contained failures: a malformed element never aborts the
/// processing of sibling elements, attributes or records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
   #[error("Record truncated at offset {offset}: {need} more bytes needed")]
   Truncated { offset: usize, need: usize },

   #[error("Invalid element descriptor 0x{descriptor:02x} at offset {offset}")]
   InvalidDescriptor { descriptor: u8, offset: usize },

   #[error("Element type {type_tag} is not a container")]
   NotAContainer { type_tag: u8 },

   #[error("Class id element has non-UUID type {type_tag}")]
   NotAUuid { type_tag: u8 },

   #[error("Unsupported UUID width: {len} bytes")]
   UnsupportedUuidWidth { len: usize },

   #[error("Attribute id is not a 16-bit uint")]
   BadAttributeId,

   #[error("Unknown broadcast device type {0}")]
   UnknownBroadcastType(u32),

   #[error("Broadcast payload too short: expected at least {expected} bytes, got {actual}")]
   EventTooShort { expected: usize, actual: usize },

   #[error("Device name is not valid text")]
   InvalidName,
}
