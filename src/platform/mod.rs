//! Platform seams for device enumeration.
//!
//! The discovery core talks to the operating system exclusively through these
//! traits, so the walker, aggregator and decoders stay platform-neutral and
//! testable against in-memory fakes. The real backend lives in the
//! OS-specific submodule.

use smol_str::SmolStr;

use crate::{
   address::Address,
   audio::{ContainerId, ControlHandle, EndpointState},
   error::Result,
};

#[cfg(windows)]
pub mod windows;

/// Descriptor of one audio render endpoint, as read from its property
/// metadata.
#[derive(Debug, Clone)]
pub struct EndpointDesc {
   pub id: SmolStr,
   pub name: SmolStr,
   pub container: ContainerId,
   pub state: EndpointState,
}

/// The audio-endpoint topology graph.
pub trait AudioTopology: Send + Sync {
   /// Every audio render endpoint on the host, in any presence state.
   fn render_endpoints(&self) -> Result<Vec<EndpointDesc>>;

   /// Device paths of the adjacent nodes each connector of `endpoint_id`
   /// attaches to. A connector without a link yields `None`; that is not an
   /// error.
   fn connector_peers(&self, endpoint_id: &str) -> Result<Vec<Option<SmolStr>>>;

   /// Capability-checked control lookup on an adjacent device node. Nodes
   /// without a control interface yield `Ok(None)`.
   fn open_control(&self, device_path: &str) -> Result<Option<ControlHandle>>;
}

/// The physical device container domain, enumerated independently of the
/// audio endpoints and merged by container id.
pub trait ContainerSource: Send + Sync {
   fn containers(&self) -> Result<Vec<(ContainerId, SmolStr)>>;
}

/// SDP service record lookup against a remote device. Each returned blob is
/// one service's raw attribute list.
pub trait SdpSource: Send + Sync {
   fn service_records(&self, address: Address) -> Result<Vec<Vec<u8>>>;
}

/// Everything the discovery manager needs from the platform.
pub trait DevicePlatform: AudioTopology + ContainerSource + SdpSource {}

impl<T: AudioTopology + ContainerSource + SdpSource> DevicePlatform for T {}
