//! umesh: self-organizing mesh networking core
//!
//! A tick-driven protocol engine that forms a tree-structured mesh out of
//! nodes sharing a radio medium: leader election, short address (SID)
//! allocation, routing, fragmentation and forwarding, network data
//! flooding, and link admission.

pub mod allocator;
pub mod cli;
pub mod config;
pub mod forwarder;
pub mod hal;
pub mod identity;
pub mod lowpower;
pub mod neighbor;
pub mod network_data;
pub mod node;
pub mod protocol;
pub mod router;
pub mod security;
pub mod timer;

// Re-export identity types
pub use identity::{ExtAddr, ExtNetId, IdentityError, MeshNetId, Rsid, Sid};

// Re-export config types
pub use config::{Config, ConfigError, NodeConfig, RouterKind, SecurityMode, UdpConfig};

// Re-export platform boundaries
pub use hal::{Hal, HalError, IpAdapter};
pub use hal::udp::UdpHal;

// Re-export forwarding types
pub use forwarder::{DeliveryFailure, Destination, ForwardError, LinkStats};

// Re-export protocol types
pub use protocol::{FrameKind, MeshFrame, MeshHeader, ProtocolError};

// Re-export node types
pub use node::{DeviceState, MeshNode, Mode, NodeError, NodeState};
