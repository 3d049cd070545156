//! Radio and IP-stack boundaries.
//!
//! The protocol core never touches a radio or an IP stack directly. It
//! is handed a [`Hal`] for link-layer sends and channel control and an
//! [`IpAdapter`] for delivering reassembled datagrams upward. Received
//! frames are pushed into the node by the host through
//! `MeshNode::receive`.

pub mod mock;
pub mod udp;

use crate::forwarder::{DeliveryFailure, Destination};
use crate::identity::{ExtAddr, Sid};
use thiserror::Error;

/// Link-layer send and control failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HalError {
    /// Link queue full; try again later.
    #[error("link busy")]
    Busy,

    #[error("send failed: {0}")]
    Failed(String),

    #[error("invalid channel: {0}")]
    InvalidChannel(u8),
}

/// Link-layer capability consumed by the protocol core.
pub trait Hal {
    /// Send one frame to a neighbor, or to every neighbor for `ExtAddr::BROADCAST`.
    fn send(&mut self, dest: &ExtAddr, frame: &[u8]) -> Result<(), HalError>;

    fn set_channel(&mut self, channel: u8) -> Result<(), HalError>;

    fn channel(&self) -> u8;

    /// Latest RSSI hint for a neighbor, if the radio tracks one.
    fn link_quality(&self, neighbor: &ExtAddr) -> Option<i8>;

    /// The radio's own extended address.
    fn mac_address(&self) -> ExtAddr;

    /// Largest frame a broadcast send accepts.
    fn bcast_mtu(&self) -> usize;

    /// Largest frame a unicast send accepts.
    fn ucast_mtu(&self) -> usize;
}

/// IP-stack capability consumed by the protocol core.
pub trait IpAdapter {
    /// Deliver a reassembled datagram addressed to this node.
    fn forward_up(&mut self, src: Sid, datagram: Vec<u8>);

    /// A datagram accepted through `send_down` could not be delivered.
    fn delivery_failed(&mut self, dest: Destination, reason: DeliveryFailure) {
        let _ = (dest, reason);
    }
}
