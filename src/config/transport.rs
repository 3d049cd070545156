//! UDP transport configuration for the `umesh` binary.
//!
//! The daemon emulates the radio with UDP datagrams exchanged with a
//! static list of peer sockets. Every datagram is one mesh frame.

use serde::{Deserialize, Serialize};

/// Default UDP bind address.
const DEFAULT_UDP_BIND_ADDR: &str = "0.0.0.0:4300";

/// Default emulated radio MTU (802.11 management frame budget).
const DEFAULT_UDP_MTU: u16 = 1024;

/// UDP transport configuration (`udp.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UdpConfig {
    /// Bind address (`udp.bind_addr`). Defaults to "0.0.0.0:4300".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<String>,

    /// Emulated link MTU in bytes (`udp.mtu`). Defaults to 1024.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,

    /// Peer sockets that receive every broadcast and unicast frame (`udp.peers`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<String>,
}

impl UdpConfig {
    /// Get the bind address, using default if not configured.
    pub fn bind_addr(&self) -> &str {
        self.bind_addr.as_deref().unwrap_or(DEFAULT_UDP_BIND_ADDR)
    }

    /// Get the link MTU, using default if not configured.
    pub fn mtu(&self) -> u16 {
        self.mtu.unwrap_or(DEFAULT_UDP_MTU)
    }
}
