//! umesh Protocol Messages
//!
//! Wire format definitions for the two frame classes a node exchanges:
//!
//! ## Mesh header (hop-by-hop)
//!
//! Every frame starts with a mesh header naming the network, the source
//! and destination SIDs, and optional extended addresses, multicast,
//! fragment and security sub-headers (see `header.rs`).
//!
//! ## Management commands
//!
//! Command frames carry a `{type, seq}` header followed by TLVs. They
//! drive attach, SID allocation, link estimation, network data, routing
//! exchange and authentication (see `command.rs`).

mod command;
mod error;
mod fragment;
mod header;
pub(crate) mod tlv;

pub use command::{
    AddressError, Advertisement, AllocStatus, AttachRequest, AttachResponse, AuthChallenge,
    AuthCode, AuthRelay, AuthResult, AuthStart, Command, CommandBody, CommandType, LinkAccept,
    LinkRequest, NetworkDataUpdate, RouterId, RoutingInfo, RsidRequest, RsidResponse,
    SidRequest, SidResponse, SsidInfo, CHALLENGE_SIZE, COMMAND_HEADER_SIZE,
};
pub use error::ProtocolError;
pub use fragment::{FragmentHeader, FRAG_1_SIZE, FRAG_N_SIZE, FRAG_UNIT, MAX_DATAGRAM_SIZE};
pub use header::{
    FrameKind, McastInfo, McastScope, MeshFrame, MeshHeader, MESH_HEADER_FIXED_SIZE, MIC_SIZE,
};

/// Protocol version carried in the control byte.
pub const PROTOCOL_VERSION: u8 = 1;

#[cfg(test)]
mod tests;
