//! umesh Identity Types
//!
//! A node is known by a fixed 8-byte extended address for its whole
//! lifetime. Once attached it additionally holds a 16-bit short ID (SID)
//! scoped to one mesh network, identified by a 16-bit meshnetid. The
//! 48-bit extended network ID decides which nodes may mesh together.

mod ext_addr;
mod netid;
mod sid;

use sha2::{Digest, Sha256};
use thiserror::Error;

pub use ext_addr::ExtAddr;
pub use netid::{ExtNetId, MeshNetId};
pub use sid::{Rsid, Sid, SID_MASK_LEN};

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid extended address length: expected 8, got {0}")]
    InvalidExtAddrLength(usize),

    #[error("invalid extended network id length: expected 6, got {0}")]
    InvalidExtNetIdLength(usize),

    #[error("invalid sid: {0}")]
    InvalidSid(String),

    #[error("invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Compute SHA-256 hash of data.
pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Encode bytes as lowercase hex string.
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
