//! 8-byte extended (link-layer) address.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::{hex_encode, IdentityError};

/// Globally unique 64-bit node address, fixed for the node's lifetime.
///
/// Ordering is plain byte ordering; the leader election and SID collision
/// tie-breaks rely on it being total and stable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ExtAddr([u8; 8]);

impl ExtAddr {
    /// Length of the encoded address in bytes.
    pub const LEN: usize = 8;

    /// Link-layer broadcast address.
    pub const BROADCAST: ExtAddr = ExtAddr([0xff; 8]);

    /// Create an ExtAddr from an 8-byte array.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Create an ExtAddr from a slice.
    pub fn from_slice(slice: &[u8]) -> Result<Self, IdentityError> {
        if slice.len() != Self::LEN {
            return Err(IdentityError::InvalidExtAddrLength(slice.len()));
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Create an ExtAddr from its numeric value.
    pub const fn from_u64(value: u64) -> Self {
        Self(value.to_be_bytes())
    }

    /// Return the address as a number.
    pub fn to_u64(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Check for the link-layer broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Debug for ExtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtAddr({})", hex_encode(&self.0))
    }
}

impl fmt::Display for ExtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_encode(&self.0))
    }
}

impl FromStr for ExtAddr {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| *c != ':').collect();
        let bytes = hex::decode(cleaned)?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8]> for ExtAddr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for ExtAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ExtAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
