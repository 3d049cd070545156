//! Network identifiers: the 16-bit meshnetid and the 48-bit extnetid.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::{hex_encode, ExtAddr, IdentityError};

/// 16-bit identifier of one mesh network epoch, chosen by its leader.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeshNetId(u16);

impl MeshNetId {
    /// Matches any network; used before a node has attached.
    pub const BCAST: MeshNetId = MeshNetId(0xffff);

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Derive the meshnetid a new leader originates.
    ///
    /// High byte is the XOR of the address's first four bytes, low byte
    /// the XOR of the last four. Never yields the broadcast value.
    pub fn from_leader(ext: &ExtAddr) -> Self {
        let bytes = ext.as_bytes();
        let hi = bytes[..4].iter().fold(0u8, |acc, b| acc ^ b);
        let lo = bytes[4..].iter().fold(0u8, |acc, b| acc ^ b);
        let value = u16::from_be_bytes([hi, lo]);
        if value == 0xffff { Self(0xfffe) } else { Self(value) }
    }

    pub fn is_bcast(&self) -> bool {
        *self == Self::BCAST
    }
}

impl fmt::Debug for MeshNetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MeshNetId({:04x})", self.0)
    }
}

impl fmt::Display for MeshNetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// 48-bit extended network ID scoping which nodes may mesh together.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ExtNetId([u8; 6]);

impl ExtNetId {
    pub const LEN: usize = 6;

    pub const fn from_bytes(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, IdentityError> {
        if slice.len() != Self::LEN {
            return Err(IdentityError::InvalidExtNetIdLength(slice.len()));
        }
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Debug for ExtNetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtNetId({})", hex_encode(&self.0))
    }
}

impl fmt::Display for ExtNetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_encode(&self.0))
    }
}

impl FromStr for ExtNetId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim_start_matches("0x"))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for ExtNetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ExtNetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
