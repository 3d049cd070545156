//! 16-bit short network identifiers.
//!
//! Structured SIDs are hierarchical: each 4-bit nibble is one tree level.
//! The leader is `0x0000` and hands out `0x1000..=0xb000`; a router with
//! SID `0x1000` hands out `0x1100..=0x1f00`, and so on until the lowest
//! nibble is taken. SIDs with a top nibble of `0xc` or above belong to
//! mobile (partial-function) nodes and sit outside the tree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::IdentityError;

/// Width of one SID tree level in bits.
pub const SID_MASK_LEN: u32 = 4;

/// Top-nibble threshold for mobile SIDs.
const MOBILE_PREFIX: u16 = 0xc;

/// Short network identifier assigned on attach.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sid(u16);

impl Sid {
    /// The leader's SID, root of the structured tree.
    pub const LEADER: Sid = Sid(0x0000);
    /// Not yet allocated, or released.
    pub const INVALID: Sid = Sid(0xfffe);
    /// Broadcast destination.
    pub const BCAST: Sid = Sid(0xffff);

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// A SID that names exactly one node.
    pub fn is_unique(&self) -> bool {
        *self != Self::INVALID && *self != Self::BCAST
    }

    /// A partial-function SID owned by a mobile node.
    pub fn is_mobile(&self) -> bool {
        self.is_unique() && (self.0 >> 12) >= MOBILE_PREFIX
    }

    /// A unique SID that lives in the structured tree.
    pub fn is_structured(&self) -> bool {
        self.is_unique() && !self.is_mobile()
    }

    /// Bit offset of the nibble this node allocates its children in.
    ///
    /// `None` when the SID has no room left below it (lowest nibble used)
    /// or is not part of the structured tree.
    pub fn child_shift(&self) -> Option<u32> {
        if !self.is_structured() {
            return None;
        }
        if self.0 == 0 {
            return Some(12);
        }
        let lowest = self.0.trailing_zeros() / SID_MASK_LEN * SID_MASK_LEN;
        lowest.checked_sub(SID_MASK_LEN)
    }

    /// Mask selecting the bits shared by every SID in this node's subtree.
    pub fn subtree_mask(&self) -> u16 {
        match self.child_shift() {
            Some(shift) => {
                let span = shift + SID_MASK_LEN;
                if span >= 16 { 0 } else { !((1u16 << span) - 1) }
            }
            None => 0xffff,
        }
    }

    /// Number of leading bits fixed by this node's subtree.
    pub fn subtree_prefix_len(&self) -> u8 {
        self.subtree_mask().count_ones() as u8
    }

    /// Check whether `other` lies in this node's subtree (inclusive).
    pub fn covers(&self, other: Sid) -> bool {
        if !self.is_structured() || !other.is_structured() {
            return self == &other;
        }
        let mask = self.subtree_mask();
        (self.0 & mask) == (other.0 & mask)
    }

    /// Check whether this SID is an immediate child slot of `parent`.
    pub fn is_direct_child_of(&self, parent: Sid) -> bool {
        if !self.is_structured() || *self == parent {
            return false;
        }
        let Some(shift) = parent.child_shift() else {
            return false;
        };
        if !parent.covers(*self) {
            return false;
        }
        let below = if shift == 0 { 0 } else { self.0 & ((1u16 << shift) - 1) };
        let index = (self.0 >> shift) & 0x0f;
        below == 0 && index != 0
    }

    /// The structural parent of this SID, if any.
    pub fn parent(&self) -> Option<Sid> {
        if !self.is_structured() || self.0 == 0 {
            return None;
        }
        let lowest = self.0.trailing_zeros() / SID_MASK_LEN * SID_MASK_LEN;
        Some(Sid(self.0 & !(0x0fu16 << lowest)))
    }

    /// Child slot index of this SID under its parent.
    pub fn child_index(&self) -> Option<u16> {
        let parent = self.parent()?;
        let shift = parent.child_shift()?;
        Some((self.0 >> shift) & 0x0f)
    }
}

impl Default for Sid {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sid({:04x})", self.0)
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl FromStr for Sid {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim_start_matches("0x");
        u16::from_str_radix(digits, 16)
            .map(Sid)
            .map_err(|_| IdentityError::InvalidSid(s.to_string()))
    }
}

/// Router-SID naming the zone of a super router in hierarchical routing.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rsid(u8);

impl Rsid {
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn as_u8(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Rsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}
