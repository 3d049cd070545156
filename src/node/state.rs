//! Role, attach state, mode flags and leader priority.

use crate::config::{AddressOrder, LeaderEligibility, LeaderPolicyConfig, ModeConfig};
use crate::identity::ExtAddr;
use std::cmp::Ordering;
use std::fmt;

/// Role of the local device in the mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    /// Interface not started.
    Disabled,
    /// Started, scanning for a network.
    Detached,
    /// SID granted, role not yet settled.
    Attached,
    Leaf,
    Router,
    SuperRouter,
    Leader,
}

impl DeviceState {
    /// Holds a SID inside a network.
    pub fn is_attached(&self) -> bool {
        matches!(
            self,
            DeviceState::Attached
                | DeviceState::Leaf
                | DeviceState::Router
                | DeviceState::SuperRouter
                | DeviceState::Leader
        )
    }

    /// Forwards traffic, answers discovery and sends advertisements.
    pub fn is_router(&self) -> bool {
        matches!(
            self,
            DeviceState::Router | DeviceState::SuperRouter | DeviceState::Leader
        )
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Disabled => "disabled",
            DeviceState::Detached => "detached",
            DeviceState::Attached => "attached",
            DeviceState::Leaf => "leaf",
            DeviceState::Router => "router",
            DeviceState::SuperRouter => "super_router",
            DeviceState::Leader => "leader",
        };
        write!(f, "{}", s)
    }
}

/// Progress of the attach handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachState {
    Idle,
    Attaching,
    SidRequest,
    Done,
}

impl fmt::Display for AttachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttachState::Idle => "idle",
            AttachState::Attaching => "attaching",
            AttachState::SidRequest => "sid_request",
            AttachState::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// Capability flags a node advertises.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Mode(u8);

impl Mode {
    pub const NONE: Mode = Mode(0);
    pub const SUPER: Mode = Mode(0x01);
    pub const LEADER: Mode = Mode(0x02);
    pub const RX_ON: Mode = Mode(0x04);
    pub const MOBILE: Mode = Mode(0x08);

    const ALL: [(Mode, &'static str); 4] = [
        (Mode::SUPER, "SUPER"),
        (Mode::LEADER, "LEADER"),
        (Mode::RX_ON, "RX_ON"),
        (Mode::MOBILE, "MOBILE"),
    ];

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x0f)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: Mode) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Mode) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Mode) {
        self.0 &= !other.0;
    }

    /// Receiver off between wakeups.
    pub fn is_sleepy(&self) -> bool {
        !self.contains(Mode::RX_ON)
    }

    pub fn is_mobile(&self) -> bool {
        self.contains(Mode::MOBILE)
    }

    /// Role rank for attach decisions: LEADER over SUPER over the rest.
    pub fn rank(&self) -> u8 {
        if self.contains(Mode::LEADER) {
            2
        } else if self.contains(Mode::SUPER) {
            1
        } else {
            0
        }
    }
}

impl std::ops::BitOr for Mode {
    type Output = Mode;

    fn bitor(self, rhs: Mode) -> Mode {
        Mode(self.0 | rhs.0)
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mode({})", self)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Mode::ALL
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Whether an attached node can host children.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Leaf = 1,
    Router = 2,
}

impl NodeType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(NodeType::Leaf),
            2 => Some(NodeType::Router),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Type granted along with `sid`: leaves have no room for children.
    pub fn for_sid(sid: crate::identity::Sid) -> Self {
        if sid.child_shift().is_some() {
            NodeType::Router
        } else {
            NodeType::Leaf
        }
    }
}

/// Leader election key: weight first, then extended address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LeaderPriority {
    pub weight: u8,
    pub ext: ExtAddr,
}

impl LeaderPriority {
    pub fn new(weight: u8, ext: ExtAddr) -> Self {
        Self { weight, ext }
    }

    /// Total order under the configured address ordering.
    pub fn compare(&self, other: &LeaderPriority, order: AddressOrder) -> Ordering {
        self.weight.cmp(&other.weight).then_with(|| match order {
            AddressOrder::Higher => self.ext.cmp(&other.ext),
            AddressOrder::Lower => other.ext.cmp(&self.ext),
        })
    }

    pub fn beats(&self, other: &LeaderPriority, order: AddressOrder) -> bool {
        self.compare(other, order) == Ordering::Greater
    }
}

impl fmt::Display for LeaderPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.weight, self.ext)
    }
}

impl ModeConfig {
    /// Flags corresponding to the configured mode.
    pub fn to_mode(&self) -> Mode {
        let mut mode = Mode::NONE;
        if self.super_capable {
            mode.insert(Mode::SUPER);
        }
        if self.leader {
            mode.insert(Mode::LEADER);
        }
        if self.rx_on {
            mode.insert(Mode::RX_ON);
        }
        if self.mobile {
            mode.insert(Mode::MOBILE);
        }
        mode
    }
}

impl LeaderPolicyConfig {
    /// Election weight of a node with `mode`; `None` when it may not lead.
    pub fn weight_for(&self, mode: Mode) -> Option<u8> {
        if mode.is_mobile() || mode.is_sleepy() {
            return None;
        }
        if mode.contains(Mode::LEADER) {
            return Some(self.leader_weight);
        }
        if mode.contains(Mode::SUPER) {
            return Some(self.super_weight);
        }
        match self.eligibility {
            LeaderEligibility::Any => Some(self.router_weight),
            LeaderEligibility::SuperOnly => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(last: u8) -> ExtAddr {
        ExtAddr::from_bytes([0, 0, 0, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::NONE.to_string(), "none");
        assert_eq!((Mode::SUPER | Mode::RX_ON).to_string(), "SUPER|RX_ON");
        assert!(Mode::MOBILE.is_sleepy());
        assert!(!(Mode::RX_ON).is_sleepy());
    }

    #[test]
    fn test_mode_insert_remove() {
        let mut mode = Mode::RX_ON;
        mode.insert(Mode::SUPER);
        assert!(mode.contains(Mode::SUPER));
        mode.remove(Mode::RX_ON);
        assert_eq!(mode, Mode::SUPER);
    }

    #[test]
    fn test_leader_priority_weight_first() {
        let heavy = LeaderPriority::new(2, ext(1));
        let light = LeaderPriority::new(1, ext(9));
        assert!(heavy.beats(&light, AddressOrder::Higher));
        assert!(heavy.beats(&light, AddressOrder::Lower));
    }

    #[test]
    fn test_leader_priority_address_tiebreak() {
        let a = LeaderPriority::new(1, ext(1));
        let b = LeaderPriority::new(1, ext(2));
        assert!(b.beats(&a, AddressOrder::Higher));
        assert!(a.beats(&b, AddressOrder::Lower));
        assert!(!a.beats(&a, AddressOrder::Higher));
    }

    #[test]
    fn test_mode_rank() {
        assert_eq!((Mode::LEADER | Mode::SUPER).rank(), 2);
        assert_eq!((Mode::SUPER | Mode::RX_ON).rank(), 1);
        assert_eq!((Mode::RX_ON | Mode::MOBILE).rank(), 0);
    }

    #[test]
    fn test_weight_policy() {
        let policy = LeaderPolicyConfig::default();
        assert_eq!(policy.weight_for(Mode::LEADER | Mode::RX_ON), Some(3));
        assert_eq!(policy.weight_for(Mode::SUPER | Mode::RX_ON), Some(2));
        assert_eq!(policy.weight_for(Mode::RX_ON), Some(1));
        assert_eq!(policy.weight_for(Mode::MOBILE | Mode::SUPER), None);

        let strict = LeaderPolicyConfig {
            eligibility: LeaderEligibility::SuperOnly,
            ..LeaderPolicyConfig::default()
        };
        assert_eq!(strict.weight_for(Mode::RX_ON), None);
        assert_eq!(strict.weight_for(Mode::SUPER | Mode::RX_ON), Some(2));
        // A sleepy node cannot serve as leader, whatever else it claims.
        assert_eq!(policy.weight_for(Mode::LEADER), None);
        assert_eq!(policy.weight_for(Mode::SUPER), None);
    }

    #[test]
    fn test_node_type_for_sid() {
        use crate::identity::Sid;
        assert_eq!(NodeType::for_sid(Sid::new(0x1000)), NodeType::Router);
        assert_eq!(NodeType::for_sid(Sid::new(0x1110)), NodeType::Router);
        assert_eq!(NodeType::for_sid(Sid::new(0x1111)), NodeType::Leaf);
        assert_eq!(NodeType::for_sid(Sid::new(0xc001)), NodeType::Leaf);
    }
}
