//! Neighbor/link table.
//!
//! One entry per extended address heard on the radio. Entries carry what
//! the neighbor advertised (network, SID, role, path cost), our link-cost
//! estimate, liveness and admission state.

mod table;
#[cfg(test)]
mod tests;

pub use table::{NeighborError, NeighborTable};

use crate::identity::{ExtAddr, ExtNetId, MeshNetId, Rsid, Sid};
use crate::network_data::NetInfo;
use crate::node::{LeaderPriority, Mode};
use crate::protocol::SsidInfo;
use std::collections::VecDeque;
use std::fmt;

/// Fixed-point unit of link cost: one perfect link.
pub const LINK_COST_COEF: u32 = 256;
/// EWMA weight of the newest estimate, in `LINK_COST_COEF` units.
pub const LINK_COST_ALPHA: u32 = 64;
/// Cost of a link with nothing accepted.
pub const LINK_COST_MAX: u16 = 1024;
/// Links at or above this cost are dropped.
pub const LINK_COST_THRESHOLD: u16 = 768;
/// Cost assigned before any estimate exists.
pub const LINK_COST_INITIAL: u16 = 256;

/// Relationship of a neighbor to the local node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NeighborState {
    Invalid,
    Nbr,
    Candidate,
    Parent,
    Child,
}

impl fmt::Display for NeighborState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NeighborState::Invalid => "invalid",
            NeighborState::Nbr => "nbr",
            NeighborState::Candidate => "candidate",
            NeighborState::Parent => "parent",
            NeighborState::Child => "child",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NeighborFlags {
    pub sid_changed: bool,
    pub netid_changed: bool,
    pub link_estimated: bool,
}

#[derive(Clone, Debug)]
pub struct Neighbor {
    pub ext: ExtAddr,
    pub netid: MeshNetId,
    pub sid: Sid,
    pub path_cost: u16,
    pub mode: Mode,
    pub state: NeighborState,
    pub flags: NeighborFlags,
    pub link_cost: u16,
    pub link_requests: u16,
    pub link_accepts: u16,
    /// RSSI we measured on frames from this neighbor.
    pub reverse_rssi: i8,
    /// RSSI this neighbor reported for our frames.
    pub forward_rssi: i8,
    pub channel: u8,
    pub ssid: SsidInfo,
    pub leader: Option<LeaderPriority>,
    pub ext_netid: Option<ExtNetId>,
    pub net_info: Option<NetInfo>,
    pub rsid: Option<Rsid>,
    pub last_heard_ms: u64,
    /// Not selected as attach candidate before this time.
    pub holddown_until_ms: u64,
    pub key_epoch: Option<u8>,
    pub admitted: bool,
    pub awake_until_ms: u64,
    /// Consecutive advertisements that made this neighbor a better parent.
    pub migrate_count: u32,
    /// Frames held for a sleepy neighbor until it wakes.
    pub buffer: VecDeque<Vec<u8>>,
}

impl Neighbor {
    pub fn new(ext: ExtAddr, now_ms: u64) -> Self {
        Self {
            ext,
            netid: MeshNetId::BCAST,
            sid: Sid::INVALID,
            path_cost: u16::MAX,
            mode: Mode::RX_ON,
            state: NeighborState::Invalid,
            flags: NeighborFlags::default(),
            link_cost: LINK_COST_INITIAL,
            link_requests: 0,
            link_accepts: 0,
            reverse_rssi: 0,
            forward_rssi: 0,
            channel: 0,
            ssid: SsidInfo::default(),
            leader: None,
            ext_netid: None,
            net_info: None,
            rsid: None,
            last_heard_ms: now_ms,
            holddown_until_ms: 0,
            key_epoch: None,
            admitted: false,
            awake_until_ms: 0,
            migrate_count: 0,
            buffer: VecDeque::new(),
        }
    }

    /// Seed the link cost from a radio RSSI hint.
    ///
    /// Strong links (-50 dBm or better) start at one unit; every 10 dB
    /// weaker adds a quarter unit.
    pub fn seed_link_cost(&mut self, rssi: i8) {
        let weaker_by = (-50i32 - rssi as i32).max(0) as u32;
        let cost = LINK_COST_COEF + weaker_by / 10 * (LINK_COST_COEF / 4);
        self.link_cost = cost.min(LINK_COST_THRESHOLD as u32 - 1) as u16;
    }

    pub fn is_alive(&self, now_ms: u64, alive_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_heard_ms) < alive_ms
    }

    pub fn is_awake(&self, now_ms: u64) -> bool {
        !self.mode.is_sleepy() || now_ms < self.awake_until_ms
    }

    pub fn in_holddown(&self, now_ms: u64) -> bool {
        now_ms < self.holddown_until_ms
    }

    /// Advertised as part of the tree and able to host children.
    pub fn is_router(&self) -> bool {
        self.sid.child_shift().is_some() && !self.mode.is_mobile()
    }

    /// Fold one link-estimation round into the cost.
    ///
    /// Returns `None` when no request was sent this round.
    pub fn estimate_link_cost(&mut self) -> Option<u16> {
        if self.link_requests == 0 {
            return None;
        }
        let requests = self.link_requests as u32;
        let accepts = self.link_accepts as u32;
        let sample = if accepts == 0 {
            LINK_COST_MAX as u32
        } else {
            (LINK_COST_COEF * requests / accepts).min(LINK_COST_MAX as u32)
        };
        let old = self.link_cost as u32;
        let mut cost =
            ((LINK_COST_COEF - LINK_COST_ALPHA) * old + LINK_COST_ALPHA * sample) / LINK_COST_COEF;
        if cost == old && accepts == 0 {
            cost += LINK_COST_COEF;
        }
        self.link_cost = cost.min(LINK_COST_MAX as u32) as u16;
        self.link_requests = 0;
        self.link_accepts = 0;
        self.flags.link_estimated = true;
        Some(self.link_cost)
    }

    pub fn link_failed(&self) -> bool {
        self.link_cost >= LINK_COST_THRESHOLD
    }

    /// Path cost to the leader through this neighbor.
    pub fn cost_via(&self) -> u16 {
        self.path_cost.saturating_add(self.link_cost)
    }
}
