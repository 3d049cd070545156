use super::AllocError;
use crate::identity::{ExtAddr, Sid};
use crate::node::NodeType;
use std::collections::BTreeMap;
use tracing::debug;

/// Structured child slots under the leader (`0x1000..=0xb000`).
pub const LEADER_CHILD_SLOTS: u16 = 11;

/// Structured child slots under any other router.
pub const ROUTER_CHILD_SLOTS: u16 = 15;

/// Size of the leader's mobile SID pool (`0xc001..`).
pub const MOBILE_SID_SLOTS: u16 = 128;

const MOBILE_SID_BASE: u16 = 0xc000;

/// One allocated SID and its holder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SidLease {
    pub sid: Sid,
    pub ext: ExtAddr,
    pub node_type: NodeType,
    pub expires_ms: u64,
}

/// Allocator for the SIDs directly below this node.
#[derive(Debug)]
pub struct SidAllocator {
    base: Option<Sid>,
    shift: Option<u32>,
    is_leader: bool,
    lease_ms: u64,
    leases: BTreeMap<Sid, SidLease>,
}

impl SidAllocator {
    /// An idle allocator; every request is `Busy` until `reset` gives it a base.
    pub fn new(lease_ms: u64) -> Self {
        Self {
            base: None,
            shift: None,
            is_leader: false,
            lease_ms,
            leases: BTreeMap::new(),
        }
    }

    /// Re-root the allocator at `base`, dropping every lease.
    pub fn reset(&mut self, base: Option<Sid>, is_leader: bool) {
        self.base = base;
        self.shift = base.and_then(|s| s.child_shift());
        self.is_leader = is_leader && base == Some(Sid::LEADER);
        self.leases.clear();
    }

    pub fn base(&self) -> Option<Sid> {
        self.base
    }

    pub fn set_lease_ms(&mut self, lease_ms: u64) {
        self.lease_ms = lease_ms;
    }

    fn slot_count(&self) -> u16 {
        match (self.base, self.shift) {
            (Some(Sid::LEADER), Some(_)) => LEADER_CHILD_SLOTS,
            (Some(_), Some(_)) => ROUTER_CHILD_SLOTS,
            _ => 0,
        }
    }

    fn child_sid(&self, index: u16) -> Option<Sid> {
        let base = self.base?;
        let shift = self.shift?;
        Some(Sid::new(base.as_u16() | (index << shift)))
    }

    fn slot_index(&self, sid: Sid) -> Option<u16> {
        let base = self.base?;
        let shift = self.shift?;
        if !sid.is_direct_child_of(base) {
            return None;
        }
        let index = (sid.as_u16() >> shift) & 0x0f;
        (index >= 1 && index <= self.slot_count()).then_some(index)
    }

    /// Allocate a SID for `ext`.
    ///
    /// An existing lease for `ext` is reused. A `requested` SID is honored
    /// when it is a free direct child slot. Mobile requesters draw from the
    /// mobile pool at the leader and get a leaf slot anywhere else.
    pub fn allocate(
        &mut self,
        ext: ExtAddr,
        requested: Option<Sid>,
        mobile: bool,
        now_ms: u64,
    ) -> Result<SidLease, AllocError> {
        if self.base.is_none() {
            return Err(AllocError::Busy);
        }
        let expires_ms = now_ms + self.lease_ms;

        if let Some(lease) = self.leases.values_mut().find(|l| l.ext == ext) {
            lease.expires_ms = expires_ms;
            return Ok(*lease);
        }

        let sid = if mobile && self.is_leader {
            (1..=MOBILE_SID_SLOTS)
                .map(|i| Sid::new(MOBILE_SID_BASE | i))
                .find(|sid| !self.leases.contains_key(sid))
                .ok_or(AllocError::Exhausted)?
        } else {
            let wanted = requested
                .filter(|sid| self.slot_index(*sid).is_some() && !self.leases.contains_key(sid));
            match wanted {
                Some(sid) => sid,
                None => (1..=self.slot_count())
                    .filter_map(|i| self.child_sid(i))
                    .find(|sid| !self.leases.contains_key(sid))
                    .ok_or(AllocError::Exhausted)?,
            }
        };

        let node_type = if mobile {
            NodeType::Leaf
        } else {
            NodeType::for_sid(sid)
        };
        let lease = SidLease {
            sid,
            ext,
            node_type,
            expires_ms,
        };
        self.leases.insert(sid, lease);
        debug!(sid = %sid, ext = %ext, node_type = ?node_type, "Allocated SID");
        Ok(lease)
    }

    pub fn release(&mut self, sid: Sid) -> Result<SidLease, AllocError> {
        self.leases.remove(&sid).ok_or(AllocError::NotAllocated(sid))
    }

    pub fn release_ext(&mut self, ext: &ExtAddr) -> Option<SidLease> {
        let sid = self.lease_for(ext)?.sid;
        self.leases.remove(&sid)
    }

    /// Extend the lease on `sid` if `ext` holds it.
    pub fn refresh(&mut self, sid: Sid, ext: &ExtAddr, now_ms: u64) -> bool {
        match self.leases.get_mut(&sid) {
            Some(lease) if lease.ext == *ext => {
                lease.expires_ms = now_ms + self.lease_ms;
                true
            }
            _ => false,
        }
    }

    pub fn owner(&self, sid: Sid) -> Option<ExtAddr> {
        self.leases.get(&sid).map(|l| l.ext)
    }

    pub fn contains(&self, sid: Sid) -> bool {
        self.leases.contains_key(&sid)
    }

    pub fn lease_for(&self, ext: &ExtAddr) -> Option<&SidLease> {
        self.leases.values().find(|l| l.ext == *ext)
    }

    /// Check whether `sid` is a slot this allocator is responsible for.
    pub fn owns_slot(&self, sid: Sid) -> bool {
        if sid.is_mobile() {
            return self.is_leader;
        }
        self.slot_index(sid).is_some()
    }

    /// Drop leases whose holders have not been heard in time.
    pub fn expire(&mut self, now_ms: u64) -> Vec<SidLease> {
        let expired: Vec<Sid> = self
            .leases
            .values()
            .filter(|l| l.expires_ms <= now_ms)
            .map(|l| l.sid)
            .collect();
        expired
            .iter()
            .filter_map(|sid| self.leases.remove(sid))
            .inspect(|l| debug!(sid = %l.sid, ext = %l.ext, "SID lease expired"))
            .collect()
    }

    pub fn child_count(&self) -> usize {
        self.leases.len()
    }

    /// Unallocated structured slots.
    pub fn free_slots(&self) -> u8 {
        let used = self.leases.keys().filter(|s| !s.is_mobile()).count() as u16;
        self.slot_count().saturating_sub(used) as u8
    }

    pub fn leases(&self) -> impl Iterator<Item = &SidLease> {
        self.leases.values()
    }
}
