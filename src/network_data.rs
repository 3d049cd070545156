//! Network data: leader-owned metadata plus flooded prefix records.
//!
//! The leader owns the network-wide `NetInfo` (version and size) and the
//! `StableNetworkData` (stable version pair, meshnetid, multicast group).
//! Any node may originate prefix records; they are flooded and merged
//! with per-record sequence numbers.

use crate::identity::{MeshNetId, Sid};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, trace};

/// Largest stable main version before it wraps back to 0.
pub const STABLE_MAIN_VERSION_MAX: u8 = 7;

/// Volatile network-wide state, re-versioned whenever it changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct NetInfo {
    pub version: u8,
    pub size: u16,
    pub stable_main: u8,
    pub stable_minor: u8,
}

/// Network state that changes only on origination or explicit bumps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StableNetworkData {
    pub main_version: u8,
    pub minor_version: u8,
    pub meshnetid: MeshNetId,
    pub mcast_addr: [u8; 16],
}

impl StableNetworkData {
    pub fn new(meshnetid: MeshNetId) -> Self {
        Self {
            main_version: 0,
            minor_version: 0,
            meshnetid,
            mcast_addr: mcast_addr_for(meshnetid),
        }
    }
}

impl Default for StableNetworkData {
    fn default() -> Self {
        Self::new(MeshNetId::BCAST)
    }
}

/// Mesh-wide multicast group `ff08::<meshnetid>:00fc`.
pub fn mcast_addr_for(meshnetid: MeshNetId) -> [u8; 16] {
    let mut addr = [0u8; 16];
    addr[0] = 0xff;
    addr[1] = 0x08;
    addr[12..14].copy_from_slice(&meshnetid.as_u16().to_be_bytes());
    addr[15] = 0xfc;
    addr
}

/// One flooded prefix / border-router record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkDataRecord {
    pub origin: Sid,
    pub prefix: [u8; 16],
    pub prefix_len: u8,
    pub border_router: bool,
    pub cost: u16,
    pub seq: u16,
}

impl NetworkDataRecord {
    pub fn key(&self) -> ([u8; 16], u8) {
        (self.prefix, self.prefix_len)
    }
}

impl fmt::Display for NetworkDataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = std::net::Ipv6Addr::from(self.prefix);
        write!(
            f,
            "{}/{} origin {} cost {} seq {}{}",
            prefix,
            self.prefix_len,
            self.origin,
            self.cost,
            self.seq,
            if self.border_router { " br" } else { "" }
        )
    }
}

/// Outcome of merging a received record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeResult {
    /// Stored; the caller re-floods it.
    Applied,
    /// Identical to what we hold.
    Unchanged,
    /// Older, or an equal sequence from a different origin.
    Stale,
}

/// `a` is newer than `b` under 16-bit wrapping arithmetic.
pub fn seq_newer(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) > 0
}

/// Local copy of the network data.
#[derive(Debug)]
pub struct NetworkData {
    net_info: NetInfo,
    stable: StableNetworkData,
    records: BTreeMap<([u8; 16], u8), NetworkDataRecord>,
    max_records: usize,
}

impl NetworkData {
    pub fn new(max_records: usize) -> Self {
        Self {
            net_info: NetInfo::default(),
            stable: StableNetworkData::default(),
            records: BTreeMap::new(),
            max_records,
        }
    }

    pub fn net_info(&self) -> NetInfo {
        self.net_info
    }

    pub fn stable(&self) -> StableNetworkData {
        self.stable
    }

    pub fn size(&self) -> u16 {
        self.net_info.size
    }

    /// Drop everything learned from the previous network.
    pub fn reset(&mut self) {
        self.net_info = NetInfo::default();
        self.stable = StableNetworkData::default();
        self.records.clear();
    }

    /// Start a new network epoch as leader.
    pub fn originate(&mut self, meshnetid: MeshNetId) {
        let main = if self.stable.main_version >= STABLE_MAIN_VERSION_MAX {
            0
        } else {
            self.stable.main_version + 1
        };
        self.stable = StableNetworkData {
            main_version: main,
            minor_version: 1,
            meshnetid,
            mcast_addr: mcast_addr_for(meshnetid),
        };
        self.records.clear();
        self.net_info = NetInfo {
            version: self.net_info.version.wrapping_add(1),
            size: 1,
            stable_main: self.stable.main_version,
            stable_minor: self.stable.minor_version,
        };
        debug!(meshnetid = %meshnetid, version = self.net_info.version, "Originated network data");
    }

    /// Leader-side version bump after a local change.
    pub fn bump_version(&mut self) {
        self.net_info.version = self.net_info.version.wrapping_add(1);
    }

    /// Leader-side size update; bumps the version when it changes.
    pub fn set_size(&mut self, size: u16) -> bool {
        if self.net_info.size == size {
            return false;
        }
        self.net_info.size = size;
        self.bump_version();
        true
    }

    /// Adopt a strictly newer netinfo from the network.
    pub fn accept_net_info(&mut self, incoming: NetInfo) -> bool {
        if (incoming.version.wrapping_sub(self.net_info.version) as i8) > 0 {
            self.net_info.version = incoming.version;
            self.net_info.size = incoming.size;
            true
        } else {
            false
        }
    }

    /// Take the parent's view wholesale after attaching.
    pub fn adopt(&mut self, net_info: NetInfo, stable: StableNetworkData) {
        self.net_info = net_info;
        self.stable = stable;
        self.records.clear();
    }

    /// Adopt stable data that is not older than ours, or any when we have none.
    pub fn accept_stable(&mut self, incoming: StableNetworkData) -> bool {
        let diff = incoming.minor_version.wrapping_sub(self.stable.minor_version) as i8;
        if diff >= 0 || self.stable.minor_version == 0 {
            let changed = incoming != self.stable;
            self.stable = incoming;
            self.net_info.stable_main = incoming.main_version;
            self.net_info.stable_minor = incoming.minor_version;
            changed
        } else {
            false
        }
    }

    /// Merge a received record.
    pub fn merge(&mut self, record: NetworkDataRecord) -> MergeResult {
        let key = record.key();
        match self.records.get(&key) {
            None => {
                if self.records.len() >= self.max_records {
                    debug!(record = %record, "Network data table full, dropping record");
                    return MergeResult::Stale;
                }
                self.records.insert(key, record);
                trace!(record = %record, "Network data record added");
                MergeResult::Applied
            }
            Some(current) if *current == record => MergeResult::Unchanged,
            Some(current) => {
                let newer = seq_newer(record.seq, current.seq);
                let incumbent_update = record.seq == current.seq && record.origin == current.origin;
                if newer || incumbent_update {
                    self.records.insert(key, record);
                    trace!(record = %record, "Network data record replaced");
                    MergeResult::Applied
                } else {
                    MergeResult::Stale
                }
            }
        }
    }

    /// Originate or update a local record with the next sequence number.
    pub fn publish(
        &mut self,
        origin: Sid,
        prefix: [u8; 16],
        prefix_len: u8,
        border_router: bool,
        cost: u16,
    ) -> NetworkDataRecord {
        let seq = self
            .records
            .get(&(prefix, prefix_len))
            .map(|r| r.seq.wrapping_add(1))
            .unwrap_or(1);
        let record = NetworkDataRecord {
            origin,
            prefix,
            prefix_len,
            border_router,
            cost,
            seq,
        };
        if self.records.len() < self.max_records || self.records.contains_key(&record.key()) {
            self.records.insert(record.key(), record);
        }
        record
    }

    pub fn get(&self, prefix: &[u8; 16], prefix_len: u8) -> Option<&NetworkDataRecord> {
        self.records.get(&(*prefix, prefix_len))
    }

    pub fn records(&self) -> impl Iterator<Item = &NetworkDataRecord> {
        self.records.values()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(origin: u16, seq: u16, cost: u16) -> NetworkDataRecord {
        let mut prefix = [0u8; 16];
        prefix[0] = 0xfd;
        NetworkDataRecord {
            origin: Sid::new(origin),
            prefix,
            prefix_len: 64,
            border_router: true,
            cost,
            seq,
        }
    }

    #[test]
    fn test_merge_new_then_identical() {
        let mut data = NetworkData::new(8);
        assert_eq!(data.merge(record(0x1000, 1, 10)), MergeResult::Applied);
        assert_eq!(data.merge(record(0x1000, 1, 10)), MergeResult::Unchanged);
        assert_eq!(data.record_count(), 1);
    }

    #[test]
    fn test_merge_older_is_stale_and_keeps_state() {
        let mut data = NetworkData::new(8);
        data.merge(record(0x1000, 5, 10));
        assert_eq!(data.merge(record(0x1000, 4, 99)), MergeResult::Stale);
        let held = data.records().next().unwrap();
        assert_eq!(held.seq, 5);
        assert_eq!(held.cost, 10);
    }

    #[test]
    fn test_incumbent_wins_ties() {
        let mut data = NetworkData::new(8);
        data.merge(record(0x1000, 5, 10));
        // Same seq from a different origin loses.
        assert_eq!(data.merge(record(0x2000, 5, 1)), MergeResult::Stale);
        // Same seq from the incumbent with new content applies.
        assert_eq!(data.merge(record(0x1000, 5, 20)), MergeResult::Applied);
        assert_eq!(data.records().next().unwrap().cost, 20);
    }

    #[test]
    fn test_wrapping_sequence() {
        assert!(seq_newer(1, 0xffff));
        assert!(!seq_newer(0xffff, 1));
        let mut data = NetworkData::new(8);
        data.merge(record(0x1000, 0xfffe, 10));
        assert_eq!(data.merge(record(0x1000, 2, 10)), MergeResult::Applied);
    }

    #[test]
    fn test_full_table_drops_new_keys() {
        let mut data = NetworkData::new(1);
        data.merge(record(0x1000, 1, 10));
        let mut other = record(0x1000, 1, 10);
        other.prefix[1] = 1;
        assert_eq!(data.merge(other), MergeResult::Stale);
        assert_eq!(data.record_count(), 1);
    }

    #[test]
    fn test_publish_increments_seq() {
        let mut data = NetworkData::new(8);
        let prefix = record(0, 0, 0).prefix;
        let first = data.publish(Sid::LEADER, prefix, 64, true, 1);
        let second = data.publish(Sid::LEADER, prefix, 64, true, 2);
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
    }

    #[test]
    fn test_net_info_acceptance() {
        let mut data = NetworkData::new(8);
        data.originate(MeshNetId::new(0x1234));
        let local = data.net_info();
        let older = NetInfo { version: local.version.wrapping_sub(1), ..local };
        assert!(!data.accept_net_info(older));
        let newer = NetInfo { version: local.version.wrapping_add(1), size: 9, ..local };
        assert!(data.accept_net_info(newer));
        assert_eq!(data.size(), 9);
    }

    #[test]
    fn test_stable_acceptance() {
        let mut data = NetworkData::new(8);
        let mut incoming = StableNetworkData::new(MeshNetId::new(0x42));
        incoming.minor_version = 3;
        assert!(data.accept_stable(incoming));
        let mut older = incoming;
        older.minor_version = 2;
        assert!(!data.accept_stable(older));
        assert_eq!(data.stable().minor_version, 3);
    }

    #[test]
    fn test_originate_sets_mcast_group() {
        let mut data = NetworkData::new(8);
        data.originate(MeshNetId::new(0xabcd));
        let stable = data.stable();
        assert_eq!(stable.minor_version, 1);
        assert_eq!(&stable.mcast_addr[..2], &[0xff, 0x08]);
        assert_eq!(&stable.mcast_addr[12..], &[0xab, 0xcd, 0x00, 0xfc]);
        assert_eq!(data.size(), 1);
    }

    #[test]
    fn test_set_size_bumps_version_on_change() {
        let mut data = NetworkData::new(8);
        data.originate(MeshNetId::new(1));
        let v = data.net_info().version;
        assert!(!data.set_size(1));
        assert!(data.set_size(3));
        assert_eq!(data.net_info().version, v.wrapping_add(1));
    }
}
