use super::{Neighbor, NeighborState};
use crate::identity::{ExtAddr, MeshNetId, Sid};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NeighborError {
    #[error("neighbor table full ({capacity} entries)")]
    TableFull { capacity: usize },
}

/// Bounded neighbor table keyed by extended address.
#[derive(Debug)]
pub struct NeighborTable {
    entries: BTreeMap<ExtAddr, Neighbor>,
    capacity: usize,
}

impl NeighborTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
        }
    }

    pub fn get(&self, ext: &ExtAddr) -> Option<&Neighbor> {
        self.entries.get(ext)
    }

    pub fn get_mut(&mut self, ext: &ExtAddr) -> Option<&mut Neighbor> {
        self.entries.get_mut(ext)
    }

    pub fn contains(&self, ext: &ExtAddr) -> bool {
        self.entries.contains_key(ext)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Neighbor> {
        self.entries.values_mut()
    }

    /// Neighbor in network `netid` holding `sid`.
    pub fn find_by_sid(&self, netid: MeshNetId, sid: Sid) -> Option<&Neighbor> {
        if !sid.is_unique() {
            return None;
        }
        self.entries
            .values()
            .find(|n| n.netid == netid && n.sid == sid)
    }

    pub fn parent(&self) -> Option<&Neighbor> {
        self.entries
            .values()
            .find(|n| n.state == NeighborState::Parent)
    }

    pub fn children(&self) -> impl Iterator<Item = &Neighbor> {
        self.entries
            .values()
            .filter(|n| n.state == NeighborState::Child)
    }

    /// Look up `ext`, creating an entry when absent.
    ///
    /// When the table is full an existing entry is only displaced for an
    /// attach-related insertion, and never a parent or child.
    pub fn get_or_insert(
        &mut self,
        ext: ExtAddr,
        now_ms: u64,
        attach_related: bool,
    ) -> Result<&mut Neighbor, NeighborError> {
        if !self.entries.contains_key(&ext) && self.entries.len() >= self.capacity {
            if !attach_related {
                return Err(NeighborError::TableFull {
                    capacity: self.capacity,
                });
            }
            let victim = self
                .entries
                .values()
                .filter(|n| !matches!(n.state, NeighborState::Parent | NeighborState::Child))
                .min_by_key(|n| n.last_heard_ms)
                .map(|n| n.ext)
                .ok_or(NeighborError::TableFull {
                    capacity: self.capacity,
                })?;
            debug!(victim = %victim, new = %ext, "Neighbor table full, replacing entry");
            self.entries.remove(&victim);
        }
        Ok(self
            .entries
            .entry(ext)
            .or_insert_with(|| Neighbor::new(ext, now_ms)))
    }

    pub fn remove(&mut self, ext: &ExtAddr) -> Option<Neighbor> {
        self.entries.remove(ext)
    }

    /// Remove every neighbor whose liveness interval has passed.
    pub fn expire(&mut self, now_ms: u64, alive_ms: impl Fn(&Neighbor) -> u64) -> Vec<Neighbor> {
        let dead: Vec<ExtAddr> = self
            .entries
            .values()
            .filter(|n| !n.is_alive(now_ms, alive_ms(n)))
            .map(|n| n.ext)
            .collect();
        dead.iter()
            .filter_map(|ext| self.entries.remove(ext))
            .collect()
    }

    /// Reset relationship state of everything except `keep`.
    pub fn reset_states_except(&mut self, keep: Option<ExtAddr>) {
        for n in self.entries.values_mut() {
            if Some(n.ext) != keep {
                n.state = NeighborState::Invalid;
                n.buffer.clear();
                n.migrate_count = 0;
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
