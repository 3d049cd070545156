//! Multicast duplicate suppression.

use crate::identity::Sid;
use std::collections::VecDeque;

/// Recently seen `(origin, seq, fragment offset)` keys, oldest evicted
/// first. Fragments of one multicast datagram share a sequence number,
/// so the offset keeps them apart.
#[derive(Debug)]
pub struct McastCache {
    seen: VecDeque<(Sid, u8, u16)>,
    capacity: usize,
}

impl McastCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a frame; returns false if it was already seen.
    pub fn insert(&mut self, origin: Sid, seq: u8, offset: u16) -> bool {
        let key = (origin, seq, offset);
        if self.seen.contains(&key) {
            return false;
        }
        if self.capacity == 0 {
            return true;
        }
        if self.seen.len() >= self.capacity {
            self.seen.pop_front();
        }
        self.seen.push_back(key);
        true
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_suppressed() {
        let mut cache = McastCache::new(4);
        assert!(cache.insert(Sid::new(0x1000), 1, 0));
        assert!(!cache.insert(Sid::new(0x1000), 1, 0));
        assert!(cache.insert(Sid::new(0x2000), 1, 0));
        // Next fragment of the same datagram.
        assert!(cache.insert(Sid::new(0x1000), 1, 96));
    }

    #[test]
    fn test_oldest_evicted() {
        let mut cache = McastCache::new(2);
        cache.insert(Sid::LEADER, 1, 0);
        cache.insert(Sid::LEADER, 2, 0);
        cache.insert(Sid::LEADER, 3, 0);
        assert!(cache.insert(Sid::LEADER, 1, 0));
        assert!(!cache.insert(Sid::LEADER, 3, 0));
    }
}
