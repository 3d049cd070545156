//! Temporary blacklist for candidates that failed authentication.
//!
//! Entries carry their own expiry; expired entries are dropped lazily on
//! lookup and in bulk by `expire`.

use crate::identity::ExtAddr;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Blacklist {
    /// Extended address to the time (ms) its entry lapses.
    until: HashMap<ExtAddr, u64>,
    duration_ms: u64,
}

impl Blacklist {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            until: HashMap::new(),
            duration_ms,
        }
    }

    /// Blacklist `ext` for the configured duration starting at `now_ms`.
    pub fn add(&mut self, ext: ExtAddr, now_ms: u64) {
        self.until.insert(ext, now_ms + self.duration_ms);
    }

    pub fn contains(&self, ext: &ExtAddr, now_ms: u64) -> bool {
        self.until.get(ext).is_some_and(|&until| now_ms < until)
    }

    /// Remove lapsed entries; returns how many were dropped.
    pub fn expire(&mut self, now_ms: u64) -> usize {
        let before = self.until.len();
        self.until.retain(|_, &mut until| now_ms < until);
        before - self.until.len()
    }

    pub fn len(&self) -> usize {
        self.until.len()
    }

    pub fn is_empty(&self) -> bool {
        self.until.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_lapses() {
        let mut list = Blacklist::new(100);
        let ext = ExtAddr::from_u64(5);
        list.add(ext, 1000);
        assert!(list.contains(&ext, 1099));
        assert!(!list.contains(&ext, 1100));
        assert!(!list.contains(&ExtAddr::from_u64(6), 1000));
    }

    #[test]
    fn test_expire_drops_only_lapsed() {
        let mut list = Blacklist::new(100);
        list.add(ExtAddr::from_u64(1), 0);
        list.add(ExtAddr::from_u64(2), 50);
        assert_eq!(list.expire(120), 1);
        assert_eq!(list.len(), 1);
        assert!(list.contains(&ExtAddr::from_u64(2), 120));
    }

    #[test]
    fn test_re_add_extends() {
        let mut list = Blacklist::new(100);
        let ext = ExtAddr::from_u64(1);
        list.add(ext, 0);
        list.add(ext, 90);
        assert!(list.contains(&ext, 150));
    }
}
