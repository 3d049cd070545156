//! Reassembly of fragmented datagrams.
//!
//! Fragments may arrive in any order. Each buffer tracks the byte ranges
//! it has filled; a fragment that overlaps an existing range is dropped,
//! and one that disagrees on the datagram size aborts the whole buffer.

use crate::identity::{ExtAddr, Sid};
use crate::protocol::FragmentHeader;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Originator of a fragmented datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FragmentOrigin {
    Sid(Sid),
    Ext(ExtAddr),
}

impl fmt::Display for FragmentOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentOrigin::Sid(sid) => write!(f, "{}", sid),
            FragmentOrigin::Ext(ext) => write!(f, "{}", ext),
        }
    }
}

/// Why a fragment was not stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentDrop {
    /// Overlaps bytes already received.
    Overlap,
    /// Datagram size differs from the buffer's; the buffer was aborted.
    SizeMismatch,
    /// Extends past the declared datagram size.
    OutOfBounds,
    /// Every reassembly buffer is in use.
    NoBuffer,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Reassembly {
    Complete(Vec<u8>),
    Pending,
    Dropped(FragmentDrop),
}

#[derive(Debug)]
struct Buffer {
    size: u16,
    data: Vec<u8>,
    /// Filled `[start, end)` ranges, kept sorted by start.
    filled: Vec<(usize, usize)>,
    received: usize,
    deadline_ms: u64,
}

impl Buffer {
    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.filled.iter().any(|&(s, e)| start < e && s < end)
    }

    fn insert(&mut self, start: usize, payload: &[u8]) {
        let end = start + payload.len();
        self.data[start..end].copy_from_slice(payload);
        let pos = self.filled.partition_point(|&(s, _)| s < start);
        self.filled.insert(pos, (start, end));
        self.received += payload.len();
    }
}

/// Bounded set of in-progress reassemblies.
#[derive(Debug)]
pub struct Reassembler {
    buffers: HashMap<(FragmentOrigin, u16), Buffer>,
    capacity: usize,
    timeout_ms: u64,
}

impl Reassembler {
    pub fn new(capacity: usize, timeout_ms: u64) -> Self {
        Self {
            buffers: HashMap::new(),
            capacity,
            timeout_ms,
        }
    }

    /// Store one fragment, returning the datagram once every byte is in.
    pub fn accept(
        &mut self,
        origin: FragmentOrigin,
        frag: &FragmentHeader,
        payload: &[u8],
        now_ms: u64,
    ) -> Reassembly {
        let key = (origin, frag.tag);
        let size = frag.size as usize;
        let start = frag.offset as usize;
        let end = start + payload.len();

        if let Some(buffer) = self.buffers.get(&key)
            && buffer.size != frag.size
        {
            debug!(origin = %origin, tag = frag.tag, "Fragment size mismatch, aborting reassembly");
            self.buffers.remove(&key);
            return Reassembly::Dropped(FragmentDrop::SizeMismatch);
        }
        if end > size || payload.is_empty() {
            return Reassembly::Dropped(FragmentDrop::OutOfBounds);
        }

        if !self.buffers.contains_key(&key) {
            if self.buffers.len() >= self.capacity {
                self.expire(now_ms);
            }
            if self.buffers.len() >= self.capacity {
                debug!(origin = %origin, tag = frag.tag, "No free reassembly buffer");
                return Reassembly::Dropped(FragmentDrop::NoBuffer);
            }
            self.buffers.insert(
                key,
                Buffer {
                    size: frag.size,
                    data: vec![0; size],
                    filled: Vec::new(),
                    received: 0,
                    deadline_ms: now_ms + self.timeout_ms,
                },
            );
        }

        let Some(buffer) = self.buffers.get_mut(&key) else {
            return Reassembly::Dropped(FragmentDrop::NoBuffer);
        };
        if buffer.overlaps(start, end) {
            return Reassembly::Dropped(FragmentDrop::Overlap);
        }
        buffer.insert(start, payload);
        if buffer.received < size {
            return Reassembly::Pending;
        }
        match self.buffers.remove(&key) {
            Some(buffer) => Reassembly::Complete(buffer.data),
            None => Reassembly::Pending,
        }
    }

    /// Discard buffers past their deadline; returns how many were dropped.
    pub fn expire(&mut self, now_ms: u64) -> usize {
        let before = self.buffers.len();
        self.buffers.retain(|(origin, tag), b| {
            let keep = now_ms < b.deadline_ms;
            if !keep {
                debug!(origin = %origin, tag, received = b.received, size = b.size, "Reassembly timed out");
            }
            keep
        });
        before - self.buffers.len()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    const ORIGIN: FragmentOrigin = FragmentOrigin::Sid(Sid::new(0x1000));

    fn pieces(data: &[u8], chunk: usize, tag: u16) -> Vec<(FragmentHeader, Vec<u8>)> {
        data.chunks(chunk)
            .enumerate()
            .map(|(i, c)| {
                (
                    FragmentHeader {
                        size: data.len() as u16,
                        tag,
                        offset: (i * chunk) as u16,
                    },
                    c.to_vec(),
                )
            })
            .collect()
    }

    fn feed(r: &mut Reassembler, frags: &[(FragmentHeader, Vec<u8>)]) -> Option<Vec<u8>> {
        let mut out = None;
        for (h, p) in frags {
            if let Reassembly::Complete(d) = r.accept(ORIGIN, h, p, 0) {
                out = Some(d);
            }
        }
        out
    }

    #[test]
    fn test_reassembles_in_reverse_order() {
        let data: Vec<u8> = (0..2000u32).map(|i| (i * 7) as u8).collect();
        let mut frags = pieces(&data, 232, 1);
        frags.reverse();
        let mut r = Reassembler::new(4, 1000);
        assert_eq!(feed(&mut r, &frags), Some(data));
        assert!(r.is_empty());
    }

    #[test]
    fn test_reassembles_random_interleavings() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for size in [9usize, 64, 257, 1000, 2047] {
            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let mut frags = pieces(&data, 48, size as u16);
            frags.shuffle(&mut rng);
            let mut r = Reassembler::new(4, 1000);
            assert_eq!(feed(&mut r, &frags).as_deref(), Some(&data[..]), "size {}", size);
        }
    }

    #[test]
    fn test_interleaved_datagrams_keep_separate_buffers() {
        let a = vec![1u8; 100];
        let b = vec![2u8; 100];
        let fa = pieces(&a, 40, 1);
        let fb = pieces(&b, 40, 2);
        let mut r = Reassembler::new(4, 1000);
        let mut done = Vec::new();
        for (x, y) in fa.iter().zip(fb.iter()) {
            for (h, p) in [x, y] {
                if let Reassembly::Complete(d) = r.accept(ORIGIN, h, p, 0) {
                    done.push(d);
                }
            }
        }
        assert_eq!(done, vec![a, b]);
    }

    #[test]
    fn test_duplicate_fragment_dropped() {
        let data = vec![3u8; 64];
        let frags = pieces(&data, 32, 1);
        let mut r = Reassembler::new(4, 1000);
        assert_eq!(r.accept(ORIGIN, &frags[0].0, &frags[0].1, 0), Reassembly::Pending);
        assert_eq!(
            r.accept(ORIGIN, &frags[0].0, &frags[0].1, 0),
            Reassembly::Dropped(FragmentDrop::Overlap)
        );
        assert!(matches!(
            r.accept(ORIGIN, &frags[1].0, &frags[1].1, 0),
            Reassembly::Complete(_)
        ));
    }

    #[test]
    fn test_size_mismatch_aborts() {
        let mut r = Reassembler::new(4, 1000);
        let h = FragmentHeader { size: 64, tag: 1, offset: 0 };
        r.accept(ORIGIN, &h, &[0; 32], 0);
        let bad = FragmentHeader { size: 72, tag: 1, offset: 32 };
        assert_eq!(
            r.accept(ORIGIN, &bad, &[0; 32], 0),
            Reassembly::Dropped(FragmentDrop::SizeMismatch)
        );
        assert!(r.is_empty());
    }

    #[test]
    fn test_out_of_bounds_fragment() {
        let mut r = Reassembler::new(4, 1000);
        let h = FragmentHeader { size: 40, tag: 1, offset: 32 };
        assert_eq!(
            r.accept(ORIGIN, &h, &[0; 16], 0),
            Reassembly::Dropped(FragmentDrop::OutOfBounds)
        );
    }

    #[test]
    fn test_expiry_and_capacity() {
        let mut r = Reassembler::new(1, 100);
        let h1 = FragmentHeader { size: 64, tag: 1, offset: 0 };
        let h2 = FragmentHeader { size: 64, tag: 2, offset: 0 };
        r.accept(ORIGIN, &h1, &[0; 32], 0);
        assert_eq!(
            r.accept(ORIGIN, &h2, &[0; 32], 50),
            Reassembly::Dropped(FragmentDrop::NoBuffer)
        );
        // Past the first buffer's deadline its slot is reclaimed.
        assert_eq!(r.accept(ORIGIN, &h2, &[0; 32], 100), Reassembly::Pending);
        assert_eq!(r.expire(300), 1);
    }
}
