//! Mesh forwarder: outbound link queues, fragmentation, reassembly and
//! multicast bookkeeping.
//!
//! The forwarder does not decide routes; the node resolves a next hop
//! and hands the forwarder fully encoded frames. The forwarder owns them
//! from then on: it sends commands ahead of data, retries failed sends
//! with exponential backoff, drops frames that outlive the per-hop
//! deadline, and reports undeliverable local datagrams.

mod fragment;
mod multicast;
mod reassembly;

pub use fragment::fragment;
pub use multicast::McastCache;
pub use reassembly::{FragmentDrop, FragmentOrigin, Reassembler, Reassembly};

use crate::config::ForwarderConfig;
use crate::hal::{Hal, HalError};
use crate::identity::{ExtAddr, Sid};
use crate::node::RetryState;
use crate::protocol::{FrameKind, McastScope};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForwardError {
    #[error("datagram too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("link mtu {0} too small to carry a fragment")]
    MtuTooSmall(usize),
}

/// Where an upper-layer datagram is headed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    Sid(Sid),
    Ext(ExtAddr),
    Multicast(McastScope),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Sid(sid) => write!(f, "sid {}", sid),
            Destination::Ext(ext) => write!(f, "ext {}", ext),
            Destination::Multicast(McastScope::Subnet) => write!(f, "mcast subnet"),
            Destination::Multicast(McastScope::Mesh) => write!(f, "mcast mesh"),
        }
    }
}

/// Why a datagram accepted from the IP adapter was not delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryFailure {
    NoRoute,
    RetriesExhausted,
    Timeout,
    QueueFull,
    TooLarge,
    Detached,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryFailure::NoRoute => "no route",
            DeliveryFailure::RetriesExhausted => "retries exhausted",
            DeliveryFailure::Timeout => "send timeout",
            DeliveryFailure::QueueFull => "queue full",
            DeliveryFailure::TooLarge => "too large",
            DeliveryFailure::Detached => "detached",
        };
        write!(f, "{}", s)
    }
}

/// Link counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub in_data: u64,
    pub out_data: u64,
    pub in_command: u64,
    pub out_command: u64,
    pub dropped: u64,
    /// Frames refused by the whitelist.
    pub filtered: u64,
}

/// A locally originated datagram a queued frame belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DatagramRef {
    pub id: u32,
    pub dest: Destination,
}

/// One encoded frame waiting for the link.
#[derive(Clone, Debug)]
pub struct Outbound {
    pub next_hop: ExtAddr,
    pub frame: Vec<u8>,
    pub kind: FrameKind,
    pub enqueued_ms: u64,
    pub retry: RetryState,
    pub datagram: Option<DatagramRef>,
}

impl Outbound {
    pub fn new(next_hop: ExtAddr, frame: Vec<u8>, kind: FrameKind, now_ms: u64) -> Self {
        Self {
            next_hop,
            frame,
            kind,
            enqueued_ms: now_ms,
            retry: RetryState::new(),
            datagram: None,
        }
    }

    pub fn with_datagram(mut self, datagram: Option<DatagramRef>) -> Self {
        self.datagram = datagram;
        self
    }
}

/// Result of one queue flush.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub sent: usize,
    pub failures: Vec<(Destination, DeliveryFailure)>,
    /// When the head of the queue may be retried.
    pub retry_at_ms: Option<u64>,
}

pub struct Forwarder {
    config: ForwarderConfig,
    capacity: usize,
    commands: VecDeque<Outbound>,
    data: VecDeque<Outbound>,
    stats: LinkStats,
    next_tag: u16,
    next_mcast_seq: u8,
    next_datagram: u32,
    reassembler: Reassembler,
    mcast: McastCache,
}

impl Forwarder {
    pub fn new(
        config: ForwarderConfig,
        capacity: usize,
        reassembly_buffers: usize,
        mcast_cache: usize,
    ) -> Self {
        let reassembler = Reassembler::new(reassembly_buffers, config.reassembly_timeout_ms);
        Self {
            config,
            capacity,
            commands: VecDeque::new(),
            data: VecDeque::new(),
            stats: LinkStats::default(),
            next_tag: 1,
            next_mcast_seq: 0,
            next_datagram: 0,
            reassembler,
            mcast: McastCache::new(mcast_cache),
        }
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut LinkStats {
        &mut self.stats
    }

    pub fn reassembler(&mut self) -> &mut Reassembler {
        &mut self.reassembler
    }

    pub fn mcast_cache(&mut self) -> &mut McastCache {
        &mut self.mcast
    }

    pub fn next_tag(&mut self) -> u16 {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        tag
    }

    pub fn next_mcast_seq(&mut self) -> u8 {
        self.next_mcast_seq = self.next_mcast_seq.wrapping_add(1);
        self.next_mcast_seq
    }

    pub fn next_datagram(&mut self, dest: Destination) -> DatagramRef {
        self.next_datagram = self.next_datagram.wrapping_add(1);
        DatagramRef {
            id: self.next_datagram,
            dest,
        }
    }

    pub fn queued(&self) -> usize {
        self.commands.len() + self.data.len()
    }

    /// Queue a frame, making room by dropping the oldest data frame
    /// first and the oldest command second.
    pub fn enqueue(&mut self, out: Outbound) -> Vec<(Destination, DeliveryFailure)> {
        let mut failures = Vec::new();
        if self.capacity == 0 {
            self.stats.dropped += 1;
            failures.extend(out.datagram.map(|d| (d.dest, DeliveryFailure::QueueFull)));
            return failures;
        }
        while self.queued() >= self.capacity {
            let victim = self.data.pop_front().or_else(|| self.commands.pop_front());
            let Some(victim) = victim else { break };
            self.stats.dropped += 1;
            debug!(next_hop = %victim.next_hop, kind = %victim.kind, "Outbound queue full, dropping oldest frame");
            if let Some(d) = victim.datagram {
                failures.push((d.dest, DeliveryFailure::QueueFull));
                self.drop_datagram(d.id, &victim.next_hop);
            }
        }
        match out.kind {
            FrameKind::Command => self.commands.push_back(out),
            FrameKind::Data => self.data.push_back(out),
        }
        failures
    }

    /// Drop the remaining fragments of one datagram copy. Copies of the
    /// same datagram queued toward other next hops stay.
    fn drop_datagram(&mut self, id: u32, next_hop: &ExtAddr) {
        let before = self.data.len();
        self.data
            .retain(|o| o.next_hop != *next_hop || o.datagram.map(|d| d.id) != Some(id));
        self.stats.dropped += (before - self.data.len()) as u64;
    }

    fn pop_head(&mut self) -> Option<Outbound> {
        self.commands.pop_front().or_else(|| self.data.pop_front())
    }

    fn push_head(&mut self, out: Outbound) {
        match out.kind {
            FrameKind::Command => self.commands.push_front(out),
            FrameKind::Data => self.data.push_front(out),
        }
    }

    /// Hand queued frames to the link until it pushes back.
    pub fn flush(&mut self, hal: &mut dyn Hal, now_ms: u64) -> FlushReport {
        let mut report = FlushReport::default();
        while let Some(mut out) = self.pop_head() {
            if now_ms.saturating_sub(out.enqueued_ms) >= self.config.send_timeout_ms {
                debug!(next_hop = %out.next_hop, kind = %out.kind, "Queued frame timed out");
                self.fail(&out, DeliveryFailure::Timeout, &mut report);
                continue;
            }
            if out.retry.retry_after_ms > now_ms {
                report.retry_at_ms = Some(out.retry.retry_after_ms);
                self.push_head(out);
                break;
            }
            match hal.send(&out.next_hop, &out.frame) {
                Ok(()) => {
                    trace!(next_hop = %out.next_hop, kind = %out.kind, len = out.frame.len(), "Frame sent");
                    match out.kind {
                        FrameKind::Command => self.stats.out_command += 1,
                        FrameKind::Data => self.stats.out_data += 1,
                    }
                    report.sent += 1;
                }
                Err(e) => {
                    if out.retry.retry_count >= self.config.max_send_retries {
                        debug!(next_hop = %out.next_hop, error = %e, "Send retries exhausted");
                        self.fail(&out, DeliveryFailure::RetriesExhausted, &mut report);
                        continue;
                    }
                    let delay = out.retry.record_failure(
                        now_ms,
                        self.config.retry_base_ms,
                        self.config.retry_max_ms,
                    );
                    if !matches!(e, HalError::Busy) {
                        debug!(next_hop = %out.next_hop, error = %e, delay_ms = delay, "Send failed, retrying");
                    }
                    report.retry_at_ms = Some(out.retry.retry_after_ms);
                    self.push_head(out);
                    break;
                }
            }
        }
        report
    }

    fn fail(&mut self, out: &Outbound, reason: DeliveryFailure, report: &mut FlushReport) {
        self.stats.dropped += 1;
        if let Some(d) = out.datagram {
            report.failures.push((d.dest, reason));
            self.drop_datagram(d.id, &out.next_hop);
        }
    }

    /// Drop every queued frame and partial reassembly.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.data.clear();
        self.reassembler.clear();
        self.mcast.clear();
    }

    /// Drop queued frames addressed to a link neighbor that is gone.
    pub fn purge_next_hop(&mut self, next_hop: &ExtAddr) -> Vec<(Destination, DeliveryFailure)> {
        let mut failures = Vec::new();
        let mut dropped_ids = Vec::new();
        for queue in [&mut self.commands, &mut self.data] {
            queue.retain(|o| {
                if o.next_hop != *next_hop {
                    return true;
                }
                if let Some(d) = o.datagram
                    && !dropped_ids.contains(&d.id)
                {
                    dropped_ids.push(d.id);
                    failures.push((d.dest, DeliveryFailure::NoRoute));
                }
                false
            });
        }
        failures
    }
}

impl fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forwarder")
            .field("commands", &self.commands.len())
            .field("data", &self.data.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockHal;

    fn forwarder(capacity: usize) -> Forwarder {
        Forwarder::new(ForwarderConfig::default(), capacity, 4, 8)
    }

    fn out(kind: FrameKind, byte: u8, now: u64) -> Outbound {
        Outbound::new(ExtAddr::from_u64(2), vec![byte; 4], kind, now)
    }

    #[test]
    fn test_commands_sent_before_data() {
        let mut fwd = forwarder(8);
        let mut hal = MockHal::new(ExtAddr::from_u64(1), 127);
        fwd.enqueue(out(FrameKind::Data, 1, 0));
        fwd.enqueue(out(FrameKind::Command, 2, 0));
        let report = fwd.flush(&mut hal, 0);
        assert_eq!(report.sent, 2);
        let sent = hal.take_sent();
        assert_eq!(sent[0].frame, vec![2; 4]);
        assert_eq!(sent[1].frame, vec![1; 4]);
        assert_eq!(fwd.stats().out_command, 1);
        assert_eq!(fwd.stats().out_data, 1);
    }

    #[test]
    fn test_full_queue_drops_oldest_data_first() {
        let mut fwd = forwarder(2);
        let dest = Destination::Sid(Sid::new(0x1000));
        let d = fwd.next_datagram(dest);
        fwd.enqueue(out(FrameKind::Data, 1, 0).with_datagram(Some(d)));
        fwd.enqueue(out(FrameKind::Command, 2, 0));
        let failures = fwd.enqueue(out(FrameKind::Command, 3, 0));
        assert_eq!(failures, vec![(dest, DeliveryFailure::QueueFull)]);
        assert_eq!(fwd.queued(), 2);
        // With no data left, the oldest command goes.
        fwd.enqueue(out(FrameKind::Command, 4, 0));
        let mut hal = MockHal::new(ExtAddr::from_u64(1), 127);
        fwd.flush(&mut hal, 0);
        let frames: Vec<u8> = hal.take_sent().iter().map(|s| s.frame[0]).collect();
        assert_eq!(frames, vec![3, 4]);
    }

    #[test]
    fn test_busy_link_retries_with_backoff() {
        let mut fwd = forwarder(8);
        let mut hal = MockHal::new(ExtAddr::from_u64(1), 127);
        hal.set_busy(2);
        fwd.enqueue(out(FrameKind::Data, 1, 0));

        let r = fwd.flush(&mut hal, 0);
        assert_eq!(r.sent, 0);
        assert_eq!(r.retry_at_ms, Some(50));
        // Too early: still waiting.
        assert_eq!(fwd.flush(&mut hal, 10).retry_at_ms, Some(50));
        let r = fwd.flush(&mut hal, 50);
        assert_eq!(r.retry_at_ms, Some(150));
        let r = fwd.flush(&mut hal, 150);
        assert_eq!(r.sent, 1);
        assert_eq!(fwd.queued(), 0);
    }

    #[test]
    fn test_retries_exhausted_reports_failure_once_per_datagram() {
        let mut fwd = forwarder(8);
        let mut hal = MockHal::new(ExtAddr::from_u64(1), 127);
        hal.set_failing(100);
        let dest = Destination::Sid(Sid::new(0x2000));
        let d = fwd.next_datagram(dest);
        fwd.enqueue(out(FrameKind::Data, 1, 0).with_datagram(Some(d)));
        fwd.enqueue(out(FrameKind::Data, 2, 0).with_datagram(Some(d)));

        let mut now = 0;
        let mut failures = Vec::new();
        for _ in 0..10 {
            let r = fwd.flush(&mut hal, now);
            failures.extend(r.failures);
            match r.retry_at_ms {
                Some(at) => now = at,
                None => break,
            }
        }
        assert_eq!(failures, vec![(dest, DeliveryFailure::RetriesExhausted)]);
        assert_eq!(fwd.queued(), 0);
    }

    #[test]
    fn test_destinations_key_a_set() {
        let mut seen = std::collections::HashSet::new();
        assert!(seen.insert(Destination::Multicast(McastScope::Mesh)));
        assert!(seen.insert(Destination::Multicast(McastScope::Subnet)));
        assert!(seen.insert(Destination::Sid(Sid::LEADER)));
        assert!(!seen.insert(Destination::Multicast(McastScope::Mesh)));
    }

    #[test]
    fn test_failed_copy_keeps_sibling_copies() {
        let mut fwd = forwarder(8);
        let mut hal = MockHal::new(ExtAddr::from_u64(1), 127);
        hal.set_failing(ForwarderConfig::default().max_send_retries + 1);
        let dest = Destination::Multicast(McastScope::Mesh);
        let d = fwd.next_datagram(dest);
        let to = |n: u64| {
            Outbound::new(ExtAddr::from_u64(n), vec![n as u8; 4], FrameKind::Data, 0)
                .with_datagram(Some(d))
        };
        fwd.enqueue(to(2));
        fwd.enqueue(to(3));

        let mut now = 0;
        let mut failures = Vec::new();
        for _ in 0..10 {
            let r = fwd.flush(&mut hal, now);
            failures.extend(r.failures);
            match r.retry_at_ms {
                Some(at) => now = at,
                None => break,
            }
        }
        assert_eq!(failures, vec![(dest, DeliveryFailure::RetriesExhausted)]);
        let sent = hal.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dest, ExtAddr::from_u64(3));
        assert_eq!(fwd.queued(), 0);
    }

    #[test]
    fn test_stale_frame_times_out() {
        let mut fwd = forwarder(8);
        let mut hal = MockHal::new(ExtAddr::from_u64(1), 127);
        let dest = Destination::Ext(ExtAddr::from_u64(2));
        let d = fwd.next_datagram(dest);
        fwd.enqueue(out(FrameKind::Data, 1, 0).with_datagram(Some(d)));
        let r = fwd.flush(&mut hal, ForwarderConfig::default().send_timeout_ms);
        assert_eq!(r.failures, vec![(dest, DeliveryFailure::Timeout)]);
        assert!(hal.take_sent().is_empty());
    }

    #[test]
    fn test_purge_next_hop() {
        let mut fwd = forwarder(8);
        let dest = Destination::Sid(Sid::new(0x3000));
        let d = fwd.next_datagram(dest);
        fwd.enqueue(out(FrameKind::Data, 1, 0).with_datagram(Some(d)));
        fwd.enqueue(out(FrameKind::Data, 2, 0).with_datagram(Some(d)));
        fwd.enqueue(Outbound::new(ExtAddr::from_u64(9), vec![0], FrameKind::Command, 0));
        let failures = fwd.purge_next_hop(&ExtAddr::from_u64(2));
        assert_eq!(failures, vec![(dest, DeliveryFailure::NoRoute)]);
        assert_eq!(fwd.queued(), 1);
    }
}
