//! Deadline-ordered timers driven by an external clock.
//!
//! Each `TimerKind` names at most one pending timer; re-scheduling a kind
//! replaces its deadline and cancelling removes it. The heap is cleaned
//! lazily: stale heap entries are skipped when popped.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Protocol timers owned by a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Discovery / attach attempt.
    Attach,
    /// Retry of an unanswered SID or attach request.
    AttachRetry,
    /// Periodic router advertisement.
    Advertisement,
    /// Neighbor liveness, lease and blacklist expiry.
    AliveCheck,
    /// Link request round.
    LinkQuality,
    /// Expire stale reassembly buffers.
    ReassemblyTick,
    /// Retry of queued outbound frames.
    SendRetry,
    /// Delayed re-flood of applied network data.
    NetworkDataFlood,
    /// Vector router heartbeat.
    Heartbeat,
    /// Vector router topology sync retry.
    RouterSync,
    /// RSID request or renewal.
    RsidRenew,
    /// Authentication retry.
    AuthRetry,
    /// Sleepy node wakes for its slot.
    Wakeup,
    /// Sleepy node returns to sleep.
    Sleep,
}

/// Min-heap of singleton timers.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<(u64, u64, TimerKind)>>,
    live: HashMap<TimerKind, (u64, u64)>,
    generation: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire at `deadline_ms`, replacing any pending deadline.
    pub fn schedule(&mut self, kind: TimerKind, deadline_ms: u64) {
        self.generation += 1;
        self.live.insert(kind, (deadline_ms, self.generation));
        self.heap.push(Reverse((deadline_ms, self.generation, kind)));
    }

    /// Arm `kind` only if it is not already pending.
    pub fn schedule_if_idle(&mut self, kind: TimerKind, deadline_ms: u64) {
        if !self.is_scheduled(kind) {
            self.schedule(kind, deadline_ms);
        }
    }

    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.live.remove(&kind).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.live.clear();
        self.heap.clear();
    }

    pub fn is_scheduled(&self, kind: TimerKind) -> bool {
        self.live.contains_key(&kind)
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<u64> {
        self.live.get(&kind).map(|(deadline, _)| *deadline)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&mut self) -> Option<u64> {
        self.discard_stale();
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Pop the earliest timer due at or before `now_ms`.
    ///
    /// Timers with equal deadlines fire in the order they were armed.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<TimerKind> {
        self.discard_stale();
        let Reverse((deadline, _, kind)) = *self.heap.peek()?;
        if deadline > now_ms {
            return None;
        }
        self.heap.pop();
        self.live.remove(&kind);
        Some(kind)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn discard_stale(&mut self) {
        while let Some(&Reverse((deadline, generation, kind))) = self.heap.peek() {
            match self.live.get(&kind) {
                Some(&(d, g)) if d == deadline && g == generation => break,
                _ => {
                    self.heap.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_in_deadline_order() {
        let mut timers = TimerQueue::new();
        timers.schedule(TimerKind::Advertisement, 300);
        timers.schedule(TimerKind::Attach, 100);
        timers.schedule(TimerKind::LinkQuality, 200);

        assert_eq!(timers.pop_due(50), None);
        assert_eq!(timers.pop_due(1000), Some(TimerKind::Attach));
        assert_eq!(timers.pop_due(1000), Some(TimerKind::LinkQuality));
        assert_eq!(timers.pop_due(1000), Some(TimerKind::Advertisement));
        assert_eq!(timers.pop_due(1000), None);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_reschedule_replaces_deadline() {
        let mut timers = TimerQueue::new();
        timers.schedule(TimerKind::Attach, 100);
        timers.schedule(TimerKind::Attach, 500);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.pop_due(200), None);
        assert_eq!(timers.next_deadline(), Some(500));
        assert_eq!(timers.pop_due(500), Some(TimerKind::Attach));
        assert_eq!(timers.pop_due(10_000), None);
    }

    #[test]
    fn test_cancel() {
        let mut timers = TimerQueue::new();
        timers.schedule(TimerKind::AttachRetry, 100);
        assert!(timers.cancel(TimerKind::AttachRetry));
        assert!(!timers.cancel(TimerKind::AttachRetry));
        assert_eq!(timers.pop_due(1000), None);
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn test_equal_deadlines_fire_in_arming_order() {
        let mut timers = TimerQueue::new();
        timers.schedule(TimerKind::Sleep, 100);
        timers.schedule(TimerKind::Attach, 100);
        assert_eq!(timers.pop_due(100), Some(TimerKind::Sleep));
        assert_eq!(timers.pop_due(100), Some(TimerKind::Attach));
    }

    #[test]
    fn test_schedule_if_idle_keeps_existing() {
        let mut timers = TimerQueue::new();
        timers.schedule(TimerKind::NetworkDataFlood, 100);
        timers.schedule_if_idle(TimerKind::NetworkDataFlood, 50);
        assert_eq!(timers.deadline(TimerKind::NetworkDataFlood), Some(100));
    }
}
