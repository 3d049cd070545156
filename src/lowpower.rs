//! Sleepy-node duty cycling.
//!
//! Time is divided into superframes of `slots` slots, each
//! `slot_interval_ms` long. A sleepy node (no `RX_ON`) keeps its radio
//! off except for one slot per superframe, chosen by hashing its
//! extended address with the superframe number. On wakeup it polls its
//! parent, which holds frames for it in the meantime; after
//! `awake_window_ms` it goes back to sleep.

use crate::config::LowpowerConfig;
use crate::identity::{sha256, ExtAddr};
use std::fmt;
use tracing::trace;

/// Radio state of a duty-cycled node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioState {
    /// Duty cycling not running.
    Off,
    Asleep,
    Awake,
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RadioState::Off => "off",
            RadioState::Asleep => "asleep",
            RadioState::Awake => "awake",
        };
        write!(f, "{}", s)
    }
}

/// Slot `ext` wakes in during `superframe`.
pub fn wake_slot(ext: &ExtAddr, superframe: u64, slots: u32) -> u32 {
    let mut input = [0u8; ExtAddr::LEN + 8];
    input[..ExtAddr::LEN].copy_from_slice(ext.as_bytes());
    input[ExtAddr::LEN..].copy_from_slice(&superframe.to_be_bytes());
    sha256(&input)[0] as u32 % slots.max(1)
}

#[derive(Debug)]
pub struct Lowpower {
    config: LowpowerConfig,
    state: RadioState,
    next_wakeup_ms: Option<u64>,
    asleep_since_ms: u64,
    sleep_time_ms: u64,
}

impl Lowpower {
    pub fn new(config: LowpowerConfig) -> Self {
        Self {
            config,
            state: RadioState::Off,
            next_wakeup_ms: None,
            asleep_since_ms: 0,
            sleep_time_ms: 0,
        }
    }

    pub fn state(&self) -> RadioState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state != RadioState::Off
    }

    pub fn next_wakeup_ms(&self) -> Option<u64> {
        self.next_wakeup_ms
    }

    /// Total time spent with the radio off.
    pub fn sleep_time_ms(&self) -> u64 {
        self.sleep_time_ms
    }

    pub fn superframe_ms(&self) -> u64 {
        self.config.slot_interval_ms * self.config.slots as u64
    }

    /// How long a woken node stays reachable.
    pub fn awake_window_ms(&self) -> u64 {
        self.config.awake_window_ms
    }

    /// Start of the first wake slot for `ext` strictly after `now_ms`.
    pub fn next_slot_start(&self, ext: &ExtAddr, now_ms: u64) -> u64 {
        let frame_ms = self.superframe_ms().max(1);
        let mut superframe = now_ms / frame_ms;
        loop {
            let slot = wake_slot(ext, superframe, self.config.slots) as u64;
            let start = superframe * frame_ms + slot * self.config.slot_interval_ms;
            if start > now_ms {
                return start;
            }
            superframe += 1;
        }
    }

    /// Begin duty cycling; returns when to wake.
    pub fn start(&mut self, ext: &ExtAddr, now_ms: u64) -> u64 {
        self.go_to_sleep(ext, now_ms)
    }

    /// Stop duty cycling and leave the radio on.
    pub fn stop(&mut self, now_ms: u64) {
        if self.state == RadioState::Asleep {
            self.sleep_time_ms += now_ms.saturating_sub(self.asleep_since_ms);
        }
        self.state = RadioState::Off;
        self.next_wakeup_ms = None;
    }

    /// Wake timer fired; returns when to sleep again.
    pub fn wake(&mut self, now_ms: u64) -> u64 {
        if self.state == RadioState::Asleep {
            self.sleep_time_ms += now_ms.saturating_sub(self.asleep_since_ms);
        }
        self.state = RadioState::Awake;
        self.next_wakeup_ms = None;
        trace!(at_ms = now_ms, "Radio awake");
        now_ms + self.config.awake_window_ms
    }

    /// Sleep timer fired; returns the next wakeup.
    pub fn sleep(&mut self, ext: &ExtAddr, now_ms: u64) -> u64 {
        self.go_to_sleep(ext, now_ms)
    }

    fn go_to_sleep(&mut self, ext: &ExtAddr, now_ms: u64) -> u64 {
        let at = self.next_slot_start(ext, now_ms);
        self.state = RadioState::Asleep;
        self.asleep_since_ms = now_ms;
        self.next_wakeup_ms = Some(at);
        trace!(wake_at_ms = at, "Radio asleep");
        at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lowpower() -> Lowpower {
        Lowpower::new(LowpowerConfig::default())
    }

    #[test]
    fn test_slot_is_deterministic_and_bounded() {
        let ext = ExtAddr::from_u64(0x0102_0304_0506_0708);
        for superframe in 0..64 {
            let slot = wake_slot(&ext, superframe, 8);
            assert!(slot < 8);
            assert_eq!(slot, wake_slot(&ext, superframe, 8));
        }
    }

    #[test]
    fn test_slots_vary_across_superframes() {
        let ext = ExtAddr::from_u64(42);
        let slots: std::collections::BTreeSet<u32> =
            (0..64).map(|sf| wake_slot(&ext, sf, 8)).collect();
        assert!(slots.len() > 1);
    }

    #[test]
    fn test_next_slot_is_in_future_and_aligned() {
        let lp = lowpower();
        let ext = ExtAddr::from_u64(7);
        let mut now = 0;
        for _ in 0..20 {
            let start = lp.next_slot_start(&ext, now);
            assert!(start > now);
            assert_eq!(start % 1000, 0);
            // At most the rest of this superframe plus one full superframe.
            assert!(start - now <= 2 * lp.superframe_ms());
            now = start;
        }
    }

    #[test]
    fn test_wake_sleep_cycle() {
        let mut lp = lowpower();
        let ext = ExtAddr::from_u64(3);
        let wake_at = lp.start(&ext, 0);
        assert_eq!(lp.state(), RadioState::Asleep);

        let sleep_at = lp.wake(wake_at);
        assert_eq!(lp.state(), RadioState::Awake);
        assert_eq!(sleep_at, wake_at + 300);
        assert_eq!(lp.sleep_time_ms(), wake_at);

        let next = lp.sleep(&ext, sleep_at);
        assert!(next > sleep_at);
        assert_eq!(lp.next_wakeup_ms(), Some(next));

        lp.stop(next);
        assert!(!lp.is_running());
        assert_eq!(lp.sleep_time_ms(), wake_at + (next - sleep_at));
    }
}
