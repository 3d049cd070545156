//! In-memory HAL and IP adapter for deterministic tests and simulation.
//!
//! Both mocks keep their state behind an `Rc<RefCell<_>>` so a test can
//! hold a handle while the node owns the boxed trait object.

use super::{Hal, HalError, IpAdapter};
use crate::forwarder::{DeliveryFailure, Destination};
use crate::identity::{ExtAddr, Sid};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A frame handed to the mock radio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentFrame {
    pub dest: ExtAddr,
    pub frame: Vec<u8>,
}

#[derive(Debug)]
pub struct MockHalState {
    pub ext: ExtAddr,
    pub channel: u8,
    pub bcast_mtu: usize,
    pub ucast_mtu: usize,
    pub sent: Vec<SentFrame>,
    /// Number of upcoming sends that fail with `Busy`.
    pub busy_sends: u32,
    /// Number of upcoming sends that fail outright.
    pub failed_sends: u32,
    pub link_quality: HashMap<ExtAddr, i8>,
}

/// Recording radio.
#[derive(Clone, Debug)]
pub struct MockHal {
    state: Rc<RefCell<MockHalState>>,
}

impl MockHal {
    pub fn new(ext: ExtAddr, mtu: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(MockHalState {
                ext,
                channel: 1,
                bcast_mtu: mtu,
                ucast_mtu: mtu,
                sent: Vec::new(),
                busy_sends: 0,
                failed_sends: 0,
                link_quality: HashMap::new(),
            })),
        }
    }

    /// Shared view of the mock's state.
    pub fn handle(&self) -> Rc<RefCell<MockHalState>> {
        Rc::clone(&self.state)
    }

    /// Drain every frame sent so far.
    pub fn take_sent(&self) -> Vec<SentFrame> {
        std::mem::take(&mut self.state.borrow_mut().sent)
    }

    pub fn set_busy(&self, sends: u32) {
        self.state.borrow_mut().busy_sends = sends;
    }

    pub fn set_failing(&self, sends: u32) {
        self.state.borrow_mut().failed_sends = sends;
    }

    pub fn set_link_quality(&self, neighbor: ExtAddr, rssi: i8) {
        self.state.borrow_mut().link_quality.insert(neighbor, rssi);
    }

    pub fn set_mtu(&self, mtu: usize) {
        let mut state = self.state.borrow_mut();
        state.bcast_mtu = mtu;
        state.ucast_mtu = mtu;
    }
}

impl Hal for MockHal {
    fn send(&mut self, dest: &ExtAddr, frame: &[u8]) -> Result<(), HalError> {
        let mut state = self.state.borrow_mut();
        let mtu = if dest.is_broadcast() { state.bcast_mtu } else { state.ucast_mtu };
        if frame.len() > mtu {
            return Err(HalError::Failed(format!("frame {} exceeds mtu {}", frame.len(), mtu)));
        }
        if state.busy_sends > 0 {
            state.busy_sends -= 1;
            return Err(HalError::Busy);
        }
        if state.failed_sends > 0 {
            state.failed_sends -= 1;
            return Err(HalError::Failed("injected".into()));
        }
        state.sent.push(SentFrame {
            dest: *dest,
            frame: frame.to_vec(),
        });
        Ok(())
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), HalError> {
        if channel == 0 {
            return Err(HalError::InvalidChannel(channel));
        }
        self.state.borrow_mut().channel = channel;
        Ok(())
    }

    fn channel(&self) -> u8 {
        self.state.borrow().channel
    }

    fn link_quality(&self, neighbor: &ExtAddr) -> Option<i8> {
        self.state.borrow().link_quality.get(neighbor).copied()
    }

    fn mac_address(&self) -> ExtAddr {
        self.state.borrow().ext
    }

    fn bcast_mtu(&self) -> usize {
        self.state.borrow().bcast_mtu
    }

    fn ucast_mtu(&self) -> usize {
        self.state.borrow().ucast_mtu
    }
}

#[derive(Debug, Default)]
pub struct MockIpState {
    pub delivered: Vec<(Sid, Vec<u8>)>,
    pub failed: Vec<(Destination, DeliveryFailure)>,
}

/// Recording IP adapter.
#[derive(Clone, Debug, Default)]
pub struct MockIpAdapter {
    state: Rc<RefCell<MockIpState>>,
}

impl MockIpAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_delivered(&self) -> Vec<(Sid, Vec<u8>)> {
        std::mem::take(&mut self.state.borrow_mut().delivered)
    }

    pub fn take_failed(&self) -> Vec<(Destination, DeliveryFailure)> {
        std::mem::take(&mut self.state.borrow_mut().failed)
    }
}

impl IpAdapter for MockIpAdapter {
    fn forward_up(&mut self, src: Sid, datagram: Vec<u8>) {
        self.state.borrow_mut().delivered.push((src, datagram));
    }

    fn delivery_failed(&mut self, dest: Destination, reason: DeliveryFailure) {
        self.state.borrow_mut().failed.push((dest, reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_and_injects_failures() {
        let mut hal = MockHal::new(ExtAddr::from_u64(1), 100);
        let handle = hal.clone();
        hal.send(&ExtAddr::BROADCAST, &[1, 2, 3]).unwrap();
        handle.set_busy(1);
        assert_eq!(hal.send(&ExtAddr::from_u64(2), &[4]), Err(HalError::Busy));
        assert!(matches!(
            hal.send(&ExtAddr::from_u64(2), &[0; 101]),
            Err(HalError::Failed(_))
        ));
        let sent = handle.take_sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].dest.is_broadcast());
    }

    #[test]
    fn test_mock_channel() {
        let mut hal = MockHal::new(ExtAddr::from_u64(1), 100);
        assert_eq!(hal.set_channel(0), Err(HalError::InvalidChannel(0)));
        hal.set_channel(11).unwrap();
        assert_eq!(hal.channel(), 11);
    }
}
