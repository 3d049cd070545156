//! Node tests over a simulated radio medium.
//!
//! [`SimNetwork`] owns a set of nodes on mock radios and a symmetric link
//! set. Each step advances the clock, ticks every node, then delivers
//! every frame a node handed its radio to each linked node that would
//! hear it: all of them for a broadcast, the addressee for a unicast.

use super::*;
use crate::config::RouterKind;
use crate::hal::mock::{MockHal, MockIpAdapter, SentFrame};
use std::collections::BTreeSet;

mod forwarding;

/// Simulated time per step.
const STEP_MS: u64 = 10;

/// Radio MTU for every simulated node.
pub(super) const MTU: usize = 250;

/// RSSI reported for every simulated reception.
const RSSI: i8 = -40;

pub(super) fn ext(n: u8) -> ExtAddr {
    ExtAddr::from_bytes([0x02, 0, 0, 0, 0, 0, 0, n])
}

pub(super) fn config() -> Config {
    Config::new()
}

pub(super) fn vector_config() -> Config {
    let mut config = Config::new();
    config.node.router.kind = RouterKind::Vector;
    config
}

/// A node plus handles on its mock radio and IP adapter.
pub(super) struct SimNode {
    pub(super) node: MeshNode,
    pub(super) radio: MockHal,
    pub(super) ip: MockIpAdapter,
    /// Every frame the medium carried away from this node.
    pub(super) sent: Vec<SentFrame>,
}

pub(super) struct SimNetwork {
    pub(super) nodes: Vec<SimNode>,
    links: BTreeSet<(usize, usize)>,
    pub(super) now_ms: u64,
}

impl SimNetwork {
    pub(super) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            links: BTreeSet::new(),
            now_ms: 1_000,
        }
    }

    /// Add a node with extended address `ext(n)`; returns its index.
    pub(super) fn add(&mut self, n: u8, config: Config) -> usize {
        let radio = MockHal::new(ext(n), MTU);
        let ip = MockIpAdapter::new();
        let node = MeshNode::new(config, Box::new(radio.clone()), Box::new(ip.clone())).unwrap();
        self.nodes.push(SimNode {
            node,
            radio,
            ip,
            sent: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub(super) fn link(&mut self, a: usize, b: usize) {
        self.links.insert((a.min(b), a.max(b)));
    }

    pub(super) fn unlink(&mut self, a: usize, b: usize) {
        self.links.remove(&(a.min(b), a.max(b)));
    }

    /// Link every pair of nodes.
    pub(super) fn link_all(&mut self) {
        for a in 0..self.nodes.len() {
            for b in a + 1..self.nodes.len() {
                self.link(a, b);
            }
        }
    }

    fn linked(&self, a: usize, b: usize) -> bool {
        self.links.contains(&(a.min(b), a.max(b)))
    }

    pub(super) fn node(&self, i: usize) -> &MeshNode {
        &self.nodes[i].node
    }

    pub(super) fn node_mut(&mut self, i: usize) -> &mut MeshNode {
        &mut self.nodes[i].node
    }

    pub(super) fn ext_of(&self, i: usize) -> ExtAddr {
        self.nodes[i].node.ext_addr()
    }

    pub(super) fn start(&mut self, i: usize) {
        let now = self.now_ms;
        self.nodes[i].node.start(now).unwrap();
    }

    /// Advance one step and carry the frames sent during it.
    pub(super) fn step(&mut self) {
        self.now_ms += STEP_MS;
        let now = self.now_ms;
        for sim in &mut self.nodes {
            sim.node.tick(now);
        }
        for from in 0..self.nodes.len() {
            let src = self.ext_of(from);
            let frames = self.nodes[from].radio.take_sent();
            self.nodes[from].sent.extend(frames.iter().cloned());
            for sent in frames {
                for to in 0..self.nodes.len() {
                    if to == from || !self.linked(from, to) {
                        continue;
                    }
                    if sent.dest.is_broadcast() || sent.dest == self.ext_of(to) {
                        self.nodes[to].node.receive(src, sent.frame.clone(), Some(RSSI));
                    }
                }
            }
        }
    }

    pub(super) fn run_for(&mut self, ms: u64) {
        let deadline = self.now_ms + ms;
        while self.now_ms < deadline {
            self.step();
        }
    }

    /// Step until `done` holds or `max_ms` passes; returns whether it held.
    pub(super) fn run_until(&mut self, max_ms: u64, done: impl Fn(&SimNetwork) -> bool) -> bool {
        let deadline = self.now_ms + max_ms;
        while self.now_ms < deadline {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }

    /// Start node `i` and wait for it to form its own network.
    pub(super) fn start_leader(&mut self, i: usize) {
        self.start(i);
        assert!(
            self.run_until(10_000, |net| net.node(i).device_state() == DeviceState::Leader),
            "node {} did not become leader: {:?}",
            i,
            self.node(i)
        );
    }

    /// Start node `i` and wait for it to attach under an existing network.
    pub(super) fn join(&mut self, i: usize) {
        self.start(i);
        assert!(
            self.run_until(10_000, |net| {
                let node = net.node(i);
                node.device_state().is_attached() && node.device_state() != DeviceState::Leader
            }),
            "node {} did not attach: {:?}",
            i,
            self.node(i)
        );
    }

    /// Frames node `i` put on the medium since the last call.
    pub(super) fn take_sent(&mut self, i: usize) -> Vec<SentFrame> {
        std::mem::take(&mut self.nodes[i].sent)
    }

    /// A super-capable node 0, then plain nodes 1 and 2, in a line 0-1-2
    /// with every node started at the same instant.
    pub(super) fn simultaneous_line(base: fn() -> Config) -> Self {
        let mut net = Self::new();
        let mut a = base();
        a.node.mode.super_capable = true;
        net.add(1, a);
        net.add(2, base());
        net.add(3, base());
        net.link(0, 1);
        net.link(1, 2);
        for i in 0..3 {
            net.start(i);
        }
        net
    }

    /// Node 0 leads and 2 reaches it through 1, all in one network.
    pub(super) fn line_converged(&self) -> bool {
        let netid = self.node(0).netid();
        let joined = |i: usize| {
            let node = self.node(i);
            node.device_state().is_attached()
                && node.device_state() != DeviceState::Leader
                && node.netid() == netid
        };
        self.node(0).device_state() == DeviceState::Leader
            && joined(1)
            && joined(2)
            && self.node(1).parent().map(|p| p.ext) == Some(ext(1))
            && self.node(2).parent().map(|p| p.ext) == Some(ext(2))
            && self.node(2).next_hop(Sid::LEADER) == Some(ext(2))
    }

    /// Leader at 0, then 1 under it, then 2 under 1; links 0-1 and 1-2.
    pub(super) fn line(configs: [Config; 3]) -> Self {
        let mut net = Self::new();
        for (i, config) in configs.into_iter().enumerate() {
            net.add(i as u8 + 1, config);
        }
        net.link(0, 1);
        net.link(1, 2);
        net.start_leader(0);
        net.join(1);
        net.join(2);
        net
    }
}
