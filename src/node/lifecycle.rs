//! Node lifecycle: start, stop, detach, leader election and runtime
//! reconfiguration.

use super::{AttachContext, Event, MeshNode, NodeError, NodeState};
use crate::forwarder::DeliveryFailure;
use crate::identity::{ExtAddr, ExtNetId, MeshNetId, Sid};
use crate::neighbor::NeighborState;
use crate::node::{AttachState, DeviceState, LeaderPriority, Mode};
use crate::timer::TimerKind;
use rand::Rng;
use tracing::{debug, info, warn};

/// Timers that only make sense while attached.
const ATTACHED_TIMERS: [TimerKind; 9] = [
    TimerKind::AttachRetry,
    TimerKind::Advertisement,
    TimerKind::NetworkDataFlood,
    TimerKind::Heartbeat,
    TimerKind::RouterSync,
    TimerKind::RsidRenew,
    TimerKind::SendRetry,
    TimerKind::Wakeup,
    TimerKind::Sleep,
];

impl MeshNode {
    /// Start the interface and begin scanning for a network.
    pub fn start(&mut self, now_ms: u64) -> Result<(), NodeError> {
        if !self.state.can_start() {
            return Err(NodeError::AlreadyStarted);
        }
        self.state = NodeState::Starting;
        self.now_ms = self.now_ms.max(now_ms);
        self.started_ms = self.now_ms;

        if let Err(e) = self.hal.set_channel(self.channel) {
            self.state = NodeState::Stopped;
            return Err(e.into());
        }

        self.reset_attachment();
        self.timers.cancel_all();
        self.attach = AttachContext::default();
        self.joiner.reset();

        let now = self.now_ms;
        let timing = &self.config.timing;
        self.timers
            .schedule(TimerKind::AliveCheck, now + timing.advertisement_interval_ms);
        self.timers
            .schedule(TimerKind::LinkQuality, now + timing.link_quality_interval_ms);
        self.timers
            .schedule(TimerKind::ReassemblyTick, now + timing.reassembly_tick_ms);
        self.state = NodeState::Running;
        self.schedule_attach();

        info!(
            ext = %self.ext,
            ext_netid = %self.ext_netid,
            mode = %self.mode,
            router = %self.router.id(),
            channel = self.channel,
            "Node started"
        );
        Ok(())
    }

    /// Stop the interface; the node can be started again later.
    pub fn stop(&mut self) -> Result<(), NodeError> {
        if !self.state.can_stop() {
            return Err(NodeError::NotStarted);
        }
        self.state = NodeState::Stopping;
        info!(ext = %self.ext, "Node stopping");

        for event in std::mem::take(&mut self.events) {
            if let Event::SendDown { dest, .. } = event {
                self.ip.delivery_failed(dest, DeliveryFailure::Detached);
            }
        }
        self.reset_attachment();
        self.timers.cancel_all();
        self.neighbors.clear();
        self.joiner.reset();
        self.attach = AttachContext::default();

        self.state = NodeState::Stopped;
        info!(ext = %self.ext, "Node stopped");
        Ok(())
    }

    /// Drop everything tied to the current network.
    fn reset_attachment(&mut self) {
        let parent = self.neighbors.parent().map(|n| n.ext);

        self.device_state = DeviceState::Detached;
        self.attach_state = AttachState::Idle;
        self.sid = Sid::INVALID;
        self.netid = MeshNetId::BCAST;
        self.rsid = None;
        self.path_cost = u16::MAX;
        self.leader = None;
        self.attach.candidate = None;
        self.attach.retry.reset();
        self.attach.rsid_retry.reset();
        self.attach.rsid_pending = false;

        self.allocator.reset(None, false);
        self.rsid_allocator.set_enabled(false);
        self.router.reset();
        let _ = self.router.take_output();
        self.network_data.reset();
        self.flood_queue.clear();
        self.forwarder.clear();
        self.relays.clear();
        // EAP admission holds for one network only.
        self.security.set_authenticated(false);

        self.neighbors.reset_states_except(None);
        if let Some(n) = parent.and_then(|p| self.neighbors.get_mut(&p)) {
            n.state = NeighborState::Candidate;
        }
        for kind in ATTACHED_TIMERS {
            self.timers.cancel(kind);
        }
        if self.lowpower.is_running() {
            self.lowpower.stop(self.now_ms);
        }
    }

    /// Leave the current network and start scanning again.
    pub(in crate::node) fn detach(&mut self, reason: &str) {
        let previous = self.device_state;
        let sid = self.sid;
        self.reset_attachment();
        info!(reason, previous = %previous, sid = %sid, "Detached");
        if self.state.is_operational() {
            self.schedule_attach();
        }
    }

    /// Arm the attach timer a random fraction of the request interval out.
    pub(in crate::node) fn schedule_attach(&mut self) {
        let interval = self.config.attach.request_interval_ms;
        let delay = self.rng.gen_range(interval / 2..=interval);
        self.timers.schedule(TimerKind::Attach, self.now_ms + delay);
    }

    /// `interval_ms` spread by the configured jitter.
    pub(in crate::node) fn jittered(&mut self, interval_ms: u64) -> u64 {
        let spread = interval_ms * self.config.timing.jitter_percent as u64 / 100;
        if spread == 0 {
            return interval_ms;
        }
        interval_ms - spread + self.rng.gen_range(0..=2 * spread)
    }

    /// Our own election priority, `None` when we may not lead.
    pub(in crate::node) fn own_priority(&self) -> Option<LeaderPriority> {
        self.config
            .leader_policy
            .weight_for(self.mode)
            .map(|weight| LeaderPriority::new(weight, self.ext))
    }

    /// Found no network: form one with ourselves as leader.
    pub(in crate::node) fn become_leader(&mut self) {
        let Some(priority) = self.own_priority() else {
            debug!(mode = %self.mode, "Not eligible to lead");
            return;
        };
        self.reset_attachment();
        self.timers.cancel(TimerKind::Attach);

        self.device_state = DeviceState::Leader;
        self.attach_state = AttachState::Done;
        self.sid = Sid::LEADER;
        self.netid = MeshNetId::from_leader(&self.ext);
        self.leader = Some(priority);
        self.path_cost = 0;
        self.allocator.reset(Some(Sid::LEADER), true);
        self.rsid_allocator.set_enabled(true);
        self.network_data.originate(self.netid);
        self.security.set_authenticated(true);

        info!(netid = %self.netid, weight = priority.weight, "Became leader");
        self.on_attached();
    }

    /// Common work after taking a SID, as leader or under a parent.
    pub(in crate::node) fn on_attached(&mut self) {
        let now = self.now_ms;
        self.attach.candidate = None;
        self.attach.retry.reset();
        self.attach.empty_attempts = 0;
        self.timers.cancel(TimerKind::Attach);
        self.timers.cancel(TimerKind::AttachRetry);

        if self.device_state.is_router() {
            self.timers.schedule(TimerKind::Advertisement, now);
            let ctx = self.local_view().context(&self.neighbors);
            self.router.start(&ctx);
        }
        if self.mode.is_sleepy() {
            let wake_at = self.lowpower.start(&self.ext, now);
            self.timers.schedule(TimerKind::Wakeup, wake_at);
        }
        self.apply_router_output();
        self.recompute_routes();
    }

    /// Switch to another extended network; re-attaches when attached.
    pub fn set_ext_netid(&mut self, ext_netid: ExtNetId) -> Result<(), NodeError> {
        if ext_netid == self.ext_netid {
            return Ok(());
        }
        self.security.set_ext_netid(ext_netid)?;
        let previous = self.ext_netid;
        self.ext_netid = ext_netid;
        self.config.ext_netid = ext_netid;
        self.attach.empty_attempts = 0;
        info!(previous = %previous, ext_netid = %ext_netid, "Extended network id changed");
        if self.state.is_operational() && self.device_state != DeviceState::Detached {
            self.detach("extnetid changed");
        }
        Ok(())
    }

    /// Change mode flags; an attached node re-attaches under the new role.
    pub fn set_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            return;
        }
        let previous = self.mode;
        self.mode = mode;
        info!(previous = %previous, mode = %mode, "Mode changed");
        if self.state.is_operational() && self.device_state.is_attached() {
            self.detach("mode changed");
        }
    }

    /// Move to the next key epoch; every neighbor must prove it again.
    pub fn rotate_key(&mut self) -> Result<u8, NodeError> {
        let epoch = self.security.rotate_key()?;
        for n in self.neighbors.iter_mut() {
            n.admitted = false;
        }
        Ok(epoch)
    }

    /// A neighbor proved it holds the key of a newer epoch: follow it.
    /// Every neighbor must prove the new key again.
    pub(in crate::node) fn adopt_key_epoch(&mut self, from: ExtAddr, epoch: u8) {
        let previous = self.security.epoch();
        if let Err(e) = self.security.set_epoch(epoch) {
            warn!(epoch, error = %e, "Key epoch not adopted");
            return;
        }
        for n in self.neighbors.iter_mut() {
            n.admitted = false;
        }
        info!(from = %from, previous, epoch, "Adopted newer key epoch");
    }

    /// Retune the radio, keeping the old channel when the radio refuses.
    pub(in crate::node) fn change_channel(&mut self, channel: u8) {
        match self.hal.set_channel(channel) {
            Ok(()) => {
                info!(from = self.channel, to = channel, "Channel changed");
                self.channel = channel;
            }
            Err(e) => warn!(channel, error = %e, "Channel change refused"),
        }
    }
}
