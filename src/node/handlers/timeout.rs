//! Timer dispatch and periodic liveness checks.

use crate::neighbor::NeighborState;
use crate::node::MeshNode;
use crate::timer::TimerKind;
use tracing::{debug, trace};

impl MeshNode {
    pub(in crate::node) fn handle_timer(&mut self, kind: TimerKind) {
        trace!(timer = ?kind, "Timer fired");
        match kind {
            TimerKind::Attach => self.on_attach_timer(),
            TimerKind::AttachRetry => self.on_attach_retry(),
            TimerKind::Advertisement => self.on_advertisement_timer(),
            TimerKind::AliveCheck => self.on_alive_check(),
            TimerKind::LinkQuality => self.on_link_quality_timer(),
            TimerKind::ReassemblyTick => self.on_reassembly_tick(),
            TimerKind::SendRetry => self.flush_outbound(),
            TimerKind::NetworkDataFlood => self.on_flood_timer(),
            TimerKind::Heartbeat | TimerKind::RouterSync => self.on_router_timer(kind),
            TimerKind::RsidRenew => self.on_rsid_timer(),
            TimerKind::AuthRetry => self.on_auth_retry_timer(),
            TimerKind::Wakeup => self.on_wakeup_timer(),
            TimerKind::Sleep => self.on_sleep_timer(),
        }
    }

    /// Expire silent neighbors and every lease or session that outlived
    /// its holder.
    fn on_alive_check(&mut self) {
        let now = self.now_ms;
        let interval = self.config.timing.advertisement_interval_ms;
        self.timers.schedule(TimerKind::AliveCheck, now + interval);

        let awake_alive = self.config.timing.neighbor_alive_ms();
        let sleepy_alive = self.config.lowpower.sleepy_alive_ms();
        let sleepy_self = self.mode.is_sleepy();
        let dead = self.neighbors.expire(now, |n| {
            if sleepy_self || n.mode.is_sleepy() {
                sleepy_alive.max(awake_alive)
            } else {
                awake_alive
            }
        });
        for n in dead {
            self.neighbor_gone(n, "alive timeout");
        }

        let expired = self.allocator.expire(now);
        for lease in &expired {
            debug!(child = %lease.ext, sid = %lease.sid, "Child lease expired");
            if let Some(n) = self.neighbors.get_mut(&lease.ext)
                && n.state == NeighborState::Child
            {
                n.state = NeighborState::Nbr;
            }
        }
        if !expired.is_empty() {
            self.recompute_routes();
        }

        let rsids = self.rsid_allocator.expire(now);
        if rsids > 0 {
            debug!(count = rsids, "RSID leases expired");
        }
        self.security.expire_blacklist(now);
        self.expire_relay_sessions();
    }

    fn on_reassembly_tick(&mut self) {
        let now = self.now_ms;
        let dropped = self.forwarder.reassembler().expire(now);
        if dropped > 0 {
            debug!(count = dropped, "Reassembly buffers timed out");
            self.forwarder.stats_mut().dropped += dropped as u64;
        }
        let tick = self.config.timing.reassembly_tick_ms;
        self.timers.schedule(TimerKind::ReassemblyTick, now + tick);
    }
}
