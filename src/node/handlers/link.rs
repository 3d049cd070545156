//! Link estimation and sleepy-node polling.

use super::CommandDest;
use crate::identity::ExtAddr;
use crate::neighbor::NeighborState;
use crate::node::MeshNode;
use crate::protocol::{CommandBody, LinkAccept, LinkRequest, MeshHeader};
use crate::timer::TimerKind;
use tracing::{debug, trace};

impl MeshNode {
    /// One link estimation round.
    pub(in crate::node) fn on_link_quality_timer(&mut self) {
        let interval = self.config.timing.link_quality_interval_ms;
        self.timers
            .schedule(TimerKind::LinkQuality, self.now_ms + interval);
        if self.mode.is_sleepy() {
            return;
        }

        let mut failed = Vec::new();
        let mut request = Vec::new();
        for n in self.neighbors.iter_mut() {
            if !n.admitted || n.mode.is_sleepy() || !n.sid.is_unique() {
                continue;
            }
            if let Some(cost) = n.estimate_link_cost() {
                trace!(neighbor = %n.ext, link_cost = cost, "Link cost updated");
            }
            if n.link_failed() {
                failed.push(n.ext);
                continue;
            }
            n.link_requests = n.link_requests.saturating_add(1);
            request.push(n.ext);
        }

        for ext in failed {
            self.remove_neighbor(&ext, "link cost threshold");
        }
        for ext in request {
            let body = CommandBody::LinkRequest(LinkRequest { wakeup: false });
            self.send_command(CommandDest::Neighbor(ext), body);
        }
        self.recompute_routes();
    }

    pub(in crate::node) fn handle_link_request(
        &mut self,
        src: ExtAddr,
        header: &MeshHeader,
        req: LinkRequest,
        rssi: Option<i8>,
    ) {
        let now = self.now_ms;
        let awake_window = self.lowpower.awake_window_ms();
        let sleepy_self = self.mode.is_sleepy();
        let (state, want_estimate) = {
            let Some(n) = self.neighbors.get_mut(&src) else {
                return;
            };
            if header.src.is_unique() {
                n.sid = header.src;
                n.netid = header.netid;
            }
            if req.wakeup {
                n.awake_until_ms = now + awake_window;
            }
            let want_estimate = !n.flags.link_estimated && !sleepy_self && !n.mode.is_sleepy();
            if want_estimate {
                n.link_requests = n.link_requests.saturating_add(1);
            }
            (n.state, want_estimate)
        };

        if req.wakeup {
            trace!(child = %src, until_ms = now + awake_window, "Sleepy neighbor awake");
            self.release_buffered(&src);
        }

        let accept = LinkAccept {
            rssi: rssi.unwrap_or(0),
        };
        let body = if want_estimate {
            CommandBody::LinkAcceptAndRequest(accept)
        } else {
            CommandBody::LinkAccept(accept)
        };
        self.send_command(CommandDest::Neighbor(src), body);

        if state != NeighborState::Child && header.netid == self.netid && self.device_state.is_attached() {
            self.check_claimed_child(src, header.src);
        }
    }

    pub(in crate::node) fn handle_link_accept(
        &mut self,
        src: ExtAddr,
        _header: &MeshHeader,
        accept: LinkAccept,
        and_request: bool,
        rssi: Option<i8>,
    ) {
        let Some(n) = self.neighbors.get_mut(&src) else {
            return;
        };
        n.link_accepts = n.link_accepts.saturating_add(1).min(n.link_requests);
        n.forward_rssi = accept.rssi;
        if and_request {
            let reply = LinkAccept {
                rssi: rssi.unwrap_or(0),
            };
            self.send_command(CommandDest::Neighbor(src), CommandBody::LinkAccept(reply));
        }
    }

    // ========================================================================
    // Lowpower
    // ========================================================================

    pub(in crate::node) fn on_wakeup_timer(&mut self) {
        if !self.mode.is_sleepy() || !self.lowpower.is_running() {
            return;
        }
        let sleep_at = self.lowpower.wake(self.now_ms);
        self.timers.schedule(TimerKind::Sleep, sleep_at);
        if let Some(parent) = self.neighbors.parent().map(|p| p.ext) {
            trace!(parent = %parent, "Polling parent");
            let body = CommandBody::LinkRequest(LinkRequest { wakeup: true });
            self.send_command(CommandDest::Neighbor(parent), body);
        }
        self.flush_outbound();
    }

    pub(in crate::node) fn on_sleep_timer(&mut self) {
        if !self.lowpower.is_running() {
            return;
        }
        self.flush_outbound();
        let wake_at = self.lowpower.sleep(&self.ext, self.now_ms);
        self.timers.schedule(TimerKind::Wakeup, wake_at);
        debug!(wake_at_ms = wake_at, slept_ms = self.lowpower.sleep_time_ms(), "Radio off");
    }
}
