//! Attach state machine: discovery, candidate selection, the attach
//! and SID renewal exchanges, address errors and migration.

use super::CommandDest;
use crate::config::SecurityMode;
use crate::identity::{ExtAddr, MeshNetId, Sid};
use crate::neighbor::{Neighbor, NeighborState, LINK_COST_INITIAL};
use crate::node::{AttachState, DeviceState, LeaderPriority, MeshNode, NodeType};
use crate::protocol::{
    AddressError, AllocStatus, AttachRequest, AttachResponse, CommandBody, MeshHeader, SidRequest,
    SidResponse,
};
use crate::timer::TimerKind;
use std::cmp::Ordering;
use tracing::{debug, info, trace};

/// Network size units worth one unit of candidate metric.
const SIZE_WEIGHT: u32 = 20;

/// Path cost units worth one unit of candidate metric.
const PATH_COST_WEIGHT: u32 = 256;

/// Delay before attaching once a router has been heard.
const ATTACH_PROMPT_MS: u64 = 50;

impl MeshNode {
    // ========================================================================
    // Discovery
    // ========================================================================

    pub(in crate::node) fn on_attach_timer(&mut self) {
        if self.device_state.is_attached()
            || self.attach_state != AttachState::Idle
            || self.joiner.in_progress()
        {
            return;
        }
        match self.select_candidate() {
            Some(ext) if self.needs_authentication() => self.start_joiner_auth(ext),
            Some(ext) => self.send_attach_request(ext),
            None => self.scan(),
        }
    }

    /// Broadcast a discovery request; lead when nothing answers for long enough.
    fn scan(&mut self) {
        self.attach.empty_attempts += 1;
        let body = AttachRequest {
            mode: self.mode,
            ext_netid: self.ext_netid,
            requested_sid: None,
        };
        self.send_command(CommandDest::Broadcast, CommandBody::AttachRequest(body));
        trace!(attempt = self.attach.empty_attempts, "Discovery request sent");

        // An unauthenticated EAP node must not split off a network of its
        // own while a router of its extnetid is in range.
        let blocked = self.needs_authentication() && self.heard_network_routers();
        if self.attach.empty_attempts >= self.config.attach.leader_after_attempts
            && self.own_priority().is_some()
            && !blocked
        {
            self.become_leader();
            return;
        }
        self.schedule_attach();
    }

    pub(in crate::node) fn needs_authentication(&self) -> bool {
        self.security.mode() == SecurityMode::Eap && !self.security.is_authenticated()
    }

    fn heard_network_routers(&self) -> bool {
        self.neighbors
            .iter()
            .any(|n| n.ext_netid == Some(self.ext_netid) && n.is_router())
    }

    /// Pull the attach timer in after hearing a router.
    fn prompt_attach(&mut self) {
        let at = self.now_ms + ATTACH_PROMPT_MS;
        if self.timers.deadline(TimerKind::Attach).is_none_or(|d| d > at) {
            self.timers.schedule(TimerKind::Attach, at);
        }
    }

    // ========================================================================
    // Candidates
    // ========================================================================

    pub(in crate::node) fn is_candidate(&self, n: &Neighbor) -> bool {
        let now = self.now_ms;
        let in_own_subtree = self.device_state.is_attached()
            && n.netid == self.netid
            && self.sid.covers(n.sid);
        n.ext_netid == Some(self.ext_netid)
            && n.is_router()
            && !n.mode.is_sleepy()
            && n.netid != MeshNetId::BCAST
            && n.ssid.free_slots > 0
            && n.leader.is_some()
            && n.net_info.is_some()
            && n.state != NeighborState::Child
            && !n.in_holddown(now)
            && !self.security.is_blacklisted(&n.ext, now)
            && !in_own_subtree
            && self.accepts_rank(n)
    }

    /// A node does not attach below a router of lower mode rank, unless
    /// that router's network already has a stronger leader than we would be.
    fn accepts_rank(&self, n: &Neighbor) -> bool {
        if n.mode.rank() >= self.mode.rank() {
            return true;
        }
        let order = self.config.leader_policy.address_order;
        match (n.leader, self.own_priority()) {
            (Some(theirs), Some(ours)) => theirs.beats(&ours, order),
            _ => true,
        }
    }

    fn select_candidate(&self) -> Option<ExtAddr> {
        self.neighbors
            .iter()
            .filter(|n| self.is_candidate(n))
            .max_by(|a, b| self.compare_candidates(a, b))
            .map(|n| n.ext)
    }

    /// Candidate preference: network leader, then metric, then address.
    fn compare_candidates(&self, a: &Neighbor, b: &Neighbor) -> Ordering {
        let order = self.config.leader_policy.address_order;
        let leaders = match (a.leader, b.leader) {
            (Some(la), Some(lb)) => la.compare(&lb, order),
            _ => Ordering::Equal,
        };
        leaders
            .then_with(|| candidate_metric(b).cmp(&candidate_metric(a)))
            .then_with(|| b.ext.cmp(&a.ext))
    }

    // ========================================================================
    // Attach Exchange (child side)
    // ========================================================================

    pub(in crate::node) fn send_attach_request(&mut self, ext: ExtAddr) {
        self.attach_state = AttachState::Attaching;
        self.attach.candidate = Some(ext);
        self.attach.retry.reset();
        if let Some(n) = self.neighbors.get_mut(&ext) {
            n.state = NeighborState::Candidate;
        }
        debug!(candidate = %ext, "Attaching");
        self.transmit_attach_request(ext);
    }

    fn transmit_attach_request(&mut self, ext: ExtAddr) {
        let body = AttachRequest {
            mode: self.mode,
            ext_netid: self.ext_netid,
            requested_sid: None,
        };
        self.send_command(CommandDest::Neighbor(ext), CommandBody::AttachRequest(body));
        self.arm_attach_retry();
    }

    fn arm_attach_retry(&mut self) {
        let now = self.now_ms;
        let attach = &self.config.attach;
        let delay = self
            .attach
            .retry
            .record_failure(now, attach.retry_base_ms, attach.retry_max_ms);
        self.timers.schedule(TimerKind::AttachRetry, now + delay);
    }

    pub(in crate::node) fn on_attach_retry(&mut self) {
        let Some(target) = self.attach.candidate else {
            return;
        };
        let exhausted = self.attach.retry.exhausted(self.config.attach.retry_times);
        match self.attach_state {
            AttachState::Attaching if exhausted => {
                debug!(candidate = %target, "Attach request unanswered");
                self.candidate_failed(target);
            }
            AttachState::Attaching => self.transmit_attach_request(target),
            AttachState::SidRequest if exhausted => self.detach("sid renewal unanswered"),
            AttachState::SidRequest => self.transmit_sid_request(target),
            _ => {}
        }
    }

    /// Hold a candidate down and go back to scanning.
    pub(in crate::node) fn candidate_failed(&mut self, ext: ExtAddr) {
        let until = self.now_ms + self.config.attach.candidate_holddown_ms;
        if let Some(n) = self.neighbors.get_mut(&ext) {
            n.holddown_until_ms = until;
            if n.state == NeighborState::Candidate {
                n.state = NeighborState::Nbr;
            }
        }
        if self.attach.candidate != Some(ext) {
            return;
        }
        debug!(candidate = %ext, holddown_until_ms = until, "Candidate held down");
        self.attach.candidate = None;
        self.attach.retry.reset();
        self.timers.cancel(TimerKind::AttachRetry);
        if self.attach_state == AttachState::Attaching {
            self.attach_state = AttachState::Idle;
        }
        if !self.device_state.is_attached() && self.state.is_operational() {
            self.schedule_attach();
        }
    }

    pub(in crate::node) fn handle_attach_response(
        &mut self,
        src: ExtAddr,
        header: &MeshHeader,
        resp: AttachResponse,
    ) {
        if self.attach_state != AttachState::Attaching || self.attach.candidate != Some(src) {
            trace!(src = %src, "Unexpected attach response");
            return;
        }
        if resp.status != AllocStatus::Ok
            || resp.ext_netid != self.ext_netid
            || !resp.sid.is_unique()
            || header.netid == MeshNetId::BCAST
        {
            debug!(candidate = %src, status = ?resp.status, "Attach refused");
            self.candidate_failed(src);
            return;
        }

        self.timers.cancel(TimerKind::AttachRetry);
        let link_cost = self.neighbors.get(&src).map_or(LINK_COST_INITIAL, |n| n.link_cost);
        self.sid = resp.sid;
        self.netid = header.netid;
        self.leader = Some(resp.leader);
        self.path_cost = resp.path_cost.saturating_add(link_cost);
        if resp.channel != self.channel {
            self.change_channel(resp.channel);
        }
        self.network_data.adopt(resp.net_info, resp.stable);

        if let Some(n) = self.neighbors.get_mut(&src) {
            n.state = NeighborState::Parent;
            n.sid = header.src;
            n.netid = header.netid;
            n.path_cost = resp.path_cost;
            n.leader = Some(resp.leader);
            n.migrate_count = 0;
            n.admitted = true;
        }

        let router_capable = self.router_capable(resp.node_type);
        self.device_state = if router_capable {
            DeviceState::Router
        } else {
            DeviceState::Leaf
        };
        self.allocator.reset(router_capable.then_some(self.sid), false);
        self.attach_state = AttachState::Done;

        info!(
            parent = %src,
            sid = %self.sid,
            netid = %self.netid,
            role = %self.device_state,
            path_cost = self.path_cost,
            "Attached"
        );
        self.on_attached();
    }

    fn router_capable(&self, granted: NodeType) -> bool {
        granted == NodeType::Router && !self.mode.is_mobile() && !self.mode.is_sleepy()
    }

    // ========================================================================
    // Attach Exchange (parent side)
    // ========================================================================

    pub(in crate::node) fn handle_attach_request(
        &mut self,
        src: ExtAddr,
        header: &MeshHeader,
        req: AttachRequest,
    ) {
        if req.ext_netid != self.ext_netid || !self.device_state.is_router() {
            return;
        }
        if header.dest_ext.is_none() {
            trace!(from = %src, "Answering discovery");
            self.send_advertisement(Some(src));
            return;
        }
        let Some(n) = self.neighbors.get(&src) else {
            return;
        };
        if n.state == NeighborState::Parent {
            return;
        }
        if self.security.mode() == SecurityMode::Eap && !n.admitted {
            debug!(joiner = %src, "Attach request from unauthenticated node");
            return;
        }

        let now = self.now_ms;
        let awake_until = now + self.lowpower.awake_window_ms();
        let body = match self.allocator.allocate(src, req.requested_sid, req.mode.is_mobile(), now) {
            Ok(lease) => {
                if let Some(n) = self.neighbors.get_mut(&src) {
                    n.state = NeighborState::Child;
                    n.sid = lease.sid;
                    n.netid = self.netid;
                    n.mode = req.mode;
                    n.migrate_count = 0;
                    // The joiner listens for the response before it sleeps.
                    n.awake_until_ms = awake_until;
                }
                info!(child = %src, sid = %lease.sid, node_type = ?lease.node_type, "Child attached");
                self.attach_response(AllocStatus::Ok, lease.sid, lease.node_type)
            }
            Err(e) => {
                debug!(joiner = %src, error = %e, "SID allocation failed");
                self.attach_response(e.status(), Sid::INVALID, NodeType::Leaf)
            }
        };
        let granted = body.status == AllocStatus::Ok;
        self.send_command(CommandDest::Neighbor(src), CommandBody::AttachResponse(body));
        if granted {
            self.neighbor_joined(&src);
        }
    }

    fn attach_response(&self, status: AllocStatus, sid: Sid, node_type: NodeType) -> AttachResponse {
        AttachResponse {
            status,
            sid,
            node_type,
            net_info: self.network_data.net_info(),
            stable: self.network_data.stable(),
            leader: self
                .leader
                .unwrap_or_else(|| LeaderPriority::new(0, self.ext)),
            path_cost: self.path_cost,
            ext_netid: self.ext_netid,
            channel: self.channel,
        }
    }

    /// Tell the router about a neighbor that entered our network.
    pub(in crate::node) fn neighbor_joined(&mut self, ext: &ExtAddr) {
        let view = self.local_view();
        if let Some(n) = self.neighbors.get(ext) {
            let ctx = view.context(&self.neighbors);
            self.router.neighbor_added(n, &ctx);
        }
        self.apply_router_output();
        self.recompute_routes();
    }

    // ========================================================================
    // SID Renewal
    // ========================================================================

    /// Our parent's SID changed; ask it for a SID under the new one.
    pub(in crate::node) fn start_sid_renewal(&mut self, parent: ExtAddr) {
        info!(parent = %parent, sid = %self.sid, "Parent SID changed, renewing");
        self.attach_state = AttachState::SidRequest;
        self.attach.candidate = Some(parent);
        self.attach.retry.reset();
        self.transmit_sid_request(parent);
    }

    fn transmit_sid_request(&mut self, parent: ExtAddr) {
        let body = SidRequest {
            mode: self.mode,
            current_sid: self.sid.is_unique().then_some(self.sid),
        };
        self.send_command(CommandDest::Neighbor(parent), CommandBody::SidRequest(body));
        self.arm_attach_retry();
    }

    pub(in crate::node) fn handle_sid_request(&mut self, src: ExtAddr, req: SidRequest) {
        if !self.device_state.is_router() {
            return;
        }
        let now = self.now_ms;
        let awake_until = now + self.lowpower.awake_window_ms();
        let body = match self.allocator.allocate(src, req.current_sid, req.mode.is_mobile(), now) {
            Ok(lease) => {
                if let Some(n) = self.neighbors.get_mut(&src) {
                    n.state = NeighborState::Child;
                    n.sid = lease.sid;
                    n.netid = self.netid;
                    n.mode = req.mode;
                    n.awake_until_ms = n.awake_until_ms.max(awake_until);
                }
                debug!(child = %src, sid = %lease.sid, "SID renewed");
                SidResponse {
                    status: AllocStatus::Ok,
                    sid: lease.sid,
                    node_type: lease.node_type,
                }
            }
            Err(e) => SidResponse {
                status: e.status(),
                sid: Sid::INVALID,
                node_type: NodeType::Leaf,
            },
        };
        let granted = body.status == AllocStatus::Ok;
        self.send_command(CommandDest::Neighbor(src), CommandBody::SidResponse(body));
        if granted {
            self.neighbor_joined(&src);
        }
    }

    pub(in crate::node) fn handle_sid_response(&mut self, src: ExtAddr, resp: SidResponse) {
        if self.attach_state != AttachState::SidRequest || self.attach.candidate != Some(src) {
            return;
        }
        self.timers.cancel(TimerKind::AttachRetry);
        if resp.status != AllocStatus::Ok || !resp.sid.is_unique() {
            self.detach("sid request refused");
            return;
        }

        let previous = self.sid;
        self.sid = resp.sid;
        self.attach_state = AttachState::Done;
        self.attach.candidate = None;
        self.attach.retry.reset();
        let router_capable = self.router_capable(resp.node_type);
        self.device_state = match (router_capable, self.device_state) {
            (true, DeviceState::SuperRouter) => DeviceState::SuperRouter,
            (true, _) => DeviceState::Router,
            (false, _) => DeviceState::Leaf,
        };
        if !router_capable {
            self.rsid = None;
        }
        self.allocator.reset(router_capable.then_some(self.sid), false);
        if let Some(n) = self.neighbors.get_mut(&src) {
            n.flags.sid_changed = false;
        }
        info!(previous = %previous, sid = %self.sid, role = %self.device_state, "SID renewed");

        if self.device_state.is_router() {
            self.timers.schedule(TimerKind::Advertisement, self.now_ms);
        }
        self.recompute_routes();
    }

    // ========================================================================
    // Address Errors and Migration
    // ========================================================================

    pub(in crate::node) fn handle_address_error(&mut self, src: ExtAddr, err: AddressError) {
        let aimed_at_us = match err.target {
            Some(target) => target == self.ext,
            None => err.sid == self.sid,
        };
        if !aimed_at_us
            || !self.device_state.is_attached()
            || self.device_state == DeviceState::Leader
        {
            debug!(from = %src, sid = %err.sid, "Address error ignored");
            return;
        }
        info!(from = %src, sid = %err.sid, "Address error for own SID");
        self.detach("address error");
    }

    /// Tell a neighbor claiming one of our child slots that it does not hold it.
    pub(in crate::node) fn check_claimed_child(&mut self, ext: ExtAddr, claimed: Sid) {
        if self.allocator.base() != Some(self.sid) || !claimed.is_direct_child_of(self.sid) {
            return;
        }
        if self.allocator.owner(claimed) == Some(ext) {
            return;
        }
        debug!(neighbor = %ext, sid = %claimed, "Neighbor claims unallocated child SID");
        let body = CommandBody::AddressError(AddressError {
            sid: claimed,
            target: Some(ext),
        });
        self.send_command(CommandDest::Neighbor(ext), body);
    }

    /// Leave the current network and attach under `ext`.
    pub(in crate::node) fn migrate_to(&mut self, ext: ExtAddr, reason: &str) {
        info!(to = %ext, reason, "Migrating");
        self.detach(reason);
        let eligible = self.neighbors.get(&ext).is_some_and(|n| self.is_candidate(n));
        if !eligible {
            return;
        }
        self.timers.cancel(TimerKind::Attach);
        if self.needs_authentication() {
            self.start_joiner_auth(ext);
        } else {
            self.send_attach_request(ext);
        }
    }

    pub(in crate::node) fn wake_attach(&mut self) {
        if !self.device_state.is_attached()
            && self.attach_state == AttachState::Idle
            && !self.joiner.in_progress()
        {
            self.prompt_attach();
        }
    }
}

/// Lower is better.
fn candidate_metric(n: &Neighbor) -> u32 {
    let size = n.net_info.map_or(0, |info| info.size as u32);
    size / SIZE_WEIGHT + n.cost_via() as u32 / PATH_COST_WEIGHT
}
