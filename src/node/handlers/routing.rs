//! Router glue and super router promotion.

use super::CommandDest;
use crate::identity::{ExtAddr, Rsid, Sid};
use crate::node::{DeviceState, MeshNode, Mode};
use crate::protocol::{AllocStatus, CommandBody, MeshHeader, RoutingInfo, RsidRequest, RsidResponse};
use crate::router::RouterMessage;
use crate::timer::TimerKind;
use tracing::{debug, info, trace};

impl MeshNode {
    // ========================================================================
    // Route Computation
    // ========================================================================

    /// Rebuild the route table against the current neighbors.
    pub(in crate::node) fn recompute_routes(&mut self) {
        let view = self.local_view();
        let ctx = view.context(&self.neighbors);
        self.router.compute_routes(&ctx);
        self.drain_router_output();
    }

    /// Carry out queued router messages and timers; recompute when the
    /// topology moved.
    pub(in crate::node) fn apply_router_output(&mut self) {
        if self.drain_router_output() {
            self.recompute_routes();
        }
    }

    fn drain_router_output(&mut self) -> bool {
        let output = self.router.take_output();
        let router = self.router.id();
        for message in output.messages {
            let (dest, body) = match message {
                RouterMessage::Broadcast(body) => (CommandDest::Broadcast, body),
                RouterMessage::Unicast(ext, body) => (CommandDest::Neighbor(ext), body),
            };
            let info = RoutingInfo { router, body };
            self.send_command(dest, CommandBody::RoutingInfo(info));
        }
        for (kind, deadline) in output.timers {
            self.timers.schedule(kind, deadline);
        }
        output.topology_changed
    }

    pub(in crate::node) fn handle_routing_info(&mut self, src: ExtAddr, info: RoutingInfo) {
        if info.router != self.router.id() {
            trace!(src = %src, router = %info.router, "Routing info for another router");
            return;
        }
        if !self.device_state.is_attached() {
            return;
        }
        let view = self.local_view();
        let ctx = view.context(&self.neighbors);
        self.router.handle_routing_info(&src, &info.body, &ctx);
        self.apply_router_output();
    }

    pub(in crate::node) fn on_router_timer(&mut self, kind: TimerKind) {
        if !self.device_state.is_router() {
            return;
        }
        let view = self.local_view();
        let ctx = view.context(&self.neighbors);
        self.router.on_timer(kind, &ctx);
        self.apply_router_output();
    }

    // ========================================================================
    // Super Router Promotion
    // ========================================================================

    /// Ask the leader for an RSID once we have enough children.
    pub(in crate::node) fn check_super_router(&mut self) {
        if self.device_state != DeviceState::Router
            || !self.mode.contains(Mode::SUPER)
            || self.rsid.is_some()
            || self.attach.rsid_pending
        {
            return;
        }
        let children = self.neighbors.children().count();
        if children < self.config.attach.super_promotion_threshold {
            return;
        }
        debug!(children, "Requesting RSID");
        self.attach.rsid_pending = true;
        self.attach.rsid_retry.reset();
        self.request_rsid(None);
    }

    fn request_rsid(&mut self, current: Option<Rsid>) {
        let body = CommandBody::RsidRequest(RsidRequest { rsid: current });
        self.send_command(CommandDest::Sid(Sid::LEADER), body);
        let now = self.now_ms;
        let attach = &self.config.attach;
        let delay = self
            .attach
            .rsid_retry
            .record_failure(now, attach.retry_base_ms, attach.retry_max_ms);
        self.timers.schedule(TimerKind::RsidRenew, now + delay);
    }

    /// Leader side.
    pub(in crate::node) fn handle_rsid_request(&mut self, header: &MeshHeader, req: RsidRequest) {
        if self.device_state != DeviceState::Leader {
            return;
        }
        let Some(requester) = header.src_ext else {
            debug!(src = %header.src, "RSID request without extended source");
            return;
        };
        let body = match self.rsid_allocator.allocate(requester, req.rsid, self.now_ms) {
            Ok(rsid) => {
                info!(router = %requester, sid = %header.src, rsid = %rsid, "RSID granted");
                RsidResponse {
                    status: AllocStatus::Ok,
                    rsid: Some(rsid),
                }
            }
            Err(e) => {
                debug!(router = %requester, error = %e, "RSID allocation failed");
                RsidResponse {
                    status: e.status(),
                    rsid: None,
                }
            }
        };
        self.send_command(CommandDest::Sid(header.src), CommandBody::RsidResponse(body));
    }

    pub(in crate::node) fn handle_rsid_response(&mut self, resp: RsidResponse) {
        if !matches!(self.device_state, DeviceState::Router | DeviceState::SuperRouter) {
            return;
        }
        let granted = match (resp.status, resp.rsid) {
            (AllocStatus::Ok, Some(rsid)) => rsid,
            _ => {
                debug!(status = ?resp.status, "RSID request refused");
                return;
            }
        };
        self.attach.rsid_pending = false;
        self.attach.rsid_retry.reset();
        let renew_in = self.config.router.rsid_lease_ms / 2;
        self.timers
            .schedule(TimerKind::RsidRenew, self.now_ms + renew_in.max(1));
        if self.rsid == Some(granted) && self.device_state == DeviceState::SuperRouter {
            trace!(rsid = %granted, "RSID renewed");
            return;
        }
        self.rsid = Some(granted);
        self.device_state = DeviceState::SuperRouter;
        info!(rsid = %granted, sid = %self.sid, "Became super router");
        self.recompute_routes();
    }

    pub(in crate::node) fn on_rsid_timer(&mut self) {
        if !matches!(self.device_state, DeviceState::Router | DeviceState::SuperRouter) {
            return;
        }
        if self.rsid.is_some() && !self.attach.rsid_pending {
            self.attach.rsid_pending = true;
            self.attach.rsid_retry.reset();
            self.request_rsid(self.rsid);
            return;
        }
        if !self.attach.rsid_pending {
            return;
        }
        if self.attach.rsid_retry.exhausted(self.config.attach.retry_times) {
            debug!("RSID request unanswered");
            self.attach.rsid_pending = false;
            if self.device_state == DeviceState::SuperRouter {
                self.rsid = None;
                self.device_state = DeviceState::Router;
                info!(sid = %self.sid, "RSID lease lost");
                self.recompute_routes();
            }
            return;
        }
        self.request_rsid(self.rsid);
    }
}
