//! Inbound frame pipeline and command dispatch.
//!
//! A received frame passes, in order: radio state, whitelist/blacklist,
//! decoding, key verification, neighbor update, admission, and finally
//! local delivery, multicast handling or forwarding.

use crate::config::SecurityMode;
use crate::forwarder::{FragmentOrigin, Reassembly};
use crate::identity::{ExtAddr, MeshNetId};
use crate::lowpower::RadioState;
use crate::neighbor::{Neighbor, NeighborState};
use crate::node::{Event, MeshNode};
use crate::protocol::{Command, CommandBody, CommandType, FrameKind, MeshFrame, MeshHeader};
use crate::security::{Admission, RejectReason};
use tracing::{debug, info, trace};

impl MeshNode {
    pub(in crate::node) fn process_event(&mut self, event: Event) {
        match event {
            Event::Frame { src, frame, rssi } => self.handle_frame(src, &frame, rssi),
            Event::SendDown { dest, datagram } => self.handle_send_down(dest, datagram),
            Event::LinkDown(ext) => {
                if self.neighbors.contains(&ext) {
                    self.remove_neighbor(&ext, "link down");
                }
            }
            Event::Timer(kind) => self.handle_timer(kind),
        }
    }

    fn handle_frame(&mut self, src: ExtAddr, bytes: &[u8], rssi: Option<i8>) {
        let now = self.now_ms;
        if self.lowpower.state() == RadioState::Asleep {
            trace!(src = %src, "Radio asleep, frame lost");
            return;
        }

        let rssi = match self.security.check_source(&src, now) {
            Admission::Admitted { rssi_override } => rssi_override.or(rssi),
            Admission::Rejected(reason) => {
                let stats = self.forwarder.stats_mut();
                if reason == RejectReason::NotWhitelisted {
                    stats.filtered += 1;
                } else {
                    stats.dropped += 1;
                }
                trace!(src = %src, reason = %reason, "Frame rejected");
                return;
            }
        };

        let frame = match MeshFrame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(src = %src, error = %e, "Malformed frame");
                self.forwarder.stats_mut().dropped += 1;
                return;
            }
        };

        if let Some(epoch) = self.security.newer_epoch(&frame) {
            self.adopt_key_epoch(src, epoch);
        }
        if let Err(reason) = self.security.verify(&frame) {
            debug!(src = %src, reason = %reason, epoch = ?frame.header.key_epoch, "Frame failed verification");
            if let Some(n) = self.neighbors.get_mut(&src) {
                n.admitted = false;
            }
            self.forwarder.stats_mut().dropped += 1;
            return;
        }

        // Unfragmented commands are decoded up front so admission can
        // look at their type.
        let command = if frame.header.kind == FrameKind::Command && frame.header.frag.is_none() {
            match Command::decode(&frame.payload) {
                Ok(cmd) => Some(cmd),
                Err(e) => {
                    debug!(src = %src, error = %e, "Malformed command");
                    self.forwarder.stats_mut().dropped += 1;
                    return;
                }
            }
        } else {
            None
        };
        let command_type = command.as_ref().map(|c| c.command_type());
        let attach_related = matches!(
            command_type,
            Some(CommandType::Advertisement | CommandType::AttachRequest | CommandType::AttachResponse)
        );

        if !self.update_neighbor(src, &frame.header, rssi, attach_related) {
            return;
        }
        let admitted = self.neighbors.get(&src).is_some_and(|n| n.admitted);
        if !admitted && !command_type.is_some_and(|t| t.allowed_before_admission()) {
            trace!(src = %src, kind = %frame.header.kind, "Neighbor not admitted, frame dropped");
            self.forwarder.stats_mut().dropped += 1;
            return;
        }

        self.route_inbound(src, frame, command, rssi);
    }

    /// Refresh (or create) the link neighbor a frame came from.
    ///
    /// Returns false when the table has no room for it.
    fn update_neighbor(
        &mut self,
        src: ExtAddr,
        header: &MeshHeader,
        rssi: Option<i8>,
        attach_related: bool,
    ) -> bool {
        let now = self.now_ms;
        let hint = self.hal.link_quality(&src).or(rssi);
        let keyed_or_open = self.security.mode() != SecurityMode::Eap;
        let member = self.security.is_authenticated()
            && self.netid != MeshNetId::BCAST
            && header.netid == self.netid
            && header.src.is_unique();
        let known = self.neighbors.contains(&src);

        let n = match self.neighbors.get_or_insert(src, now, attach_related) {
            Ok(n) => n,
            Err(e) => {
                debug!(src = %src, error = %e, "Neighbor not added");
                self.forwarder.stats_mut().dropped += 1;
                return false;
            }
        };
        if !known {
            if let Some(rssi) = hint {
                n.seed_link_cost(rssi);
            }
            debug!(neighbor = %src, link_cost = n.link_cost, "New neighbor");
        }
        n.last_heard_ms = now;
        if let Some(rssi) = rssi {
            n.reverse_rssi = rssi;
        }
        if header.key_epoch.is_some() {
            n.key_epoch = header.key_epoch;
        }
        if keyed_or_open || member {
            n.admitted = true;
        }
        let child_sid = (n.state == NeighborState::Child).then_some(n.sid);
        if let Some(sid) = child_sid {
            self.allocator.refresh(sid, &src, now);
        }
        true
    }

    fn route_inbound(&mut self, src: ExtAddr, frame: MeshFrame, command: Option<Command>, rssi: Option<i8>) {
        if let Some(mcast) = frame.header.mcast {
            self.handle_multicast(src, frame, mcast);
            return;
        }
        let header = &frame.header;
        let to_our_ext = header.dest_ext == Some(self.ext);
        let in_our_network = self.sid.is_unique() && header.netid == self.netid;
        let for_us = to_our_ext
            || header.is_broadcast()
            || (header.dest_ext.is_none() && in_our_network && header.dest == self.sid);
        if !for_us {
            if header.dest_ext.is_some() || in_our_network {
                self.forward_frame(src, frame);
            } else {
                trace!(src = %src, netid = %header.netid, "Frame for another network dropped");
                self.forwarder.stats_mut().dropped += 1;
            }
            return;
        }

        let Some(frag) = frame.header.frag else {
            self.deliver_local(src, frame.header, frame.payload, command, rssi);
            return;
        };
        let origin = match frame.header.src_ext {
            Some(ext) => FragmentOrigin::Ext(ext),
            None if frame.header.src.is_unique() => FragmentOrigin::Sid(frame.header.src),
            None => FragmentOrigin::Ext(src),
        };
        let now = self.now_ms;
        match self.forwarder.reassembler().accept(origin, &frag, &frame.payload, now) {
            Reassembly::Complete(datagram) => {
                trace!(origin = %origin, size = datagram.len(), "Datagram reassembled");
                self.deliver_local(src, frame.header, datagram, None, rssi);
            }
            Reassembly::Pending => {}
            Reassembly::Dropped(reason) => {
                debug!(origin = %origin, tag = frag.tag, reason = ?reason, "Fragment dropped");
                self.forwarder.stats_mut().dropped += 1;
            }
        }
    }

    /// Hand a complete payload addressed to us to its consumer.
    pub(in crate::node) fn deliver_local(
        &mut self,
        src: ExtAddr,
        header: MeshHeader,
        payload: Vec<u8>,
        command: Option<Command>,
        rssi: Option<i8>,
    ) {
        match header.kind {
            FrameKind::Data => {
                self.forwarder.stats_mut().in_data += 1;
                trace!(src = %header.src, len = payload.len(), "Datagram delivered");
                self.ip.forward_up(header.src, payload);
            }
            FrameKind::Command => {
                let command = match command {
                    Some(cmd) => cmd,
                    None => match Command::decode(&payload) {
                        Ok(cmd) => cmd,
                        Err(e) => {
                            debug!(src = %src, error = %e, "Malformed command");
                            self.forwarder.stats_mut().dropped += 1;
                            return;
                        }
                    },
                };
                self.forwarder.stats_mut().in_command += 1;
                self.dispatch_command(src, &header, command, rssi);
            }
        }
    }

    fn dispatch_command(&mut self, src: ExtAddr, header: &MeshHeader, command: Command, rssi: Option<i8>) {
        trace!(src = %src, cmd = %command.command_type(), seq = command.seq, "Command received");
        match command.body {
            CommandBody::Advertisement(adv) => self.handle_advertisement(src, header, adv),
            CommandBody::AttachRequest(req) => self.handle_attach_request(src, header, req),
            CommandBody::AttachResponse(resp) => self.handle_attach_response(src, header, resp),
            CommandBody::SidRequest(req) => self.handle_sid_request(src, req),
            CommandBody::SidResponse(resp) => self.handle_sid_response(src, resp),
            CommandBody::AddressError(err) => self.handle_address_error(src, err),
            CommandBody::LinkRequest(req) => self.handle_link_request(src, header, req, rssi),
            CommandBody::LinkAccept(accept) => self.handle_link_accept(src, header, accept, false, rssi),
            CommandBody::LinkAcceptAndRequest(accept) => {
                self.handle_link_accept(src, header, accept, true, rssi)
            }
            CommandBody::NetworkDataUpdate(update) => self.handle_network_data(src, header, update),
            CommandBody::RoutingInfo(info) => self.handle_routing_info(src, info),
            CommandBody::RsidRequest(req) => self.handle_rsid_request(header, req),
            CommandBody::RsidResponse(resp) => self.handle_rsid_response(resp),
            CommandBody::AuthStart(start) => self.handle_auth_start(src, start),
            CommandBody::AuthRelay(relay) => self.handle_auth_relay(header, relay),
            CommandBody::AuthChallenge(challenge) => self.handle_auth_challenge(src, challenge),
            CommandBody::AuthCode(code) => self.handle_auth_code(src, code),
            CommandBody::AuthCodeRelay(code) => self.handle_auth_code_relay(header, code),
            CommandBody::AuthResult(result) => self.handle_auth_result(src, result),
        }
    }

    /// Remove a neighbor and everything that depended on it.
    pub(in crate::node) fn remove_neighbor(&mut self, ext: &ExtAddr, reason: &str) {
        if let Some(n) = self.neighbors.remove(ext) {
            self.neighbor_gone(n, reason);
        }
    }

    pub(in crate::node) fn neighbor_gone(&mut self, n: Neighbor, reason: &str) {
        info!(neighbor = %n.ext, sid = %n.sid, state = %n.state, reason, "Neighbor removed");
        self.router.neighbor_removed(&n.ext);
        let failures = self.forwarder.purge_next_hop(&n.ext);
        self.report_failures(failures);
        self.relays.remove(&n.ext);
        if self.joiner.relay == Some(n.ext) {
            self.joiner.reset();
            self.timers.cancel(crate::timer::TimerKind::AuthRetry);
        }
        match n.state {
            NeighborState::Parent => {
                self.detach("parent lost");
                return;
            }
            NeighborState::Child => {
                self.allocator.release_ext(&n.ext);
            }
            _ => {}
        }
        if self.attach.candidate == Some(n.ext) {
            self.candidate_failed(n.ext);
        }
        self.recompute_routes();
    }
}
