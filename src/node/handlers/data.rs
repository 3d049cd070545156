//! Outbound path: command and datagram origination, next-hop
//! resolution, forwarding and multicast replication.

use crate::forwarder::{
    fragment, DatagramRef, DeliveryFailure, Destination, ForwardError, FragmentOrigin, Outbound,
    Reassembly,
};
use crate::identity::{ExtAddr, Sid};
use crate::lowpower::RadioState;
use crate::neighbor::NeighborState;
use crate::node::MeshNode;
use crate::protocol::{
    AddressError, Command, CommandBody, FrameKind, McastInfo, McastScope, MeshFrame, MeshHeader,
    MAX_DATAGRAM_SIZE,
};
use crate::timer::TimerKind;
use tracing::{debug, trace};

/// Where a management command goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(in crate::node) enum CommandDest {
    /// Every neighbor in radio range.
    Broadcast,
    /// One link neighbor, addressed by extended address.
    Neighbor(ExtAddr),
    /// A node in our network, routed hop by hop.
    Sid(Sid),
}

impl MeshNode {
    // ========================================================================
    // Origination
    // ========================================================================

    /// Encode and queue a management command.
    pub(in crate::node) fn send_command(&mut self, dest: CommandDest, body: CommandBody) {
        self.cmd_seq = self.cmd_seq.wrapping_add(1);
        let command = Command::new(self.cmd_seq, body);
        let cmd_type = command.command_type();
        let payload = command.encode();

        let mut header = MeshHeader::new(
            FrameKind::Command,
            self.netid,
            self.sid,
            Sid::BCAST,
            self.config.forwarder.hop_limit,
        );
        if !self.sid.is_unique() {
            header.src_ext = Some(self.ext);
        }
        let next_hop = match dest {
            CommandDest::Broadcast => ExtAddr::BROADCAST,
            CommandDest::Neighbor(ext) => {
                header.dest_ext = Some(ext);
                header.dest = self.neighbors.get(&ext).map_or(Sid::INVALID, |n| n.sid);
                ext
            }
            CommandDest::Sid(sid) => {
                header.dest = sid;
                header.src_ext = Some(self.ext);
                match self.resolve_next_hop(&header) {
                    Some(ext) => ext,
                    None => {
                        debug!(cmd = %cmd_type, dest = %sid, "No route for command");
                        self.forwarder.stats_mut().dropped += 1;
                        return;
                    }
                }
            }
        };

        trace!(cmd = %cmd_type, next_hop = %next_hop, dest = %header.dest, "Sending command");
        if let Err(e) = self.send_via(next_hop, header, &payload, None) {
            debug!(cmd = %cmd_type, error = %e, "Command not sent");
        }
    }

    /// Fragment, secure and queue `payload` toward one next hop.
    fn send_via(
        &mut self,
        next_hop: ExtAddr,
        header: MeshHeader,
        payload: &[u8],
        datagram: Option<DatagramRef>,
    ) -> Result<(), ForwardError> {
        let mtu = if next_hop.is_broadcast() {
            self.hal.bcast_mtu()
        } else {
            self.hal.ucast_mtu()
        };
        let tag = self.forwarder.next_tag();
        let frames = fragment(&header, payload, mtu, self.security.overhead(), tag)?;
        for mut frame in frames {
            self.security.secure(&mut frame);
            self.enqueue_frame(next_hop, frame.encode(), header.kind, datagram);
        }
        Ok(())
    }

    /// Queue an encoded frame, holding it back for a sleeping child.
    ///
    /// Only attached children duty-cycle; a sleepy joiner keeps its radio
    /// on until it has a parent to poll.
    fn enqueue_frame(
        &mut self,
        next_hop: ExtAddr,
        bytes: Vec<u8>,
        kind: FrameKind,
        datagram: Option<DatagramRef>,
    ) {
        let now = self.now_ms;
        if let Some(n) = self.neighbors.get_mut(&next_hop)
            && n.state == NeighborState::Child
            && !n.is_awake(now)
        {
            let capacity = self.config.limits.sleepy_buffer;
            if capacity == 0 {
                self.forwarder.stats_mut().dropped += 1;
                return;
            }
            if n.buffer.len() >= capacity {
                n.buffer.pop_front();
                self.forwarder.stats_mut().dropped += 1;
            }
            trace!(neighbor = %next_hop, buffered = n.buffer.len() + 1, "Holding frame for sleepy neighbor");
            n.buffer.push_back(bytes);
            return;
        }
        let out = Outbound::new(next_hop, bytes, kind, now).with_datagram(datagram);
        let failures = self.forwarder.enqueue(out);
        self.report_failures(failures);
    }

    /// Move frames held for a neighbor that just woke into the link queue.
    pub(in crate::node) fn release_buffered(&mut self, ext: &ExtAddr) {
        let Some(n) = self.neighbors.get_mut(ext) else {
            return;
        };
        let held = std::mem::take(&mut n.buffer);
        if held.is_empty() {
            return;
        }
        debug!(neighbor = %ext, frames = held.len(), "Releasing buffered frames");
        let now = self.now_ms;
        for bytes in held {
            let kind = MeshHeader::decode(&bytes).map_or(FrameKind::Data, |(h, _)| h.kind);
            let failures = self.forwarder.enqueue(Outbound::new(*ext, bytes, kind, now));
            self.report_failures(failures);
        }
    }

    pub(in crate::node) fn report_failures(&mut self, failures: Vec<(Destination, DeliveryFailure)>) {
        for (dest, reason) in failures {
            debug!(dest = %dest, reason = %reason, "Datagram not delivered");
            self.ip.delivery_failed(dest, reason);
        }
    }

    /// Hand queued frames to the radio.
    pub(in crate::node) fn flush_outbound(&mut self) {
        if self.lowpower.state() == RadioState::Asleep || self.forwarder.queued() == 0 {
            return;
        }
        let report = self.forwarder.flush(self.hal.as_mut(), self.now_ms);
        self.report_failures(report.failures);
        if let Some(at) = report.retry_at_ms {
            self.timers.schedule(TimerKind::SendRetry, at);
        }
    }

    // ========================================================================
    // Next Hop
    // ========================================================================

    /// Link neighbor a frame with `header` should go to next.
    pub(in crate::node) fn resolve_next_hop(&self, header: &MeshHeader) -> Option<ExtAddr> {
        if let Some(ext) = header.dest_ext {
            return self.neighbors.contains(&ext).then_some(ext);
        }
        if !header.dest.is_unique() || !self.device_state.is_attached() {
            return None;
        }
        if header.dest.is_mobile()
            && let Some(n) = self.neighbors.find_by_sid(self.netid, header.dest)
        {
            return Some(n.ext);
        }
        self.next_hop(header.dest)
    }

    /// Unicast to a slot in our own subtree that nobody holds.
    fn stale_destination(&self, dest: Sid) -> bool {
        if self.allocator.base() != Some(self.sid)
            || dest == self.sid
            || !dest.is_structured()
            || !self.sid.covers(dest)
        {
            return false;
        }
        let mut slot = dest;
        while !slot.is_direct_child_of(self.sid) {
            match slot.parent() {
                Some(parent) => slot = parent,
                None => return false,
            }
        }
        !self.allocator.contains(slot)
    }

    // ========================================================================
    // Datagrams
    // ========================================================================

    pub(in crate::node) fn handle_send_down(&mut self, dest: Destination, datagram: Vec<u8>) {
        let reference = self.forwarder.next_datagram(dest);
        let result = if datagram.len() > MAX_DATAGRAM_SIZE {
            Err(DeliveryFailure::TooLarge)
        } else {
            match dest {
                Destination::Sid(sid) => self.send_datagram_to_sid(sid, datagram, reference),
                Destination::Ext(ext) => self.send_datagram_to_ext(ext, datagram, reference),
                Destination::Multicast(scope) => {
                    self.originate_multicast(scope, &datagram, reference)
                }
            }
        };
        if let Err(reason) = result {
            debug!(dest = %dest, reason = %reason, "Datagram refused");
            self.forwarder.stats_mut().dropped += 1;
            self.ip.delivery_failed(dest, reason);
        }
    }

    fn send_datagram_to_sid(
        &mut self,
        sid: Sid,
        datagram: Vec<u8>,
        reference: DatagramRef,
    ) -> Result<(), DeliveryFailure> {
        if !self.device_state.is_attached() {
            return Err(DeliveryFailure::Detached);
        }
        if sid == self.sid {
            self.ip.forward_up(self.sid, datagram);
            return Ok(());
        }
        if !sid.is_unique() {
            return Err(DeliveryFailure::NoRoute);
        }
        let header = MeshHeader::new(
            FrameKind::Data,
            self.netid,
            self.sid,
            sid,
            self.config.forwarder.hop_limit,
        );
        let next_hop = self.resolve_next_hop(&header).ok_or(DeliveryFailure::NoRoute)?;
        self.send_via(next_hop, header, &datagram, Some(reference))
            .map_err(|_| DeliveryFailure::TooLarge)
    }

    fn send_datagram_to_ext(
        &mut self,
        ext: ExtAddr,
        datagram: Vec<u8>,
        reference: DatagramRef,
    ) -> Result<(), DeliveryFailure> {
        if ext == self.ext {
            self.ip.forward_up(self.sid, datagram);
            return Ok(());
        }
        let mut header = MeshHeader::new(
            FrameKind::Data,
            self.netid,
            self.sid,
            Sid::INVALID,
            self.config.forwarder.hop_limit,
        );
        header.dest_ext = Some(ext);
        if let Some(n) = self.neighbors.get(&ext) {
            header.dest = n.sid;
        }
        if !self.sid.is_unique() {
            header.src_ext = Some(self.ext);
        }
        let next_hop = self.resolve_next_hop(&header).ok_or(DeliveryFailure::NoRoute)?;
        self.send_via(next_hop, header, &datagram, Some(reference))
            .map_err(|_| DeliveryFailure::TooLarge)
    }

    // ========================================================================
    // Forwarding
    // ========================================================================

    /// Store-and-forward a frame addressed to someone else.
    pub(in crate::node) fn forward_frame(&mut self, src: ExtAddr, mut frame: MeshFrame) {
        if frame.header.dest_ext.is_none() && !self.device_state.is_attached() {
            trace!(src = %src, dest = %frame.header.dest, "Detached, not forwarding");
            self.forwarder.stats_mut().dropped += 1;
            return;
        }
        let hops_left = frame.header.hops_left.saturating_sub(1);
        if hops_left == 0 {
            trace!(src = %frame.header.src, dest = %frame.header.dest, "Hop limit reached");
            self.forwarder.stats_mut().dropped += 1;
            return;
        }
        frame.header.hops_left = hops_left;

        if frame.header.dest_ext.is_none() && self.stale_destination(frame.header.dest) {
            let dest = frame.header.dest;
            let origin = frame.header.src;
            debug!(dest = %dest, origin = %origin, "Unicast to unallocated SID");
            self.forwarder.stats_mut().dropped += 1;
            if origin.is_unique() {
                let body = CommandBody::AddressError(AddressError {
                    sid: dest,
                    target: None,
                });
                self.send_command(CommandDest::Sid(origin), body);
            }
            return;
        }

        let Some(next_hop) = self.resolve_next_hop(&frame.header) else {
            debug!(dest = %frame.header.dest, "No route, frame dropped");
            self.forwarder.stats_mut().dropped += 1;
            return;
        };
        if next_hop == src {
            debug!(dest = %frame.header.dest, via = %src, "Route points back at sender, frame dropped");
            self.forwarder.stats_mut().dropped += 1;
            return;
        }

        frame.header.key_epoch = None;
        frame.mic = None;
        self.security.secure(&mut frame);
        trace!(dest = %frame.header.dest, next_hop = %next_hop, hops_left, "Forwarding frame");
        let kind = frame.header.kind;
        self.enqueue_frame(next_hop, frame.encode(), kind, None);
    }

    // ========================================================================
    // Multicast
    // ========================================================================

    /// Neighbors a multicast copy goes to: every child, plus the parent
    /// for mesh scope, never the neighbor it came from.
    fn multicast_targets(&self, scope: McastScope, from: Option<ExtAddr>) -> Vec<ExtAddr> {
        self.neighbors
            .iter()
            .filter(|n| n.netid == self.netid && n.sid.is_unique())
            .filter(|n| match n.state {
                NeighborState::Child => true,
                NeighborState::Parent => scope == McastScope::Mesh,
                _ => false,
            })
            .map(|n| n.ext)
            .filter(|ext| Some(*ext) != from)
            .collect()
    }

    fn originate_multicast(
        &mut self,
        scope: McastScope,
        datagram: &[u8],
        reference: DatagramRef,
    ) -> Result<(), DeliveryFailure> {
        if !self.device_state.is_attached() {
            return Err(DeliveryFailure::Detached);
        }
        let mut header = MeshHeader::new(
            FrameKind::Data,
            self.netid,
            self.sid,
            Sid::BCAST,
            self.config.forwarder.hop_limit,
        );
        let seq = self.forwarder.next_mcast_seq();
        header.mcast = Some(McastInfo { scope, seq });

        let targets = self.multicast_targets(scope, None);
        trace!(scope = ?scope, seq, copies = targets.len(), "Originating multicast");
        for target in targets {
            self.send_via(target, header.clone(), datagram, Some(reference))
                .map_err(|_| DeliveryFailure::TooLarge)?;
        }
        Ok(())
    }

    /// A multicast copy arrived: deliver it locally and pass it on.
    pub(in crate::node) fn handle_multicast(&mut self, src: ExtAddr, frame: MeshFrame, mcast: McastInfo) {
        let header = &frame.header;
        if !self.device_state.is_attached() || header.netid != self.netid {
            self.forwarder.stats_mut().dropped += 1;
            return;
        }
        if header.src == self.sid {
            return;
        }
        let offset = header.frag.map_or(0, |f| f.offset);
        if !self.forwarder.mcast_cache().insert(header.src, mcast.seq, offset) {
            trace!(origin = %header.src, seq = mcast.seq, "Duplicate multicast");
            return;
        }

        let hops_left = header.hops_left.saturating_sub(1);
        if hops_left > 0 {
            let mut copy = frame.clone();
            copy.header.hops_left = hops_left;
            copy.header.key_epoch = None;
            copy.mic = None;
            self.security.secure(&mut copy);
            let bytes = copy.encode();
            for target in self.multicast_targets(mcast.scope, Some(src)) {
                self.enqueue_frame(target, bytes.clone(), FrameKind::Data, None);
            }
        }

        let MeshFrame { header, payload, .. } = frame;
        let Some(frag) = header.frag else {
            self.deliver_local(src, header, payload, None, None);
            return;
        };
        let origin = FragmentOrigin::Sid(header.src);
        let now = self.now_ms;
        match self.forwarder.reassembler().accept(origin, &frag, &payload, now) {
            Reassembly::Complete(datagram) => {
                self.deliver_local(src, header, datagram, None, None)
            }
            Reassembly::Pending => {}
            Reassembly::Dropped(reason) => {
                debug!(origin = %origin, reason = ?reason, "Multicast fragment dropped");
                self.forwarder.stats_mut().dropped += 1;
            }
        }
    }
}
