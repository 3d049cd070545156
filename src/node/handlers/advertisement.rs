//! Router advertisements: sending, and reacting to what neighbors
//! advertise (parent updates, merges, parent switches, collisions).

use super::CommandDest;
use crate::identity::ExtAddr;
use crate::neighbor::NeighborState;
use crate::node::{DeviceState, LeaderPriority, MeshNode};
use crate::protocol::{Advertisement, CommandBody, MeshHeader, SsidInfo};
use crate::timer::TimerKind;
use tracing::{debug, trace, warn};

/// Path cost a neighbor must beat the parent by before we switch to it.
const PATH_COST_SWITCH_HYST: u16 = 256;

impl MeshNode {
    /// Nodes below us: every child plus everything below each child.
    pub(in crate::node) fn subtree_size(&self) -> u16 {
        self.neighbors
            .children()
            .fold(0u16, |acc, c| acc.saturating_add(1).saturating_add(c.ssid.child_num))
    }

    pub(in crate::node) fn send_advertisement(&mut self, to: Option<ExtAddr>) {
        let Some(leader) = self.leader else {
            return;
        };
        let adv = Advertisement {
            net_info: self.network_data.net_info(),
            leader,
            ssid: SsidInfo {
                child_num: self.subtree_size(),
                free_slots: self.allocator.free_slots(),
            },
            path_cost: self.path_cost,
            channel: self.channel,
            ext_netid: self.ext_netid,
            mode: self.mode,
            rsid: self.rsid,
        };
        let dest = to.map_or(CommandDest::Broadcast, CommandDest::Neighbor);
        self.send_command(dest, CommandBody::Advertisement(adv));
    }

    pub(in crate::node) fn on_advertisement_timer(&mut self) {
        if !self.device_state.is_router() {
            return;
        }
        if self.device_state == DeviceState::Leader {
            let size = self.subtree_size().saturating_add(1);
            if self.network_data.set_size(size) {
                debug!(size, version = self.network_data.net_info().version, "Network size changed");
            }
        }
        self.check_super_router();
        self.send_advertisement(None);
        let interval = self.jittered(self.config.timing.advertisement_interval_ms);
        self.timers
            .schedule(TimerKind::Advertisement, self.now_ms + interval);
    }

    pub(in crate::node) fn handle_advertisement(
        &mut self,
        src: ExtAddr,
        header: &MeshHeader,
        adv: Advertisement,
    ) {
        let (state, sid_changed, membership_changed) = {
            let Some(n) = self.neighbors.get_mut(&src) else {
                return;
            };
            let sid_changed = n.sid != header.src;
            let netid_changed = n.netid != header.netid;
            n.flags.sid_changed = sid_changed;
            n.flags.netid_changed = netid_changed;
            n.sid = header.src;
            n.netid = header.netid;
            n.mode = adv.mode;
            n.path_cost = adv.path_cost;
            n.ssid = adv.ssid;
            n.leader = Some(adv.leader);
            n.ext_netid = Some(adv.ext_netid);
            n.net_info = Some(adv.net_info);
            n.rsid = adv.rsid;
            n.channel = adv.channel;
            if n.state == NeighborState::Invalid {
                n.state = NeighborState::Nbr;
            }
            (n.state, sid_changed, sid_changed || netid_changed)
        };
        trace!(src = %src, sid = %header.src, netid = %header.netid, leader = %adv.leader, "Advertisement");

        if adv.ext_netid != self.ext_netid {
            return;
        }
        if !self.device_state.is_attached() {
            self.wake_attach();
            return;
        }
        if header.netid != self.netid {
            if state == NeighborState::Parent {
                self.migrate_to(src, "parent changed network");
            } else {
                self.consider_merge(src, adv.leader);
            }
            return;
        }
        if header.src == self.sid {
            self.resolve_collision(src, &adv);
            return;
        }

        match state {
            NeighborState::Parent => {
                if sid_changed {
                    self.start_sid_renewal(src);
                    return;
                }
                let link_cost = self.neighbors.get(&src).map_or(0, |n| n.link_cost);
                self.path_cost = adv.path_cost.saturating_add(link_cost);
                self.leader = Some(adv.leader);
                self.network_data.accept_net_info(adv.net_info);
            }
            NeighborState::Child => {
                let now = self.now_ms;
                if !self.allocator.refresh(header.src, &src, now) {
                    debug!(child = %src, sid = %header.src, "Child advertises a SID it does not hold");
                    self.allocator.release_ext(&src);
                    if let Some(n) = self.neighbors.get_mut(&src) {
                        n.state = NeighborState::Nbr;
                    }
                }
            }
            _ => {
                self.check_claimed_child(src, header.src);
                self.network_data.accept_net_info(adv.net_info);
                self.consider_parent_switch(src);
            }
        }

        if membership_changed {
            self.neighbor_joined(&src);
        }
    }

    /// Another network with a better leader is in range.
    fn consider_merge(&mut self, src: ExtAddr, theirs: LeaderPriority) {
        let Some(ours) = self.leader else {
            return;
        };
        let order = self.config.leader_policy.address_order;
        let eligible = theirs.beats(&ours, order)
            && self.neighbors.get(&src).is_some_and(|n| self.is_candidate(n));
        let wait = self.config.attach.migrate_wait;
        let Some(n) = self.neighbors.get_mut(&src) else {
            return;
        };
        if !eligible {
            n.migrate_count = 0;
            return;
        }
        n.migrate_count += 1;
        if n.migrate_count >= wait {
            debug!(to = %src, leader = %theirs, ours = %ours, "Merging into better network");
            self.migrate_to(src, "better network");
        }
    }

    /// A neighbor in our network offers a clearly cheaper path to the leader.
    fn consider_parent_switch(&mut self, src: ExtAddr) {
        if self.device_state == DeviceState::Leader {
            return;
        }
        let Some(parent_cost) = self.neighbors.parent().map(|p| p.cost_via()) else {
            return;
        };
        let better = self.neighbors.get(&src).is_some_and(|n| {
            self.is_candidate(n) && n.cost_via().saturating_add(PATH_COST_SWITCH_HYST) < parent_cost
        });
        let wait = self.config.attach.migrate_wait;
        let Some(n) = self.neighbors.get_mut(&src) else {
            return;
        };
        if !better {
            n.migrate_count = 0;
            return;
        }
        n.migrate_count += 1;
        if n.migrate_count >= wait {
            let cost = n.cost_via();
            debug!(to = %src, cost, parent_cost, "Switching to cheaper parent");
            self.migrate_to(src, "better parent");
        }
    }

    /// Two nodes hold our SID; the lower-priority one re-attaches.
    fn resolve_collision(&mut self, src: ExtAddr, adv: &Advertisement) {
        let policy = &self.config.leader_policy;
        let ours = LeaderPriority::new(policy.weight_for(self.mode).unwrap_or(0), self.ext);
        let theirs = LeaderPriority::new(policy.weight_for(adv.mode).unwrap_or(0), src);
        if theirs.beats(&ours, policy.address_order) {
            warn!(sid = %self.sid, holder = %src, "SID collision, re-attaching");
            self.detach("sid collision");
        } else {
            debug!(sid = %self.sid, holder = %src, "SID collision, keeping SID");
        }
    }
}
