//! Flat routing over the structured SID tree.
//!
//! Routes come straight from the tree: a host route per neighbor, a
//! subtree route per router child and a default route through the
//! parent. Nothing is exchanged over the air.

use super::{RouteDiff, RouteEntry, RouteTable, RoutingContext};
use crate::identity::{ExtAddr, Sid};
use crate::neighbor::NeighborState;

#[derive(Debug, Default)]
pub struct SidRouter {
    table: RouteTable,
}

impl SidRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn compute_routes(&mut self, ctx: &RoutingContext<'_>) -> RouteDiff {
        if !ctx.own_sid.is_unique() {
            return self.table.replace(Vec::new());
        }
        let mut routes = Vec::new();
        for n in ctx.network_neighbors() {
            let host = RouteEntry {
                dest: n.sid,
                prefix_len: 16,
                next_hop: n.sid,
                next_hop_ext: n.ext,
                cost: n.link_cost,
                zone: None,
            };
            routes.push(host);

            let below_us = n.state == NeighborState::Child || n.sid.is_direct_child_of(ctx.own_sid);
            if below_us && n.sid.child_shift().is_some() {
                routes.push(RouteEntry {
                    prefix_len: n.sid.subtree_prefix_len(),
                    ..host
                });
            }
            if n.state == NeighborState::Parent {
                routes.push(RouteEntry {
                    dest: Sid::LEADER,
                    prefix_len: 0,
                    ..host
                });
            }
        }
        self.table.replace(routes)
    }

    pub fn neighbor_removed(&mut self, ext: &ExtAddr) {
        self.table.remove_next_hop(ext);
    }

    pub fn reset(&mut self) {
        self.table.clear();
    }
}
