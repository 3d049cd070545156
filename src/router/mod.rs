//! Route computation.
//!
//! Two strategies share one route table and one lookup path: the flat
//! [`SidRouter`] derives routes from the SID tree alone, the
//! [`VectorRouter`] floods router vertices and runs shortest-path over
//! them. The strategy is picked when the node is built.

mod sid_router;
mod vector_router;

pub use sid_router::SidRouter;
pub use vector_router::{SyncKind, Vertex, VectorRouter};

use crate::config::{RouterConfig, RouterKind};
use crate::identity::{ExtAddr, MeshNetId, Rsid, Sid};
use crate::neighbor::{Neighbor, NeighborTable};
use crate::protocol::RouterId;
use crate::timer::TimerKind;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// One forwarding entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    pub dest: Sid,
    /// Leading SID bits matched; 16 for a host route, 0 for the default route.
    pub prefix_len: u8,
    pub next_hop: Sid,
    pub next_hop_ext: ExtAddr,
    pub cost: u16,
    /// RSID of the zone the destination sits in.
    pub zone: Option<Rsid>,
}

impl RouteEntry {
    fn mask(&self) -> u16 {
        match self.prefix_len {
            0 => 0,
            len if len >= 16 => 0xffff,
            len => !0u16 << (16 - len as u32),
        }
    }

    pub fn matches(&self, dest: Sid) -> bool {
        let mask = self.mask();
        dest.as_u16() & mask == self.dest.as_u16() & mask
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} via {} cost {}",
            self.dest, self.prefix_len, self.next_hop, self.cost
        )
    }
}

/// Changes produced by one recomputation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteDiff {
    pub added: Vec<RouteEntry>,
    pub changed: Vec<RouteEntry>,
    pub removed: Vec<RouteEntry>,
}

impl RouteDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Route table keyed by `(dest, prefix_len)`.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    entries: BTreeMap<(Sid, u8), RouteEntry>,
}

impl RouteTable {
    /// Replace the whole table, returning what changed.
    pub fn replace(&mut self, routes: Vec<RouteEntry>) -> RouteDiff {
        let mut next = BTreeMap::new();
        for route in routes {
            let key = (route.dest, route.prefix_len);
            match next.get(&key) {
                Some(existing) if route_order(existing, &route).is_le() => {}
                _ => {
                    next.insert(key, route);
                }
            }
        }

        let mut diff = RouteDiff::default();
        for (key, route) in &next {
            match self.entries.get(key) {
                None => diff.added.push(*route),
                Some(old) if old != route => diff.changed.push(*route),
                Some(_) => {}
            }
        }
        for (key, route) in &self.entries {
            if !next.contains_key(key) {
                diff.removed.push(*route);
            }
        }
        self.entries = next;
        diff
    }

    /// Longest-prefix match, lowest cost among equals.
    pub fn lookup(&self, dest: Sid) -> Option<&RouteEntry> {
        self.entries
            .values()
            .filter(|r| r.matches(dest))
            .min_by(|a, b| b.prefix_len.cmp(&a.prefix_len).then(route_order(a, b)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop every route through `next_hop`.
    pub fn remove_next_hop(&mut self, next_hop: &ExtAddr) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, r| r.next_hop_ext != *next_hop);
        before - self.entries.len()
    }
}

/// Equal-prefix preference: cost, then next-hop SID.
fn route_order(a: &RouteEntry, b: &RouteEntry) -> std::cmp::Ordering {
    a.cost.cmp(&b.cost).then(a.next_hop.cmp(&b.next_hop))
}

/// Local view a recomputation runs against.
pub struct RoutingContext<'a> {
    pub own_ext: ExtAddr,
    pub own_sid: Sid,
    pub netid: MeshNetId,
    pub rsid: Option<Rsid>,
    /// Router, super router or leader.
    pub is_router: bool,
    pub neighbors: &'a NeighborTable,
    pub now_ms: u64,
}

impl RoutingContext<'_> {
    /// Neighbors in our network holding a unique SID.
    pub fn network_neighbors(&self) -> impl Iterator<Item = &Neighbor> {
        let netid = self.netid;
        self.neighbors
            .iter()
            .filter(move |n| n.netid == netid && n.sid.is_unique())
    }

    /// Re-check a route's next hop against the neighbor table.
    pub fn resolve(&self, next_hop: Sid, next_hop_ext: &ExtAddr) -> Option<&Neighbor> {
        self.neighbors
            .get(next_hop_ext)
            .filter(|n| n.netid == self.netid && n.sid == next_hop)
    }
}

/// Routing payload to put on the air.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouterMessage {
    Broadcast(Vec<u8>),
    Unicast(ExtAddr, Vec<u8>),
}

/// Side effects a router asks the node to carry out.
#[derive(Debug, Default)]
pub struct RouterOutput {
    pub messages: Vec<RouterMessage>,
    pub timers: Vec<(TimerKind, u64)>,
    /// Topology changed; routes should be recomputed.
    pub topology_changed: bool,
}

/// The routing strategy in use.
#[derive(Debug)]
pub enum Router {
    Sid(SidRouter),
    Vector(VectorRouter),
}

impl Router {
    pub fn new(config: &RouterConfig) -> Self {
        match config.kind {
            RouterKind::Sid => Router::Sid(SidRouter::new()),
            RouterKind::Vector => Router::Vector(VectorRouter::new(config.clone())),
        }
    }

    pub fn id(&self) -> RouterId {
        match self {
            Router::Sid(_) => RouterId::SidRouter,
            Router::Vector(_) => RouterId::VectorRouter,
        }
    }

    pub fn table(&self) -> &RouteTable {
        match self {
            Router::Sid(r) => r.table(),
            Router::Vector(r) => r.table(),
        }
    }

    /// Rebuild the route table from the current neighbors and topology.
    pub fn compute_routes(&mut self, ctx: &RoutingContext<'_>) -> RouteDiff {
        let diff = match self {
            Router::Sid(r) => r.compute_routes(ctx),
            Router::Vector(r) => r.compute_routes(ctx),
        };
        if !diff.is_empty() {
            debug!(
                router = %self.id(),
                added = diff.added.len(),
                changed = diff.changed.len(),
                removed = diff.removed.len(),
                routes = self.table().len(),
                "Routes recomputed"
            );
        }
        diff
    }

    /// Next hop toward `dest`, always a live neighbor in our network.
    pub fn next_hop<'a>(&self, dest: Sid, ctx: &'a RoutingContext<'_>) -> Option<&'a Neighbor> {
        if let Some(n) = ctx.network_neighbors().find(|n| n.sid == dest) {
            return Some(n);
        }
        let route = self.table().lookup(dest)?;
        ctx.resolve(route.next_hop, &route.next_hop_ext)
    }

    /// Forget all routing state.
    pub fn reset(&mut self) {
        match self {
            Router::Sid(r) => r.reset(),
            Router::Vector(r) => r.reset(),
        }
    }

    /// Drop routes through a neighbor that just went away.
    pub fn neighbor_removed(&mut self, ext: &ExtAddr) {
        match self {
            Router::Sid(r) => r.neighbor_removed(ext),
            Router::Vector(r) => r.neighbor_removed(ext),
        }
    }

    /// Start router-specific activity after attaching.
    pub fn start(&mut self, ctx: &RoutingContext<'_>) {
        if let Router::Vector(r) = self {
            r.start(ctx);
        }
    }

    /// A router neighbor appeared in our network.
    pub fn neighbor_added(&mut self, neighbor: &Neighbor, ctx: &RoutingContext<'_>) {
        if let Router::Vector(r) = self {
            r.neighbor_added(neighbor, ctx);
        }
    }

    /// Routing info received from a neighbor.
    pub fn handle_routing_info(&mut self, from: &ExtAddr, body: &[u8], ctx: &RoutingContext<'_>) {
        if let Router::Vector(r) = self {
            r.handle_routing_info(from, body, ctx);
        }
    }

    pub fn on_timer(&mut self, kind: TimerKind, ctx: &RoutingContext<'_>) {
        if let Router::Vector(r) = self {
            r.on_timer(kind, ctx);
        }
    }

    /// Drain messages and timers queued by the calls above.
    pub fn take_output(&mut self) -> RouterOutput {
        match self {
            Router::Sid(_) => RouterOutput::default(),
            Router::Vector(r) => r.take_output(),
        }
    }
}

#[cfg(test)]
mod tests;
