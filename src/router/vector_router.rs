//! Link-state routing over router vertices.
//!
//! Every router-capable node describes itself as a [`Vertex`]: its SID,
//! the router neighbors it hears and the cost to each. Vertices are
//! flooded in heartbeats whose period backs off from
//! `heartbeat_base_ms` to `heartbeat_max_ms`, and exchanged in full with
//! new router neighbors through a request / data / ack sync. Routes come
//! from a shortest-path run over the vertex graph; destinations that are
//! not vertices are reached through the nearest vertex above them in the
//! SID tree.
//!
//! ## Payload
//!
//! | TLV       | Value                                                   |
//! |-----------|---------------------------------------------------------|
//! | SYNC_KIND | 0 heartbeat, 1 sync request, 2 sync data, 3 sync ack    |
//! | VERTEX    | sid (2), ext (8), seq (2), rsid (1, 0 = none), edges    |
//!
//! Each edge is a neighbor SID (2) and a cost (2).

use super::{RouteDiff, RouteEntry, RouteTable, RouterMessage, RouterOutput, RoutingContext};
use crate::config::RouterConfig;
use crate::identity::{ExtAddr, Rsid, Sid};
use crate::neighbor::Neighbor;
use crate::network_data::seq_newer;
use crate::protocol::tlv::{tlv_type, TlvReader, TlvWriter};
use crate::protocol::ProtocolError;
use crate::timer::TimerKind;
use std::collections::BTreeMap;
use tracing::{debug, trace};

const VERTEX_FIXED_SIZE: usize = 13;
const EDGE_SIZE: usize = 4;
const MAX_EDGES: usize = (u8::MAX as usize - VERTEX_FIXED_SIZE) / EDGE_SIZE;
/// Sync data stays well inside one reassembled datagram.
const MAX_SYNC_BODY: usize = 1800;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncKind {
    Heartbeat = 0,
    Request = 1,
    Data = 2,
    Ack = 3,
}

impl SyncKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(SyncKind::Heartbeat),
            1 => Some(SyncKind::Request),
            2 => Some(SyncKind::Data),
            3 => Some(SyncKind::Ack),
            _ => None,
        }
    }
}

/// One router in the topology.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vertex {
    pub sid: Sid,
    pub ext: ExtAddr,
    pub seq: u16,
    pub rsid: Option<Rsid>,
    /// `(neighbor sid, cost)`, sorted by SID.
    pub edges: Vec<(Sid, u16)>,
    pub updated_ms: u64,
}

impl Vertex {
    fn encode(&self) -> Vec<u8> {
        let edges = &self.edges[..self.edges.len().min(MAX_EDGES)];
        let mut buf = Vec::with_capacity(VERTEX_FIXED_SIZE + edges.len() * EDGE_SIZE);
        buf.extend_from_slice(&self.sid.as_u16().to_be_bytes());
        buf.extend_from_slice(self.ext.as_bytes());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.push(self.rsid.map(|r| r.as_u8()).unwrap_or(0));
        for (sid, cost) in edges {
            buf.extend_from_slice(&sid.as_u16().to_be_bytes());
            buf.extend_from_slice(&cost.to_be_bytes());
        }
        buf
    }

    fn decode(data: &[u8], now_ms: u64) -> Result<Self, ProtocolError> {
        if data.len() < VERTEX_FIXED_SIZE || (data.len() - VERTEX_FIXED_SIZE) % EDGE_SIZE != 0 {
            return Err(ProtocolError::Malformed(format!("vertex length {}", data.len())));
        }
        let sid = Sid::new(u16::from_be_bytes([data[0], data[1]]));
        let ext = ExtAddr::from_slice(&data[2..10])
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let seq = u16::from_be_bytes([data[10], data[11]]);
        let rsid = match data[12] {
            0 => None,
            r => Some(Rsid::new(r)),
        };
        let edges = data[VERTEX_FIXED_SIZE..]
            .chunks_exact(EDGE_SIZE)
            .map(|c| {
                (
                    Sid::new(u16::from_be_bytes([c[0], c[1]])),
                    u16::from_be_bytes([c[2], c[3]]),
                )
            })
            .collect();
        Ok(Self {
            sid,
            ext,
            seq,
            rsid,
            edges,
            updated_ms: now_ms,
        })
    }
}

/// Encode a routing payload.
pub fn encode_body(kind: SyncKind, vertices: &[&Vertex]) -> Vec<u8> {
    let mut w = TlvWriter::new();
    w.put_u8(tlv_type::SYNC_KIND, kind as u8);
    for v in vertices {
        w.put(tlv_type::VERTEX, &v.encode());
    }
    w.finish()
}

/// Decode a routing payload.
pub fn decode_body(body: &[u8], now_ms: u64) -> Result<(SyncKind, Vec<Vertex>), ProtocolError> {
    let tlvs = TlvReader::parse(body)?;
    let raw = tlvs.require_u8(tlv_type::SYNC_KIND)?;
    let kind = SyncKind::from_byte(raw)
        .ok_or_else(|| ProtocolError::Malformed(format!("sync kind {}", raw)))?;
    let vertices = tlvs
        .get_all(tlv_type::VERTEX)
        .map(|v| Vertex::decode(v, now_ms))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((kind, vertices))
}

/// Edge cost derived from a neighbor's link cost.
pub fn edge_cost(link_cost: u16) -> u16 {
    (link_cost >> 4).max(1)
}

#[derive(Debug)]
pub struct VectorRouter {
    config: RouterConfig,
    table: RouteTable,
    vertices: BTreeMap<Sid, Vertex>,
    own_sid: Option<Sid>,
    own_seq: u16,
    heartbeat_ms: u64,
    running: bool,
    /// Sync requests awaiting data, with attempts made.
    pending_syncs: BTreeMap<ExtAddr, u32>,
    outbox: RouterOutput,
}

impl VectorRouter {
    pub fn new(config: RouterConfig) -> Self {
        let heartbeat_ms = config.heartbeat_base_ms;
        Self {
            config,
            table: RouteTable::default(),
            vertices: BTreeMap::new(),
            own_sid: None,
            own_seq: 0,
            heartbeat_ms,
            running: false,
            pending_syncs: BTreeMap::new(),
            outbox: RouterOutput::default(),
        }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    pub fn vertex(&self, sid: Sid) -> Option<&Vertex> {
        self.vertices.get(&sid)
    }

    pub fn heartbeat_interval_ms(&self) -> u64 {
        self.heartbeat_ms
    }

    pub fn take_output(&mut self) -> RouterOutput {
        std::mem::take(&mut self.outbox)
    }

    pub fn reset(&mut self) {
        self.table.clear();
        self.vertices.clear();
        self.pending_syncs.clear();
        self.own_sid = None;
        self.running = false;
        self.heartbeat_ms = self.config.heartbeat_base_ms;
        self.outbox = RouterOutput::default();
    }

    pub fn start(&mut self, ctx: &RoutingContext<'_>) {
        self.running = true;
        self.heartbeat_ms = self.config.heartbeat_base_ms;
        self.refresh_local(ctx);
        self.flood_own();
        self.outbox
            .timers
            .push((TimerKind::Heartbeat, ctx.now_ms + self.heartbeat_ms));
        let routers: Vec<ExtAddr> = ctx
            .network_neighbors()
            .filter(|n| n.is_router())
            .map(|n| n.ext)
            .collect();
        for ext in routers {
            self.request_sync(ext, ctx.now_ms);
        }
    }

    pub fn neighbor_added(&mut self, neighbor: &Neighbor, ctx: &RoutingContext<'_>) {
        if !self.running || !neighbor.is_router() || neighbor.netid != ctx.netid {
            return;
        }
        self.request_sync(neighbor.ext, ctx.now_ms);
        if self.refresh_local(ctx) {
            self.flood_own();
        }
    }

    pub fn neighbor_removed(&mut self, ext: &ExtAddr) {
        self.table.remove_next_hop(ext);
        self.pending_syncs.remove(ext);
    }

    fn request_sync(&mut self, ext: ExtAddr, now_ms: u64) {
        if self.pending_syncs.contains_key(&ext) {
            return;
        }
        self.pending_syncs.insert(ext, 1);
        self.outbox
            .messages
            .push(RouterMessage::Unicast(ext, encode_body(SyncKind::Request, &[])));
        self.outbox
            .timers
            .push((TimerKind::RouterSync, now_ms + self.config.sync_retry_interval_ms));
    }

    fn flood_own(&mut self) {
        let Some(own) = self.own_sid.and_then(|sid| self.vertices.get(&sid)) else {
            return;
        };
        let body = encode_body(SyncKind::Heartbeat, &[own]);
        self.outbox.messages.push(RouterMessage::Broadcast(body));
    }

    /// Rebuild the local vertex; true when it changed.
    fn refresh_local(&mut self, ctx: &RoutingContext<'_>) -> bool {
        if self.own_sid.is_some_and(|sid| sid != ctx.own_sid) || !ctx.is_router {
            if let Some(old) = self.own_sid.take() {
                self.vertices.remove(&old);
            }
        }
        if !ctx.is_router || !ctx.own_sid.is_structured() {
            return false;
        }

        let mut edges: Vec<(Sid, u16)> = ctx
            .network_neighbors()
            .filter(|n| n.is_router())
            .map(|n| (n.sid, edge_cost(n.link_cost)))
            .collect();
        edges.sort();
        edges.truncate(MAX_EDGES);

        if let Some(own) = self.vertices.get_mut(&ctx.own_sid)
            && own.ext == ctx.own_ext
        {
            own.updated_ms = ctx.now_ms;
            if own.edges == edges && own.rsid == ctx.rsid {
                return false;
            }
        }
        self.own_seq = self.own_seq.wrapping_add(1);
        self.vertices.retain(|_, v| v.ext != ctx.own_ext);
        self.vertices.insert(
            ctx.own_sid,
            Vertex {
                sid: ctx.own_sid,
                ext: ctx.own_ext,
                seq: self.own_seq,
                rsid: ctx.rsid,
                edges,
                updated_ms: ctx.now_ms,
            },
        );
        self.own_sid = Some(ctx.own_sid);
        self.heartbeat_ms = self.config.heartbeat_base_ms;
        self.outbox.topology_changed = true;
        true
    }

    /// Store a received vertex; true when it replaced older state.
    fn merge(&mut self, vertex: Vertex, ctx: &RoutingContext<'_>) -> bool {
        if !vertex.sid.is_structured() || vertex.ext == ctx.own_ext || vertex.sid == ctx.own_sid {
            return false;
        }
        match self.vertices.get(&vertex.sid) {
            Some(old) if !seq_newer(vertex.seq, old.seq) => return false,
            None if self.vertices.len() >= self.config.max_vertices => {
                debug!(sid = %vertex.sid, "Vertex table full, ignoring vertex");
                return false;
            }
            _ => {}
        }
        self.vertices
            .retain(|sid, v| v.ext != vertex.ext || *sid == vertex.sid);
        trace!(sid = %vertex.sid, seq = vertex.seq, edges = vertex.edges.len(), "Vertex updated");
        self.vertices.insert(vertex.sid, vertex);
        true
    }

    pub fn handle_routing_info(&mut self, from: &ExtAddr, body: &[u8], ctx: &RoutingContext<'_>) {
        let (kind, vertices) = match decode_body(body, ctx.now_ms) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(from = %from, error = %e, "Malformed routing info");
                return;
            }
        };
        match kind {
            SyncKind::Heartbeat | SyncKind::Data => {
                let mut fresh = Vec::new();
                for v in vertices {
                    if self.merge(v.clone(), ctx) {
                        fresh.push(v);
                    }
                }
                if !fresh.is_empty() {
                    self.outbox.topology_changed = true;
                    let refs: Vec<&Vertex> = fresh.iter().collect();
                    self.outbox
                        .messages
                        .push(RouterMessage::Broadcast(encode_body(SyncKind::Heartbeat, &refs)));
                }
                if kind == SyncKind::Data {
                    self.pending_syncs.remove(from);
                    self.outbox
                        .messages
                        .push(RouterMessage::Unicast(*from, encode_body(SyncKind::Ack, &[])));
                }
            }
            SyncKind::Request => {
                self.refresh_local(ctx);
                let mut budget = MAX_SYNC_BODY;
                let all: Vec<&Vertex> = self
                    .vertices
                    .values()
                    .take_while(|v| {
                        let size = 2 + VERTEX_FIXED_SIZE + v.edges.len().min(MAX_EDGES) * EDGE_SIZE;
                        budget = budget.saturating_sub(size);
                        budget > 0
                    })
                    .collect();
                let body = encode_body(SyncKind::Data, &all);
                self.outbox.messages.push(RouterMessage::Unicast(*from, body));
            }
            SyncKind::Ack => {
                debug!(from = %from, "Topology sync acknowledged");
            }
        }
    }

    pub fn on_timer(&mut self, kind: TimerKind, ctx: &RoutingContext<'_>) {
        if !self.running {
            return;
        }
        match kind {
            TimerKind::Heartbeat => {
                self.expire_vertices(ctx.now_ms);
                self.refresh_local(ctx);
                self.flood_own();
                self.heartbeat_ms = (self.heartbeat_ms * 2).min(self.config.heartbeat_max_ms);
                self.outbox
                    .timers
                    .push((TimerKind::Heartbeat, ctx.now_ms + self.heartbeat_ms));
            }
            TimerKind::RouterSync => {
                let limit = self.config.sync_retry_times;
                self.pending_syncs.retain(|ext, attempts| {
                    let keep = *attempts <= limit;
                    if !keep {
                        debug!(neighbor = %ext, "Topology sync gave up");
                    }
                    keep
                });
                let retry: Vec<ExtAddr> = self.pending_syncs.keys().copied().collect();
                for ext in &retry {
                    if let Some(attempts) = self.pending_syncs.get_mut(ext) {
                        *attempts += 1;
                    }
                    self.outbox
                        .messages
                        .push(RouterMessage::Unicast(*ext, encode_body(SyncKind::Request, &[])));
                }
                if !retry.is_empty() {
                    self.outbox.timers.push((
                        TimerKind::RouterSync,
                        ctx.now_ms + self.config.sync_retry_interval_ms,
                    ));
                }
            }
            _ => {}
        }
    }

    fn expire_vertices(&mut self, now_ms: u64) {
        let lifetime =
            self.config.heartbeat_max_ms * self.config.vertex_timeout_heartbeats as u64;
        let own = self.own_sid;
        let before = self.vertices.len();
        self.vertices.retain(|sid, v| {
            Some(*sid) == own || now_ms.saturating_sub(v.updated_ms) < lifetime
        });
        if self.vertices.len() != before {
            debug!(expired = before - self.vertices.len(), "Vertices expired");
            self.outbox.topology_changed = true;
        }
    }

    /// RSID of the zone `sid` belongs to: its own, or the nearest vertex above it.
    fn zone_of(&self, sid: Sid, ctx: &RoutingContext<'_>) -> Option<Rsid> {
        let mut cursor = Some(sid);
        while let Some(s) = cursor {
            if s == ctx.own_sid && ctx.rsid.is_some() {
                return ctx.rsid;
            }
            if let Some(rsid) = self.vertices.get(&s).and_then(|v| v.rsid) {
                return Some(rsid);
            }
            cursor = s.parent();
        }
        None
    }

    pub fn compute_routes(&mut self, ctx: &RoutingContext<'_>) -> RouteDiff {
        if !ctx.own_sid.is_unique() {
            return self.table.replace(Vec::new());
        }

        if self.refresh_local(ctx) {
            self.flood_own();
        }
        self.outbox.topology_changed = false;

        let root = ctx.own_sid;
        // Candidate key: (distance, first-hop link cost, first-hop sid, vertex).
        let mut candidates: BTreeMap<(u32, u16, Sid, Sid), ExtAddr> = BTreeMap::new();
        let mut settled: BTreeMap<Sid, (u32, Sid, ExtAddr)> = BTreeMap::new();

        for n in ctx.network_neighbors().filter(|n| n.is_router()) {
            let dist = edge_cost(n.link_cost) as u32;
            candidates.insert((dist, n.link_cost, n.sid, n.sid), n.ext);
        }

        while let Some(((dist, fh_cost, fh_sid, v), fh_ext)) = candidates.pop_first() {
            if v == root || settled.contains_key(&v) {
                continue;
            }
            settled.insert(v, (dist, fh_sid, fh_ext));
            if settled.len() >= self.config.max_vertices {
                break;
            }
            let Some(vertex) = self.vertices.get(&v) else {
                continue;
            };
            for &(w, cost) in &vertex.edges {
                if w == root || settled.contains_key(&w) {
                    continue;
                }
                let mutual = self
                    .vertices
                    .get(&w)
                    .is_some_and(|wv| wv.edges.iter().any(|(x, _)| *x == v));
                if !mutual {
                    continue;
                }
                candidates.insert((dist.saturating_add(cost as u32), fh_cost, fh_sid, w), fh_ext);
            }
        }

        let mut routes = Vec::new();
        for n in ctx.network_neighbors() {
            routes.push(RouteEntry {
                dest: n.sid,
                prefix_len: 16,
                next_hop: n.sid,
                next_hop_ext: n.ext,
                cost: edge_cost(n.link_cost),
                zone: self.zone_of(n.sid, ctx),
            });
        }
        for (&v, &(dist, fh_sid, fh_ext)) in &settled {
            let host = RouteEntry {
                dest: v,
                prefix_len: 16,
                next_hop: fh_sid,
                next_hop_ext: fh_ext,
                cost: dist.min(u16::MAX as u32) as u16,
                zone: self.zone_of(v, ctx),
            };
            routes.push(host);
            if self.vertices.contains_key(&v) && v.child_shift().is_some() {
                routes.push(RouteEntry {
                    prefix_len: v.subtree_prefix_len(),
                    ..host
                });
            }
        }
        self.table.replace(routes)
    }
}
