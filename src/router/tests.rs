use super::vector_router::{decode_body, encode_body};
use super::*;
use crate::config::RouterConfig;
use crate::neighbor::NeighborState;

const NET: MeshNetId = MeshNetId::new(0x0042);

fn add_neighbor(table: &mut NeighborTable, ext: u64, sid: u16, state: NeighborState) {
    let n = table
        .get_or_insert(ExtAddr::from_u64(ext), 0, true)
        .expect("table has room");
    n.netid = NET;
    n.sid = Sid::new(sid);
    n.state = state;
}

fn ctx(own: u64, sid: u16, neighbors: &NeighborTable, now_ms: u64) -> RoutingContext<'_> {
    RoutingContext {
        own_ext: ExtAddr::from_u64(own),
        own_sid: Sid::new(sid),
        netid: NET,
        rsid: None,
        is_router: true,
        neighbors,
        now_ms,
    }
}

fn route(dest: u16, prefix_len: u8, next_hop: u16, cost: u16) -> RouteEntry {
    RouteEntry {
        dest: Sid::new(dest),
        prefix_len,
        next_hop: Sid::new(next_hop),
        next_hop_ext: ExtAddr::from_u64(next_hop as u64 + 1),
        cost,
        zone: None,
    }
}

fn vertex(sid: u16, ext: u64, seq: u16, edges: &[u16]) -> Vertex {
    Vertex {
        sid: Sid::new(sid),
        ext: ExtAddr::from_u64(ext),
        seq,
        rsid: None,
        edges: edges.iter().map(|s| (Sid::new(*s), 16)).collect(),
        updated_ms: 0,
    }
}

fn vector_config() -> RouterConfig {
    RouterConfig {
        kind: RouterKind::Vector,
        ..RouterConfig::default()
    }
}

// ===== Route table =====

#[test]
fn test_longest_prefix_wins() {
    let mut table = RouteTable::default();
    table.replace(vec![
        route(0x0000, 0, 0x0000, 10),
        route(0x2000, 4, 0x2000, 10),
        route(0x2100, 16, 0x2000, 50),
    ]);
    assert_eq!(table.lookup(Sid::new(0x2100)).map(|r| r.prefix_len), Some(16));
    assert_eq!(table.lookup(Sid::new(0x2200)).map(|r| r.prefix_len), Some(4));
    assert_eq!(table.lookup(Sid::new(0x3000)).map(|r| r.prefix_len), Some(0));
}

#[test]
fn test_equal_prefix_prefers_lower_cost() {
    let mut table = RouteTable::default();
    table.replace(vec![route(0x3000, 16, 0x2000, 40), route(0x3000, 16, 0x1000, 20)]);
    assert_eq!(table.len(), 1);
    assert_eq!(table.lookup(Sid::new(0x3000)).map(|r| r.next_hop), Some(Sid::new(0x1000)));
}

#[test]
fn test_replace_reports_diff() {
    let mut table = RouteTable::default();
    let first = table.replace(vec![route(0x1000, 16, 0x1000, 1), route(0x2000, 16, 0x2000, 1)]);
    assert_eq!(first.added.len(), 2);

    let second = table.replace(vec![route(0x1000, 16, 0x1000, 5), route(0x3000, 16, 0x3000, 1)]);
    assert_eq!(second.added.len(), 1);
    assert_eq!(second.changed.len(), 1);
    assert_eq!(second.removed.len(), 1);
    assert_eq!(second.removed[0].dest, Sid::new(0x2000));

    let third = table.replace(vec![route(0x1000, 16, 0x1000, 5), route(0x3000, 16, 0x3000, 1)]);
    assert!(third.is_empty());
}

// ===== SID router =====

#[test]
fn test_sid_router_tree_routes() {
    let mut neighbors = NeighborTable::new(8);
    add_neighbor(&mut neighbors, 1, 0x0000, NeighborState::Parent);
    add_neighbor(&mut neighbors, 2, 0x1100, NeighborState::Child);
    add_neighbor(&mut neighbors, 3, 0x1001, NeighborState::Child);

    let mut router = Router::new(&RouterConfig::default());
    let ctx = ctx(10, 0x1000, &neighbors, 0);
    router.compute_routes(&ctx);

    // Below a router child goes through that child.
    let hop = router.next_hop(Sid::new(0x1110), &ctx).map(|n| n.sid);
    assert_eq!(hop, Some(Sid::new(0x1100)));
    // Outside our subtree goes up.
    let hop = router.next_hop(Sid::new(0x2000), &ctx).map(|n| n.sid);
    assert_eq!(hop, Some(Sid::LEADER));
    // Leaf children only get host routes.
    let hop = router.next_hop(Sid::new(0x1001), &ctx).map(|n| n.sid);
    assert_eq!(hop, Some(Sid::new(0x1001)));
    assert!(router.take_output().messages.is_empty());
}

#[test]
fn test_sid_router_without_sid_has_no_routes() {
    let mut neighbors = NeighborTable::new(8);
    add_neighbor(&mut neighbors, 1, 0x0000, NeighborState::Parent);
    let mut router = Router::new(&RouterConfig::default());
    router.compute_routes(&ctx(10, Sid::INVALID.as_u16(), &neighbors, 0));
    assert!(router.table().is_empty());
}

#[test]
fn test_neighbor_removal_drops_routes() {
    let mut neighbors = NeighborTable::new(8);
    add_neighbor(&mut neighbors, 1, 0x0000, NeighborState::Parent);
    add_neighbor(&mut neighbors, 2, 0x1100, NeighborState::Child);
    let mut router = Router::new(&RouterConfig::default());
    router.compute_routes(&ctx(10, 0x1000, &neighbors, 0));

    router.neighbor_removed(&ExtAddr::from_u64(2));
    assert!(router.table().iter().all(|r| r.next_hop_ext != ExtAddr::from_u64(2)));
    neighbors.remove(&ExtAddr::from_u64(2));
    let ctx = ctx(10, 0x1000, &neighbors, 0);
    // Falls back to the default route.
    assert_eq!(router.next_hop(Sid::new(0x1100), &ctx).map(|n| n.sid), Some(Sid::LEADER));
}

// ===== Vector router =====

#[test]
fn test_body_round_trip_keeps_edges() {
    let v = vertex(0x2000, 7, 3, &[0x1000, 0x3000]);
    let body = encode_body(SyncKind::Data, &[&v]);
    let (kind, vertices) = decode_body(&body, 0).unwrap();
    assert_eq!(kind, SyncKind::Data);
    assert_eq!(vertices, vec![v]);
}

#[test]
fn test_spf_tie_breaks_on_first_hop_sid() {
    let mut neighbors = NeighborTable::new(8);
    add_neighbor(&mut neighbors, 2, 0x2000, NeighborState::Nbr);
    add_neighbor(&mut neighbors, 3, 0x3000, NeighborState::Nbr);

    let mut router = Router::new(&vector_config());
    let ctx = ctx(1, 0x1000, &neighbors, 0);
    let heartbeat = encode_body(
        SyncKind::Heartbeat,
        &[
            &vertex(0x2000, 2, 1, &[0x1000, 0x4000]),
            &vertex(0x3000, 3, 1, &[0x1000, 0x4000]),
            &vertex(0x4000, 4, 1, &[0x2000, 0x3000]),
        ],
    );
    router.handle_routing_info(&ExtAddr::from_u64(2), &heartbeat, &ctx);
    router.compute_routes(&ctx);

    let hop = router.next_hop(Sid::new(0x4000), &ctx).map(|n| n.sid);
    assert_eq!(hop, Some(Sid::new(0x2000)));
    // A leaf below a vertex rides the vertex's subtree route.
    let hop = router.next_hop(Sid::new(0x4001), &ctx).map(|n| n.sid);
    assert_eq!(hop, Some(Sid::new(0x2000)));
}

#[test]
fn test_spf_requires_mutual_links() {
    let mut neighbors = NeighborTable::new(8);
    add_neighbor(&mut neighbors, 2, 0x2000, NeighborState::Nbr);

    let mut router = Router::new(&vector_config());
    let ctx = ctx(1, 0x1000, &neighbors, 0);
    let heartbeat = encode_body(
        SyncKind::Heartbeat,
        &[
            &vertex(0x2000, 2, 1, &[0x1000, 0x5000]),
            &vertex(0x5000, 5, 1, &[]),
        ],
    );
    router.handle_routing_info(&ExtAddr::from_u64(2), &heartbeat, &ctx);
    router.compute_routes(&ctx);
    assert!(router.table().iter().all(|r| r.dest != Sid::new(0x5000)));
}

#[test]
fn test_zone_follows_nearest_vertex() {
    let mut neighbors = NeighborTable::new(8);
    add_neighbor(&mut neighbors, 2, 0x2000, NeighborState::Nbr);

    let mut router = Router::new(&vector_config());
    let ctx = ctx(1, 0x1000, &neighbors, 0);
    let mut far = vertex(0x2000, 2, 1, &[0x1000]);
    far.rsid = Some(Rsid::new(3));
    router.handle_routing_info(&ExtAddr::from_u64(2), &encode_body(SyncKind::Heartbeat, &[&far]), &ctx);
    router.compute_routes(&ctx);

    let entry = router.table().lookup(Sid::new(0x2300)).copied().unwrap();
    assert_eq!(entry.zone, Some(Rsid::new(3)));
    assert_eq!(entry.next_hop, Sid::new(0x2000));
}

#[test]
fn test_stale_vertex_ignored() {
    let neighbors = NeighborTable::new(8);
    let mut router = VectorRouter::new(vector_config());
    let ctx = ctx(1, 0x1000, &neighbors, 0);
    let from = ExtAddr::from_u64(2);
    router.handle_routing_info(&from, &encode_body(SyncKind::Heartbeat, &[&vertex(0x2000, 2, 5, &[])]), &ctx);
    router.handle_routing_info(
        &from,
        &encode_body(SyncKind::Heartbeat, &[&vertex(0x2000, 2, 4, &[0x1000])]),
        &ctx,
    );
    assert!(router.vertex(Sid::new(0x2000)).unwrap().edges.is_empty());
}

#[test]
fn test_heartbeat_backs_off_to_max() {
    let neighbors = NeighborTable::new(8);
    let mut router = VectorRouter::new(vector_config());
    router.start(&ctx(1, 0x1000, &neighbors, 0));
    let out = router.take_output();
    assert!(out.timers.contains(&(TimerKind::Heartbeat, 1000)));
    assert!(matches!(out.messages.first(), Some(RouterMessage::Broadcast(_))));

    let mut now = 1000;
    let mut periods = Vec::new();
    for _ in 0..6 {
        router.on_timer(TimerKind::Heartbeat, &ctx(1, 0x1000, &neighbors, now));
        let out = router.take_output();
        let (_, at) = out
            .timers
            .iter()
            .copied()
            .find(|(k, _)| *k == TimerKind::Heartbeat)
            .unwrap();
        periods.push(at - now);
        now = at;
    }
    assert_eq!(periods, vec![2000, 4000, 8000, 16_000, 16_000, 16_000]);
}

#[test]
fn test_topology_change_resets_heartbeat() {
    let mut neighbors = NeighborTable::new(8);
    let mut router = VectorRouter::new(vector_config());
    router.start(&ctx(1, 0x1000, &neighbors, 0));
    router.on_timer(TimerKind::Heartbeat, &ctx(1, 0x1000, &neighbors, 1000));
    assert_eq!(router.heartbeat_interval_ms(), 2000);

    add_neighbor(&mut neighbors, 2, 0x2000, NeighborState::Nbr);
    router.compute_routes(&ctx(1, 0x1000, &neighbors, 1500));
    assert_eq!(router.heartbeat_interval_ms(), 1000);
    assert_eq!(router.vertex(Sid::new(0x1000)).unwrap().edges.len(), 1);
}

#[test]
fn test_silent_vertices_expire() {
    let neighbors = NeighborTable::new(8);
    let config = vector_config();
    let lifetime = config.heartbeat_max_ms * config.vertex_timeout_heartbeats as u64;
    let mut router = VectorRouter::new(config);
    router.start(&ctx(1, 0x1000, &neighbors, 0));
    router.handle_routing_info(
        &ExtAddr::from_u64(2),
        &encode_body(SyncKind::Heartbeat, &[&vertex(0x2000, 2, 1, &[])]),
        &ctx(1, 0x1000, &neighbors, 0),
    );
    assert!(router.vertex(Sid::new(0x2000)).is_some());

    router.on_timer(TimerKind::Heartbeat, &ctx(1, 0x1000, &neighbors, lifetime));
    assert!(router.vertex(Sid::new(0x2000)).is_none());
    assert!(router.vertex(Sid::new(0x1000)).is_some());
}

#[test]
fn test_sync_exchange_between_routers() {
    let mut a_neighbors = NeighborTable::new(8);
    add_neighbor(&mut a_neighbors, 2, 0x2000, NeighborState::Nbr);
    let mut b_neighbors = NeighborTable::new(8);
    add_neighbor(&mut b_neighbors, 1, 0x1000, NeighborState::Nbr);
    add_neighbor(&mut b_neighbors, 3, 0x3000, NeighborState::Nbr);

    let mut a = VectorRouter::new(vector_config());
    let mut b = VectorRouter::new(vector_config());
    let a_ctx = ctx(1, 0x1000, &a_neighbors, 0);
    let b_ctx = ctx(2, 0x2000, &b_neighbors, 0);
    b.start(&b_ctx);
    b.handle_routing_info(
        &ExtAddr::from_u64(3),
        &encode_body(SyncKind::Heartbeat, &[&vertex(0x3000, 3, 1, &[0x2000])]),
        &b_ctx,
    );
    b.take_output();

    a.start(&a_ctx);
    let request = a
        .take_output()
        .messages
        .into_iter()
        .find_map(|m| match m {
            RouterMessage::Unicast(to, body) if to == ExtAddr::from_u64(2) => Some(body),
            _ => None,
        })
        .unwrap();

    b.handle_routing_info(&ExtAddr::from_u64(1), &request, &b_ctx);
    let data = match b.take_output().messages.pop() {
        Some(RouterMessage::Unicast(to, body)) if to == ExtAddr::from_u64(1) => body,
        other => panic!("expected sync data, got {:?}", other),
    };

    a.handle_routing_info(&ExtAddr::from_u64(2), &data, &a_ctx);
    let out = a.take_output();
    assert!(out.topology_changed);
    assert!(out.messages.iter().any(|m| matches!(
        m,
        RouterMessage::Unicast(to, body)
            if *to == ExtAddr::from_u64(2) && decode_body(body, 0).unwrap().0 == SyncKind::Ack
    )));
    assert!(a.vertex(Sid::new(0x2000)).is_some());
    assert!(a.vertex(Sid::new(0x3000)).is_some());

    a.compute_routes(&a_ctx);
    let entry = a.table().lookup(Sid::new(0x3000)).unwrap();
    assert_eq!(entry.next_hop, Sid::new(0x2000));

    // No retry once the data arrived.
    a.on_timer(TimerKind::RouterSync, &a_ctx);
    assert!(a.take_output().messages.is_empty());
}

#[test]
fn test_sync_request_retried_then_abandoned() {
    let mut neighbors = NeighborTable::new(8);
    add_neighbor(&mut neighbors, 2, 0x2000, NeighborState::Nbr);
    let config = vector_config();
    let retries = config.sync_retry_times as usize;
    let mut router = VectorRouter::new(config);
    router.start(&ctx(1, 0x1000, &neighbors, 0));
    router.take_output();

    let mut resent = 0;
    for i in 1..=retries + 2 {
        router.on_timer(TimerKind::RouterSync, &ctx(1, 0x1000, &neighbors, i as u64 * 1000));
        resent += router.take_output().messages.len();
    }
    assert_eq!(resent, retries);
}
