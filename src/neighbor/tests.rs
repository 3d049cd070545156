use super::*;

fn ext(n: u64) -> ExtAddr {
    ExtAddr::from_u64(n)
}

#[test]
fn test_link_cost_stays_at_unit_for_perfect_link() {
    let mut n = Neighbor::new(ext(1), 0);
    n.link_requests = 4;
    n.link_accepts = 4;
    assert_eq!(n.estimate_link_cost(), Some(LINK_COST_INITIAL));
    assert_eq!(n.link_requests, 0);
    assert!(n.flags.link_estimated);
}

#[test]
fn test_link_cost_without_request_is_untouched() {
    let mut n = Neighbor::new(ext(1), 0);
    assert_eq!(n.estimate_link_cost(), None);
    assert_eq!(n.link_cost, LINK_COST_INITIAL);
}

#[test]
fn test_silent_link_fails_within_a_few_rounds() {
    let mut n = Neighbor::new(ext(1), 0);
    let mut rounds = 0;
    while !n.link_failed() {
        n.link_requests = 1;
        n.estimate_link_cost();
        rounds += 1;
        assert!(rounds < 10, "link never crossed the threshold");
    }
    // 256 -> 448 -> 592 -> 700 -> 781
    assert_eq!(rounds, 4);
}

#[test]
fn test_saturated_cost_still_rises() {
    let mut n = Neighbor::new(ext(1), 0);
    n.link_cost = LINK_COST_MAX - 1;
    n.link_requests = 1;
    n.estimate_link_cost();
    assert_eq!(n.link_cost, LINK_COST_MAX);
}

#[test]
fn test_seed_from_rssi() {
    let mut n = Neighbor::new(ext(1), 0);
    n.seed_link_cost(-40);
    assert_eq!(n.link_cost, 256);
    n.seed_link_cost(-70);
    assert_eq!(n.link_cost, 256 + 2 * 64);
    n.seed_link_cost(-128);
    assert!(!n.link_failed());
}

#[test]
fn test_sleepy_awake_window() {
    let mut n = Neighbor::new(ext(1), 0);
    assert!(n.is_awake(0));
    n.mode = Mode::NONE;
    assert!(!n.is_awake(10));
    n.awake_until_ms = 100;
    assert!(n.is_awake(99));
    assert!(!n.is_awake(100));
}

#[test]
fn test_table_full_rejects_plain_insert() {
    let mut table = NeighborTable::new(2);
    table.get_or_insert(ext(1), 0, false).unwrap();
    table.get_or_insert(ext(2), 0, false).unwrap();
    assert_eq!(
        table.get_or_insert(ext(3), 0, false).unwrap_err(),
        NeighborError::TableFull { capacity: 2 }
    );
    // Existing entries are still reachable.
    assert!(table.get_or_insert(ext(2), 5, false).is_ok());
}

#[test]
fn test_table_full_attach_replaces_oldest_plain_neighbor() {
    let mut table = NeighborTable::new(2);
    table.get_or_insert(ext(1), 10, false).unwrap().state = NeighborState::Parent;
    table.get_or_insert(ext(2), 20, false).unwrap();
    table.get_or_insert(ext(3), 30, true).unwrap();
    assert!(table.contains(&ext(1)));
    assert!(!table.contains(&ext(2)));
    assert!(table.contains(&ext(3)));
}

#[test]
fn test_table_full_never_evicts_parent_or_child() {
    let mut table = NeighborTable::new(2);
    table.get_or_insert(ext(1), 0, false).unwrap().state = NeighborState::Parent;
    table.get_or_insert(ext(2), 0, false).unwrap().state = NeighborState::Child;
    assert!(table.get_or_insert(ext(3), 0, true).is_err());
}

#[test]
fn test_expire_by_alive_interval() {
    let mut table = NeighborTable::new(8);
    table.get_or_insert(ext(1), 0, false).unwrap();
    table.get_or_insert(ext(2), 500, false).unwrap();
    let removed = table.expire(1000, |_| 800);
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].ext, ext(1));
    assert_eq!(table.len(), 1);
}

#[test]
fn test_find_by_sid_scopes_to_network() {
    let mut table = NeighborTable::new(8);
    let n = table.get_or_insert(ext(1), 0, false).unwrap();
    n.netid = MeshNetId::new(7);
    n.sid = Sid::new(0x1000);
    assert!(table.find_by_sid(MeshNetId::new(7), Sid::new(0x1000)).is_some());
    assert!(table.find_by_sid(MeshNetId::new(8), Sid::new(0x1000)).is_none());
    assert!(table.find_by_sid(MeshNetId::new(7), Sid::INVALID).is_none());
}

#[test]
fn test_reset_states_keeps_parent() {
    let mut table = NeighborTable::new(8);
    table.get_or_insert(ext(1), 0, false).unwrap().state = NeighborState::Parent;
    let child = table.get_or_insert(ext(2), 0, false).unwrap();
    child.state = NeighborState::Child;
    child.buffer.push_back(vec![1]);
    table.reset_states_except(Some(ext(1)));
    assert_eq!(table.parent().map(|n| n.ext), Some(ext(1)));
    assert_eq!(table.get(&ext(2)).unwrap().state, NeighborState::Invalid);
    assert!(table.get(&ext(2)).unwrap().buffer.is_empty());
}
