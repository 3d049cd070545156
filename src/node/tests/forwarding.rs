//! Datagram delivery: multi-hop unicast, fragmentation, multicast and
//! failure reporting.

use super::*;
use crate::forwarder::{DeliveryFailure, Destination};
use crate::protocol::{McastScope, MAX_DATAGRAM_SIZE};

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_datagram_crosses_two_hops() {
    let mut net = SimNetwork::line([config(), config(), config()]);
    let c_sid = net.node(2).sid();
    let data = payload(100);

    net.node_mut(2).send_down(data.clone(), Destination::Sid(Sid::LEADER));
    assert!(net.run_until(2_000, |net| net.node(0).stats().in_data > 0));

    assert_eq!(net.nodes[0].ip.take_delivered(), vec![(c_sid, data)]);
    assert!(net.nodes[1].ip.take_delivered().is_empty());
    assert!(net.nodes[2].ip.take_failed().is_empty());
}

#[test]
fn test_datagram_to_leaf_from_leader() {
    let mut net = SimNetwork::line([config(), config(), config()]);
    let c_sid = net.node(2).sid();
    let data = payload(40);

    net.node_mut(0).send_down(data.clone(), Destination::Sid(c_sid));
    assert!(net.run_until(2_000, |net| net.node(2).stats().in_data > 0));
    assert_eq!(net.nodes[2].ip.take_delivered(), vec![(Sid::LEADER, data)]);
}

#[test]
fn test_fragments_reassemble_out_of_order() {
    let mut net = SimNetwork::new();
    net.add(1, config());
    net.add(2, config());
    net.link(0, 1);
    net.start_leader(0);
    net.join(1);
    let b_sid = net.node(1).sid();
    let data = payload(2000);

    // Capture the fragments instead of letting the medium carry them.
    let now = net.now_ms;
    net.node_mut(1).send_down(data.clone(), Destination::Sid(Sid::LEADER));
    net.node_mut(1).tick(now);
    let mut frames: Vec<Vec<u8>> = net.nodes[1]
        .radio
        .take_sent()
        .into_iter()
        .filter(|s| s.dest == ext(1))
        .map(|s| s.frame)
        .collect();
    assert!(frames.len() > 1);
    assert!(frames.iter().all(|f| f.len() <= MTU));

    frames.reverse();
    for frame in frames {
        net.node_mut(0).receive(ext(2), frame, Some(-40));
    }
    net.node_mut(0).tick(now);

    assert_eq!(net.nodes[0].ip.take_delivered(), vec![(b_sid, data)]);
}

#[test]
fn test_multicast_reaches_whole_mesh() {
    let mut net = SimNetwork::line([config(), config(), config()]);
    let data = payload(64);

    net.node_mut(0).send_down(data.clone(), Destination::Multicast(McastScope::Mesh));
    assert!(net.run_until(2_000, |net| net.node(2).stats().in_data > 0));

    assert_eq!(net.nodes[1].ip.take_delivered(), vec![(Sid::LEADER, data.clone())]);
    assert_eq!(net.nodes[2].ip.take_delivered(), vec![(Sid::LEADER, data)]);
    assert!(net.nodes[0].ip.take_delivered().is_empty());
}

#[test]
fn test_multicast_delivered_once() {
    let mut net = SimNetwork::line([config(), config(), config()]);
    let data = payload(16);

    net.node_mut(2).send_down(data.clone(), Destination::Multicast(McastScope::Mesh));
    net.run_for(2_000);

    let c_sid = net.node(2).sid();
    assert_eq!(net.nodes[0].ip.take_delivered(), vec![(c_sid, data.clone())]);
    assert_eq!(net.nodes[1].ip.take_delivered(), vec![(c_sid, data)]);
    assert!(net.nodes[2].ip.take_delivered().is_empty());
}

#[test]
fn test_send_to_ext_neighbor() {
    let mut net = SimNetwork::new();
    net.add(1, config());
    net.add(2, config());
    net.link(0, 1);
    net.start_leader(0);
    net.join(1);
    let data = payload(10);

    net.node_mut(1).send_down(data.clone(), Destination::Ext(ext(1)));
    assert!(net.run_until(1_000, |net| net.node(0).stats().in_data > 0));
    assert_eq!(net.nodes[0].ip.take_delivered(), vec![(net.node(1).sid(), data)]);
}

#[test]
fn test_no_route_is_reported() {
    let mut net = SimNetwork::new();
    net.add(1, config());
    net.start_leader(0);

    let dest = Destination::Sid(Sid::new(0x1000));
    net.node_mut(0).send_down(payload(8), dest);
    net.step();

    assert_eq!(net.nodes[0].ip.take_failed(), vec![(dest, DeliveryFailure::NoRoute)]);
}

#[test]
fn test_detached_send_is_reported() {
    let mut net = SimNetwork::new();
    net.add(1, config());
    net.start(0);

    let dest = Destination::Sid(Sid::LEADER);
    net.node_mut(0).send_down(payload(8), dest);
    net.step();
    assert_eq!(net.nodes[0].ip.take_failed(), vec![(dest, DeliveryFailure::Detached)]);

    // A stopped node refuses immediately.
    net.node_mut(0).stop().unwrap();
    net.node_mut(0).send_down(payload(8), dest);
    assert_eq!(net.nodes[0].ip.take_failed(), vec![(dest, DeliveryFailure::Detached)]);
}

#[test]
fn test_oversized_datagram_is_refused() {
    let mut net = SimNetwork::new();
    net.add(1, config());
    net.start_leader(0);

    let dest = Destination::Multicast(McastScope::Subnet);
    net.node_mut(0).send_down(payload(MAX_DATAGRAM_SIZE + 1), dest);
    net.step();
    assert_eq!(net.nodes[0].ip.take_failed(), vec![(dest, DeliveryFailure::TooLarge)]);
    assert!(net.take_sent(0).iter().all(|s| s.frame.len() <= MTU));
}
