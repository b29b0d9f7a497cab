use std::sync::Arc;

use qkdnet_sim::{
    CostFunction, EventKind, LinkParams, NodeId, NodeSpec, RecordingSink, SimConfig,
    TopologyBuilder, World,
};

/// r1 reaches r4 directly over an expensive slow link, or through r2 over
/// two cheap fast links.
fn diamond(cost: CostFunction) -> (World, [NodeId; 4]) {
    let mut builder = TopologyBuilder::new(SimConfig::default().with_cost(cost));
    let lan = builder.add_network("lan", None);
    let r1 = builder.add_router(lan, NodeSpec::new("r1", "1")).unwrap();
    let r2 = builder.add_router(lan, NodeSpec::new("r2", "2")).unwrap();
    let r3 = builder.add_router(lan, NodeSpec::new("r3", "3")).unwrap();
    let r4 = builder.add_router(lan, NodeSpec::new("r4", "4")).unwrap();
    builder.connect(r1, r4, LinkParams::new(1, 10)).unwrap();
    builder.connect(r1, r2, LinkParams::new(100, 1)).unwrap();
    builder.connect(r2, r4, LinkParams::new(100, 1)).unwrap();
    builder.connect(r1, r3, LinkParams::new(100, 1)).unwrap();
    builder.connect(r3, r4, LinkParams::new(100, 1)).unwrap();
    (builder.build(), [r1, r2, r3, r4])
}

#[test]
fn test_hop_count_prefers_fewest_links() {
    let (world, [r1, _, _, r4]) = diamond(CostFunction::HopCount);
    assert_eq!(world.topology().get_path(r1, r4), vec![r1, r4]);
}

#[test]
fn test_cost_prefers_cheapest_links() {
    let (world, [r1, r2, _, r4]) = diamond(CostFunction::Cost);
    // r1-r2-r4 and r1-r3-r4 tie; the lower handle wins.
    assert_eq!(world.topology().get_path(r1, r4), vec![r1, r2, r4]);
}

#[test]
fn test_inverse_bandwidth_prefers_fast_links() {
    let (world, [r1, r2, _, r4]) = diamond(CostFunction::InverseBandwidth);
    assert_eq!(world.topology().get_path(r1, r4), vec![r1, r2, r4]);
}

#[test]
fn test_path_to_self() {
    let (world, [r1, ..]) = diamond(CostFunction::HopCount);
    assert_eq!(world.topology().get_path(r1, r1), vec![r1]);
}

#[test]
fn test_hosts_are_not_transit() {
    let mut builder = TopologyBuilder::new(SimConfig::default());
    let lan = builder.add_network("lan", None);
    let r1 = builder.add_router(lan, NodeSpec::new("r1", "1")).unwrap();
    let host = builder.add_host(lan, NodeSpec::new("h", "2")).unwrap();
    let r2 = builder.add_router(lan, NodeSpec::new("r2", "3")).unwrap();
    builder.connect(r1, host, LinkParams::default()).unwrap();
    builder.connect(host, r2, LinkParams::default()).unwrap();
    let world = builder.build();

    assert_eq!(world.topology().get_path(r1, host), vec![r1, host]);
    assert!(world.topology().get_path(r1, r2).is_empty());
}

#[test]
fn test_unreachable_destination_reports_not_connected() {
    let sink = Arc::new(RecordingSink::new());
    let mut builder = TopologyBuilder::new(SimConfig::default()).with_sink(sink.clone());
    let lan = builder.add_network("lan", None);
    let alice = builder.add_host(lan, NodeSpec::new("alice", "1")).unwrap();
    let router = builder.add_router(lan, NodeSpec::new("r1", "2")).unwrap();
    let bob = builder.add_host(lan, NodeSpec::new("bob", "3")).unwrap();
    let carol = builder.add_host(lan, NodeSpec::new("carol", "4")).unwrap();
    builder.connect(alice, router, LinkParams::default()).unwrap();
    builder.connect(bob, carol, LinkParams::default()).unwrap();
    let world = builder.build();

    assert!(world.topology().get_path(router, bob).len() <= 1);

    world.send(alice, "nowhere", bob).unwrap();
    world.send(bob, "still works", carol).unwrap();
    world.run_ticks(3);

    let errors = sink.of_kind(EventKind::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].node, "r1");
    assert!(errors[0].payload["error"]
        .as_str()
        .unwrap()
        .contains("connection not found"));
    assert!(world.topology().delivered(bob).unwrap().is_empty());
    assert_eq!(world.topology().delivered(carol).unwrap().len(), 1);
}

#[test]
fn test_multi_hop_trail() {
    let mut builder = TopologyBuilder::new(SimConfig::default());
    let lan = builder.add_network("lan", None);
    let alice = builder.add_host(lan, NodeSpec::new("alice", "1")).unwrap();
    let r1 = builder.add_router(lan, NodeSpec::new("r1", "2")).unwrap();
    let r2 = builder.add_router(lan, NodeSpec::new("r2", "3")).unwrap();
    let r3 = builder.add_router(lan, NodeSpec::new("r3", "4")).unwrap();
    let bob = builder.add_host(lan, NodeSpec::new("bob", "5")).unwrap();
    builder.connect(alice, r1, LinkParams::default()).unwrap();
    builder.connect(r1, r2, LinkParams::default()).unwrap();
    builder.connect(r2, r3, LinkParams::default()).unwrap();
    builder.connect(r3, bob, LinkParams::default()).unwrap();
    let world = builder.build();

    world.send(alice, "far", bob).unwrap();
    assert!(world.run_until(10, |t| !t.delivered(bob).unwrap().is_empty()));
    assert_eq!(
        world.topology().delivered(bob).unwrap()[0].hops(),
        &[alice, r1, r2, r3]
    );
}
