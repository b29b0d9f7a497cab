use std::sync::{Arc, Mutex};

use qkdnet_sim::{
    AuditLog, EventKind, LinkParams, NetworkError, NodeId, NodeSpec, RecordingSink, SimConfig,
    TopologyBuilder,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn test_direct_delivery_after_one_tick() {
    init_tracing();
    let mut builder = TopologyBuilder::new(SimConfig::default());
    let lan = builder.add_network("lan", None);
    let alice = builder.add_host(lan, NodeSpec::new("alice", "10.0.0.1")).unwrap();
    let bob = builder.add_host(lan, NodeSpec::new("bob", "10.0.0.2")).unwrap();
    builder.connect(alice, bob, LinkParams::default()).unwrap();
    let world = builder.build();

    world.send(alice, "hello", bob).unwrap();
    assert!(world.topology().delivered(bob).unwrap().is_empty());
    assert_eq!(world.topology().buffered(bob), 1);

    world.step();

    let delivered = world.topology().delivered(bob).unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload(), b"hello");
    assert_eq!(delivered[0].from(), alice);
    assert_eq!(delivered[0].hops(), &[alice]);
    assert_eq!(world.topology().buffered(bob), 0);
}

#[test]
fn test_packets_from_one_sender_keep_order() {
    let mut builder = TopologyBuilder::new(SimConfig::default());
    let lan = builder.add_network("lan", None);
    let alice = builder.add_host(lan, NodeSpec::new("alice", "10.0.0.1")).unwrap();
    let bob = builder.add_host(lan, NodeSpec::new("bob", "10.0.0.2")).unwrap();
    builder.connect(alice, bob, LinkParams::default()).unwrap();
    let world = builder.build();

    for message in ["one", "two", "three"] {
        world.send(alice, message, bob).unwrap();
    }
    world.step();

    let payloads: Vec<String> = world
        .topology()
        .delivered(bob)
        .unwrap()
        .iter()
        .map(|p| p.payload_lossy())
        .collect();
    assert_eq!(payloads, vec!["one", "two", "three"]);
}

#[test]
fn test_send_through_default_gateway() {
    let mut builder = TopologyBuilder::new(SimConfig::default());
    let lan = builder.add_network("lan", None);
    let alice = builder.add_host(lan, NodeSpec::new("alice", "10.0.0.1")).unwrap();
    let router = builder.add_router(lan, NodeSpec::new("r1", "10.0.0.254")).unwrap();
    let bob = builder.add_host(lan, NodeSpec::new("bob", "10.0.0.2")).unwrap();
    builder.connect(alice, router, LinkParams::default()).unwrap();
    builder.connect(router, bob, LinkParams::default()).unwrap();
    let world = builder.build();

    assert_eq!(world.topology().default_gateway(alice).unwrap(), Some(router));
    world.send(alice, "via router", bob).unwrap();

    assert!(world.run_until(5, |t| !t.delivered(bob).unwrap().is_empty()));
    let delivered = world.topology().delivered(bob).unwrap();
    assert_eq!(delivered[0].payload(), b"via router");
    assert_eq!(delivered[0].hops(), &[alice, router]);
}

#[test]
fn test_isolated_host_has_no_gateway() {
    let mut builder = TopologyBuilder::new(SimConfig::default());
    let lan = builder.add_network("lan", None);
    let alice = builder.add_host(lan, NodeSpec::new("alice", "10.0.0.1")).unwrap();
    let bob = builder.add_host(lan, NodeSpec::new("bob", "10.0.0.2")).unwrap();
    let world = builder.build();

    let err = world.send(alice, "lost", bob).unwrap_err();
    assert_eq!(
        err,
        NetworkError::DefaultGatewayNotFound {
            node: "alice".to_string()
        }
    );
}

#[test]
fn test_unlinked_gateway_is_not_connected() {
    let mut builder = TopologyBuilder::new(SimConfig::default());
    let lan = builder.add_network("lan", None);
    let alice = builder.add_host(lan, NodeSpec::new("alice", "10.0.0.1")).unwrap();
    let router = builder.add_router(lan, NodeSpec::new("r1", "10.0.0.254")).unwrap();
    let bob = builder.add_host(lan, NodeSpec::new("bob", "10.0.0.2")).unwrap();
    builder.set_default_gateway(alice, router).unwrap();
    let world = builder.build();

    let err = world.send(alice, "lost", bob).unwrap_err();
    assert!(matches!(err, NetworkError::NotConnected { .. }));
    assert_eq!(world.topology().buffered(router), 0);
}

#[test]
fn test_unknown_destination() {
    let mut builder = TopologyBuilder::new(SimConfig::default());
    let lan = builder.add_network("lan", None);
    let alice = builder.add_host(lan, NodeSpec::new("alice", "10.0.0.1")).unwrap();
    let world = builder.build();

    let err = world.send(alice, "x", NodeId::new(42)).unwrap_err();
    assert!(matches!(err, NetworkError::NodeNotFound { .. }));

    let err = world.send_by_name("alice", "nobody", "x").unwrap_err();
    assert_eq!(
        err,
        NetworkError::NodeNotFound {
            name: "nobody".to_string()
        }
    );
}

#[test]
fn test_routers_cannot_send() {
    let mut builder = TopologyBuilder::new(SimConfig::default());
    let lan = builder.add_network("lan", None);
    let router = builder.add_router(lan, NodeSpec::new("r1", "10.0.0.254")).unwrap();
    let bob = builder.add_host(lan, NodeSpec::new("bob", "10.0.0.2")).unwrap();
    let world = builder.build();

    let err = world.send(router, "x", bob).unwrap_err();
    assert!(matches!(err, NetworkError::WrongRole { .. }));
}

#[test]
fn test_unexpected_packet_is_dropped_not_fatal() {
    let sink = Arc::new(RecordingSink::new());
    let mut builder = TopologyBuilder::new(SimConfig::default()).with_sink(sink.clone());
    let lan = builder.add_network("lan", None);
    let alice = builder.add_host(lan, NodeSpec::new("alice", "10.0.0.1")).unwrap();
    let middle = builder.add_host(lan, NodeSpec::new("middle", "10.0.0.3")).unwrap();
    let bob = builder.add_host(lan, NodeSpec::new("bob", "10.0.0.2")).unwrap();
    builder.connect(alice, middle, LinkParams::default()).unwrap();
    builder.connect(middle, bob, LinkParams::default()).unwrap();
    let world = builder.build();

    // alice's gateway is a host, which does not relay.
    world.send(alice, "stray", bob).unwrap();
    world.send(alice, "direct", middle).unwrap();
    world.run_ticks(3);

    assert_eq!(sink.count(EventKind::Anomaly), 1);
    assert!(world.topology().delivered(bob).unwrap().is_empty());
    let delivered = world.topology().delivered(middle).unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload(), b"direct");
}

#[test]
fn test_data_callback_and_events() {
    let sink = Arc::new(RecordingSink::new());
    let audit = AuditLog::memory();
    let mut builder = TopologyBuilder::new(SimConfig::default())
        .with_sink(sink.clone())
        .with_audit(audit.clone());
    let lan = builder.add_network("lan", None);
    let alice = builder.add_host(lan, NodeSpec::new("alice", "10.0.0.1")).unwrap();
    let bob = builder.add_host(lan, NodeSpec::new("bob", "10.0.0.2")).unwrap();
    builder.connect(alice, bob, LinkParams::default()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = seen.clone();
    builder
        .on_data(bob, move |packet| {
            sink_seen.lock().unwrap().push(packet.payload_lossy());
        })
        .unwrap();
    let world = builder.build();

    world.send_by_name("alice", "bob", "ping").unwrap();
    world.step();

    assert_eq!(*seen.lock().unwrap(), vec!["ping".to_string()]);
    assert_eq!(sink.count(EventKind::NodeCreated), 2);
    assert_eq!(sink.count(EventKind::PacketSent), 1);
    assert_eq!(sink.count(EventKind::DataReceived), 1);

    let received = &sink.of_kind(EventKind::DataReceived)[0];
    assert_eq!(received.node, "bob");
    assert_eq!(received.payload["data"], "ping");
    assert_eq!(received.timestamp, 0);

    let lines = audit.lines();
    assert!(lines.iter().any(|l| l.starts_with("alice sent data 'ping'")));
    assert!(lines.iter().any(|l| l == "bob received data 'ping'"));
}

#[test]
fn test_zone_hook_sees_network_events() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let hook_seen = seen.clone();

    let mut builder = TopologyBuilder::new(SimConfig::default());
    let city = builder
        .add_zone("city", qkdnet_sim::ZoneType::Commercial, None)
        .unwrap();
    let block = builder
        .add_zone("block", qkdnet_sim::ZoneType::Residential, Some(city))
        .unwrap();
    builder
        .on_zone_event(
            city,
            Arc::new(move |event: &qkdnet_sim::SimEvent| {
                hook_seen.lock().unwrap().push((event.kind, event.node.clone()));
            }),
        )
        .unwrap();
    let lan = builder.add_network("lan", Some(block));
    let other = builder.add_network("other", None);
    let alice = builder.add_host(lan, NodeSpec::new("alice", "10.0.0.1")).unwrap();
    let bob = builder.add_host(lan, NodeSpec::new("bob", "10.0.0.2")).unwrap();
    builder.add_host(other, NodeSpec::new("carol", "10.0.1.1")).unwrap();
    builder.connect(alice, bob, LinkParams::default()).unwrap();
    let world = builder.build();

    world.send(alice, "hi", bob).unwrap();
    world.step();

    let seen = seen.lock().unwrap();
    assert!(seen.contains(&(EventKind::NodeCreated, "alice".to_string())));
    assert!(seen.contains(&(EventKind::DataReceived, "bob".to_string())));
    assert!(!seen.iter().any(|(_, node)| node == "carol"));
}
