use std::sync::mpsc;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use qkdnet_sim::{
    AdapterPhase, EventKind, LinkParams, NetworkError, NodeSpec, QuantumHostId, RecordingSink,
    SharedKey, SimConfig, SimEvent, Topology, TopologyBuilder,
};

use crate::fixture::{Bridge, MockExchange, init_tracing};

fn key() -> SharedKey {
    SharedKey::from_bits([1, 0, 1, 1, 0, 0, 1, 0, 1, 1, 1, 0, 0, 1, 0, 1])
}

fn mock_bridge() -> (Bridge, Arc<MockExchange>, Arc<MockExchange>) {
    init_tracing();
    let qx = MockExchange::new(0, &[1]);
    let qy = MockExchange::new(1, &[0]);
    let bridge = Bridge::build(SimConfig::default(), qx.clone(), qy.clone());
    (bridge, qx, qy)
}

#[test]
fn test_collaborators_attached_to_each_other() {
    let (_bridge, qx, qy) = mock_bridge();
    assert_eq!(qx.attached_peer(), Some(QuantumHostId::new(1)));
    assert_eq!(qy.attached_peer(), Some(QuantumHostId::new(0)));
}

#[test]
fn test_first_packet_triggers_single_initiation() {
    let (bridge, qx, qy) = mock_bridge();
    for message in ["m1", "m2", "m3"] {
        bridge.world.send(bridge.alice, message, bridge.bob).unwrap();
    }
    bridge.world.run_ticks(3);

    let status = bridge.world.topology().adapter_status(bridge.x).unwrap();
    assert_eq!(status.phase, AdapterPhase::AwaitingQkd);
    assert_eq!(status.pending, 3);
    assert_eq!(status.qkd_initiations, 1);
    assert_eq!(status.shared_key, None);
    assert_eq!(qx.initiations(), 1);
    assert_eq!(qy.initiations(), 0);

    assert_eq!(bridge.sink.count(EventKind::QkdInitiated), 1);
    assert_eq!(bridge.sink.count(EventKind::PacketHeld), 3);
    assert!(bridge.delivered_to(bridge.bob).is_empty());
}

#[test]
fn test_parked_packets_flush_in_arrival_order() {
    let (bridge, _qx, _qy) = mock_bridge();
    let topology = bridge.world.topology();
    for message in ["m1", "m2", "m3"] {
        bridge.world.send(bridge.alice, message, bridge.bob).unwrap();
    }
    bridge.world.run_ticks(3);

    topology.on_qkd_established(bridge.x, key()).unwrap();
    topology.on_qkd_established(bridge.y, key()).unwrap();

    assert!(bridge.world.run_until(20, |t| t.delivered(bridge.bob).unwrap().len() == 3));
    assert_eq!(bridge.delivered_to(bridge.bob), vec!["m1", "m2", "m3"]);

    let x_router = topology.local_router(bridge.x).unwrap();
    let y_router = topology.local_router(bridge.y).unwrap();
    let delivered = topology.delivered(bridge.bob).unwrap();
    assert_eq!(
        delivered[0].hops(),
        &[bridge.alice, bridge.r_west, x_router, y_router, bridge.r_east]
    );
    assert_eq!(delivered[0].final_destination(), None);

    assert_eq!(bridge.sink.count(EventKind::Encrypted), 3);
    assert_eq!(bridge.sink.count(EventKind::Decrypted), 3);
    let status = topology.adapter_status(bridge.x).unwrap();
    assert_eq!(status.phase, AdapterPhase::Keyed);
    assert_eq!(status.pending, 0);
    assert_eq!(status.qkd_initiations, 1);
}

#[test]
fn test_ciphertext_before_local_key_is_held() {
    let (bridge, _qx, _qy) = mock_bridge();
    let topology = bridge.world.topology();
    for message in ["m1", "m2"] {
        bridge.world.send(bridge.alice, message, bridge.bob).unwrap();
    }
    bridge.world.run_ticks(2);
    topology.on_qkd_established(bridge.x, key()).unwrap();
    bridge.world.run_ticks(3);

    let y = topology.adapter_status(bridge.y).unwrap();
    assert_eq!(y.pending, 2);
    assert_eq!(y.phase, AdapterPhase::NoKey);
    assert_eq!(y.qkd_initiations, 0);
    assert_eq!(bridge.sink.count(EventKind::Anomaly), 2);
    assert!(bridge.delivered_to(bridge.bob).is_empty());

    topology.on_qkd_established(bridge.y, key()).unwrap();
    assert!(bridge.world.run_until(10, |t| t.delivered(bridge.bob).unwrap().len() == 2));
    assert_eq!(bridge.delivered_to(bridge.bob), vec!["m1", "m2"]);
}

#[test]
fn test_mismatched_keys_garble_payload() {
    let (bridge, _qx, _qy) = mock_bridge();
    let topology = bridge.world.topology();
    topology.on_qkd_established(bridge.x, key()).unwrap();
    topology
        .on_qkd_established(bridge.y, SharedKey::from_bits([0, 1, 1, 0, 1, 0, 0, 1]))
        .unwrap();

    bridge.world.send(bridge.alice, "secret", bridge.bob).unwrap();
    assert!(bridge.world.run_until(10, |t| !t.delivered(bridge.bob).unwrap().is_empty()));
    let received = topology.delivered(bridge.bob).unwrap();
    assert_ne!(received[0].payload(), b"secret");
    assert_eq!(received[0].payload().len(), "secret".len());
}

#[test]
fn test_key_callback_from_collaborator_threads() {
    let (bridge, qx, qy) = mock_bridge();
    for message in ["a", "b", "c", "d"] {
        bridge.world.send(bridge.alice, message, bridge.bob).unwrap();
    }
    bridge.world.run_ticks(2);

    let handles: Vec<_> = [qx, qy]
        .into_iter()
        .map(|q| std::thread::spawn(move || q.link().key_established(key())))
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(bridge.world.run_until(20, |t| t.delivered(bridge.bob).unwrap().len() == 4));
    assert_eq!(bridge.delivered_to(bridge.bob), vec!["a", "b", "c", "d"]);
    assert_eq!(bridge.sink.count(EventKind::QkdEstablished), 2);
}

#[test]
fn test_second_key_is_ignored() {
    let (bridge, _qx, _qy) = mock_bridge();
    let topology = bridge.world.topology();
    topology.on_qkd_established(bridge.x, key()).unwrap();
    topology
        .on_qkd_established(bridge.x, SharedKey::from_bits([1, 1, 1, 1]))
        .unwrap();

    let status = topology.adapter_status(bridge.x).unwrap();
    assert_eq!(status.shared_key, Some(key()));
    assert_eq!(bridge.sink.count(EventKind::QkdEstablished), 1);
    assert_eq!(bridge.sink.count(EventKind::Anomaly), 1);
}

#[test]
fn test_explicit_initiation_is_idempotent() {
    let (bridge, qx, _qy) = mock_bridge();
    let topology = bridge.world.topology();
    topology.initiate_qkd(bridge.x).unwrap();
    topology.initiate_qkd(bridge.x).unwrap();

    assert_eq!(qx.initiations(), 1);
    let status = topology.adapter_status(bridge.x).unwrap();
    assert_eq!(status.phase, AdapterPhase::AwaitingQkd);
    assert_eq!(status.qkd_initiations, 1);
}

#[test]
fn test_side_channel_reaches_partner_collaborator() {
    let (bridge, qx, qy) = mock_bridge();
    let topology = bridge.world.topology();
    let y_router = topology.local_router(bridge.y).unwrap();

    qx.link().send_classical(b"announce".to_vec()).unwrap();
    assert_eq!(topology.buffered(y_router), 1);

    bridge.world.step();
    assert_eq!(qy.classical(), vec![b"announce".to_vec()]);
    assert!(qx.classical().is_empty());
    let status = topology.adapter_status(bridge.y).unwrap();
    assert_eq!(status.phase, AdapterPhase::NoKey);
    assert_eq!(status.pending, 0);
}

#[test]
fn test_adapter_routers_are_not_transit() {
    let (bridge, _qx, _qy) = mock_bridge();
    let topology = bridge.world.topology();
    let x_router = topology.local_router(bridge.x).unwrap();

    assert!(topology.get_path(bridge.r_west, bridge.r_east).is_empty());
    assert_eq!(
        topology.get_path(bridge.r_west, x_router),
        vec![bridge.r_west, x_router]
    );
}

#[test]
fn test_pairing_is_one_time() {
    let qx = MockExchange::new(0, &[1, 2]);
    let qy = MockExchange::new(1, &[0]);
    let qz = MockExchange::new(2, &[0]);

    let mut builder = TopologyBuilder::new(SimConfig::default());
    let lan = builder.add_network("lan", None);
    let x = builder.add_adapter(lan, NodeSpec::new("x", "1"), qx).unwrap();
    let y = builder.add_adapter(lan, NodeSpec::new("y", "2"), qy).unwrap();
    let z = builder.add_adapter(lan, NodeSpec::new("z", "3"), qz).unwrap();

    builder.pair_adapters(x, y).unwrap();
    let expected = NetworkError::PairAdapterAlreadyExists {
        adapter: "x".to_string(),
        paired: "y".to_string(),
    };
    assert_eq!(builder.pair_adapters(x, z).unwrap_err(), expected);
    assert_eq!(builder.pair_adapters(z, x).unwrap_err(), expected);

    let world = builder.build();
    let topology = world.topology();
    assert_eq!(topology.adapter_status(x).unwrap().partner, Some(y));
    assert_eq!(topology.adapter_status(y).unwrap().partner, Some(x));
    assert_eq!(topology.adapter_status(z).unwrap().partner, None);

    let x_router = topology.local_router(x).unwrap();
    let y_router = topology.local_router(y).unwrap();
    let z_router = topology.local_router(z).unwrap();
    assert!(topology.connection_between(x_router, y_router).is_some());
    assert!(topology.connection_between(x_router, z_router).is_none());
}

#[test]
fn test_pairing_requires_quantum_channel() {
    let qx = MockExchange::new(0, &[]);
    let qy = MockExchange::new(1, &[]);

    let mut builder = TopologyBuilder::new(SimConfig::default());
    let lan = builder.add_network("lan", None);
    let x = builder.add_adapter(lan, NodeSpec::new("x", "1"), qx).unwrap();

    let err = builder
        .add_paired_adapter(lan, NodeSpec::new("y", "2"), qy, x)
        .unwrap_err();
    assert_eq!(
        err,
        NetworkError::QuantumChannelDoesNotExist {
            adapter: "y".to_string()
        }
    );
    assert!(builder.node_by_name("y").is_err());
    assert!(builder.node_by_name("y-router").is_err());
}

#[test]
fn test_unpaired_adapter() {
    let sink = Arc::new(RecordingSink::new());
    let qx = MockExchange::new(0, &[]);
    let mut builder = TopologyBuilder::new(SimConfig::default()).with_sink(sink.clone());
    let lan = builder.add_network("lan", None);
    let alice = builder.add_host(lan, NodeSpec::new("alice", "1")).unwrap();
    let bob = builder.add_host(lan, NodeSpec::new("bob", "2")).unwrap();
    let x = builder.add_adapter(lan, NodeSpec::new("x", "3"), qx.clone()).unwrap();
    builder.connect(alice, x, LinkParams::default()).unwrap();
    builder.bind_adapter(alice, x).unwrap();
    let world = builder.build();

    assert_eq!(
        world.topology().initiate_qkd(x).unwrap_err(),
        NetworkError::PairAdapterDoesNotExist {
            adapter: "x".to_string()
        }
    );

    world.send(alice, "nowhere", bob).unwrap();
    world.run_ticks(2);

    assert_eq!(qx.initiations(), 0);
    assert_eq!(sink.count(EventKind::Anomaly), 1);
    assert_eq!(world.topology().adapter_status(x).unwrap().pending, 0);
    assert!(world.topology().delivered(bob).unwrap().is_empty());
}

#[test]
fn test_decrypted_packet_without_route_is_reported() {
    init_tracing();
    let sink = Arc::new(RecordingSink::new());
    let mut builder = TopologyBuilder::new(SimConfig::default()).with_sink(sink.clone());
    let west = builder.add_network("west", None);
    let east = builder.add_network("east", None);
    let alice = builder.add_host(west, NodeSpec::new("alice", "1")).unwrap();
    let x = builder
        .add_adapter(west, NodeSpec::new("x", "2"), MockExchange::new(0, &[1]))
        .unwrap();
    let y = builder
        .add_paired_adapter(east, NodeSpec::new("y", "3"), MockExchange::new(1, &[0]), x)
        .unwrap();
    // bob has no link at all, so y-router cannot reach him
    let bob = builder.add_host(east, NodeSpec::new("bob", "4")).unwrap();
    builder.connect(alice, x, LinkParams::default()).unwrap();
    builder.bind_adapter(alice, x).unwrap();
    let world = builder.build();
    let topology = world.topology();
    topology.on_qkd_established(x, key()).unwrap();
    topology.on_qkd_established(y, key()).unwrap();

    world.send(alice, "stranded", bob).unwrap();
    world.run_ticks(5);

    let errors = sink.of_kind(EventKind::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].node, "y-router");
    assert_eq!(
        errors[0].payload["error"],
        "connection not found between y-router and bob"
    );
    assert_eq!(sink.count(EventKind::Decrypted), 1);
    assert!(topology.delivered(bob).unwrap().is_empty());
}

#[test]
fn test_event_hooks_may_inspect_adapter() {
    init_tracing();
    let (done, seen_rx) = mpsc::channel();
    std::thread::spawn(move || {
        let shared: Arc<OnceLock<Weak<Topology>>> = Arc::default();
        let seen: Arc<Mutex<Vec<(EventKind, AdapterPhase)>>> = Arc::default();

        let mut builder = TopologyBuilder::new(SimConfig::default());
        let lan = builder.add_network("lan", None);
        let alice = builder.add_host(lan, NodeSpec::new("alice", "1")).unwrap();
        let bob = builder.add_host(lan, NodeSpec::new("bob", "2")).unwrap();
        let x = builder
            .add_adapter(lan, NodeSpec::new("x", "3"), MockExchange::new(0, &[1]))
            .unwrap();
        let y = builder
            .add_paired_adapter(lan, NodeSpec::new("y", "4"), MockExchange::new(1, &[0]), x)
            .unwrap();
        builder.connect(alice, x, LinkParams::default()).unwrap();
        builder.connect(bob, y, LinkParams::default()).unwrap();
        builder.bind_adapter(alice, x).unwrap();
        builder.bind_adapter(bob, y).unwrap();

        let hook_topology = shared.clone();
        let hook_seen = seen.clone();
        builder
            .on_network_event(
                lan,
                Arc::new(move |event: &SimEvent| {
                    if event.node != "x" {
                        return;
                    }
                    let Some(topology) = hook_topology.get().and_then(Weak::upgrade) else {
                        return;
                    };
                    let phase = topology.adapter_status(x).unwrap().phase;
                    hook_seen.lock().unwrap().push((event.kind, phase));
                }),
            )
            .unwrap();

        let world = builder.build();
        shared.set(Arc::downgrade(world.topology())).unwrap();

        world.send(alice, "hi", bob).unwrap();
        world.run_ticks(2);
        world.topology().on_qkd_established(x, key()).unwrap();
        world.topology().on_qkd_established(y, key()).unwrap();
        assert!(world.run_until(10, |t| !t.delivered(bob).unwrap().is_empty()));

        let seen = seen.lock().unwrap().clone();
        done.send(seen).unwrap();
    });

    let seen = seen_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("hook calling back into the adapter never returned");
    assert!(seen.contains(&(EventKind::QkdInitiated, AdapterPhase::AwaitingQkd)));
    assert!(seen.contains(&(EventKind::PacketHeld, AdapterPhase::AwaitingQkd)));
    assert!(seen.contains(&(EventKind::QkdEstablished, AdapterPhase::Keyed)));
    assert!(seen.contains(&(EventKind::Encrypted, AdapterPhase::Keyed)));
}
