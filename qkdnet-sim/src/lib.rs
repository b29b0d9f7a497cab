//! # qkdnet simulation engine
//!
//! Tick-driven simulation of classical networks whose traffic may cross
//! QKD-gated links.
//!
//! ## Core Components
//!
//! - [`TopologyBuilder`]: registers zones, networks, hosts, routers,
//!   adapters and connections, then freezes them into a [`World`]
//! - [`Topology`]: the central arena every node, connection and network
//!   lives in; nodes refer to each other by [`NodeId`](qkdnet_core::NodeId)
//! - [`World`]: the scheduler. [`World::step`] advances every network by one
//!   tick deterministically; [`World::start`] and [`World::start_sequential`]
//!   pace ticks on tokio tasks until [`World::stop`]
//! - Quantum adapters gate data behind key agreement with their partner and
//!   encrypt it with the shared key; [`QuantumLayer`] provides a simulated
//!   BB84 collaborator for them
//!
//! ## Quick Start
//!
//! ```ignore
//! use qkdnet_sim::{LinkParams, NodeSpec, SimConfig, TopologyBuilder};
//!
//! let mut builder = TopologyBuilder::new(SimConfig::default());
//! let lan = builder.add_network("lan", None);
//! let alice = builder.add_host(lan, NodeSpec::new("alice", "10.0.0.1"))?;
//! let bob = builder.add_host(lan, NodeSpec::new("bob", "10.0.0.2"))?;
//! builder.connect(alice, bob, LinkParams::default())?;
//!
//! let world = builder.build();
//! world.send(alice, "hello", bob)?;
//! world.step();
//! assert_eq!(world.topology().delivered(bob)?.len(), 1);
//! ```
//!
//! ## Tick Semantics
//!
//! A connection delivers into the receiver's per-sender buffer immediately,
//! but the receiver only looks at its buffers during its own `forward`. One
//! hop therefore costs at most one tick, and packets from one sender to one
//! receiver are always handled in the order they were sent.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Append-only audit trail.
pub mod audit;
/// Simulation and topology configuration.
pub mod config;
/// Event sinks provided by the engine.
pub mod events;
/// Host, router and adapter behaviour.
pub mod node;
/// Simulated quantum layer.
pub mod quantum;
/// Topology arena, builder, connections and routing.
pub mod topology;
/// Networks and the world scheduler.
pub mod world;

pub use audit::AuditLog;
pub use config::{QkdConfig, SimConfig, TopologyConfig};
pub use events::ChannelSink;
pub use node::{AdapterPhase, AdapterStatus, NodeInfo, NodeKind, RouteHook, ShortestPath};
pub use quantum::{QuantumChannel, QuantumEndpoint, QuantumLayer};
pub use topology::{
    Connection, CostFunction, EventHook, LinkParams, NetworkInfo, NodeSpec, Topology,
    TopologyBuilder, ZoneInfo, ZoneType,
};
pub use world::{Network, SimClock, World};

pub use qkdnet_core::{
    AdapterLink, ConnectionId, EventKind, EventSink, KeyExchange, Location, NetworkError,
    NetworkId, NetworkResult, NodeId, NullSink, Packet, PacketId, PacketKind, QuantumHostId,
    RecordingSink, SharedKey, SimEvent, SinkError, ZoneId,
};
