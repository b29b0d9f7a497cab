//! # qkdnet
//!
//! Simulation of classical networks whose traffic crosses QKD-gated links.
//!
//! This crate re-exports the building blocks:
//!
//! - [`core`]: identifiers, packets, errors, the event-sink and
//!   key-exchange seams, and the toy stream cipher
//! - [`sim`]: the topology arena, hosts, routers, quantum adapters, the
//!   world scheduler and the simulated BB84 layer
//!
//! The most common types are also available at the crate root.

#![deny(missing_docs)]

pub use qkdnet_core as core;
pub use qkdnet_sim as sim;

pub use qkdnet_sim::{
    AuditLog, ChannelSink, CostFunction, EventKind, EventSink, LinkParams, NetworkError,
    NetworkResult, NodeId, NodeSpec, NullSink, Packet, QkdConfig, QuantumLayer, RecordingSink,
    SimConfig, SimEvent, Topology, TopologyBuilder, TopologyConfig, World,
};
