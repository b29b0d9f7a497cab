//! Host, router and adapter behaviour.
//!
//! Every node is a slot in the [`Topology`] arena with a static
//! [`NodeInfo`], an inbound buffer per neighbour and a role. Roles hold the
//! node's mutable state behind their own locks, so each node is its own
//! mutual-exclusion domain.

mod adapter;
mod host;
mod router;

pub use adapter::{AdapterPhase, AdapterStatus};
pub use router::{RouteHook, ShortestPath};

pub(crate) use adapter::{AdapterHandle, AdapterRole};
pub(crate) use host::{DataCallback, HostRole};
pub(crate) use router::{AdapterIntercept, RouterRole};

use serde::{Deserialize, Serialize};

use qkdnet_core::{Location, NetworkId, NodeId, ZoneId};

use crate::topology::Topology;

/// Role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Originates and consumes application data.
    ClassicalHost,
    /// Computes paths and relays packets.
    ClassicalRouter,
    /// Bridges a classical router to the quantum layer.
    QuantumAdapter,
}

/// Static description of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node handle.
    pub id: NodeId,
    /// Unique name.
    pub name: String,
    /// Network address.
    pub address: String,
    /// Position.
    pub location: Location,
    /// Owning network.
    pub network: NetworkId,
    /// Zone, if any.
    pub zone: Option<ZoneId>,
    /// Role.
    pub kind: NodeKind,
}

pub(crate) enum NodeRole {
    Host(HostRole),
    Router(RouterRole),
    Adapter(AdapterRole),
}

/// Drain a node's inbound buffers and act on every packet.
///
/// Failures are reported and stay local to the packet that caused them.
pub(crate) fn forward(topology: &Topology, id: NodeId) {
    let Ok(slot) = topology.slot(id) else {
        return;
    };
    match &slot.role {
        NodeRole::Host(host) => host.forward(topology, id),
        NodeRole::Router(router) => router.forward(topology, id),
        NodeRole::Adapter(adapter) => forward(topology, adapter.local_router),
    }
}
