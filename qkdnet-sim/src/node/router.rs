//! Classical routers and the routing seam.
//!
//! A router drains its buffers each tick and hands every packet to its
//! [`RouteHook`]. The hook is chosen when the router is registered and never
//! swapped afterwards: plain routers get [`ShortestPath`], routers owned by a
//! quantum adapter get an interceptor that feeds the adapter's protocol.

use std::fmt;
use std::sync::Arc;

use serde_json::json;

use qkdnet_core::{EventKind, NetworkError, NetworkResult, NodeId, Packet};

use crate::topology::Topology;

/// Decides what a router does with a packet.
pub trait RouteHook: Send + Sync {
    /// Handle one packet taken from `router`'s buffers.
    fn route_packet(&self, topology: &Topology, router: NodeId, packet: Packet)
        -> NetworkResult<()>;
}

/// Default routing: accept packets addressed to the router, relay everything
/// else one hop along the shortest path to its immediate target.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortestPath;

impl RouteHook for ShortestPath {
    fn route_packet(
        &self,
        topology: &Topology,
        router: NodeId,
        packet: Packet,
    ) -> NetworkResult<()> {
        if packet.to() == router {
            tracing::debug!(node = %topology.name(router), packet = %packet.id(), "packet consumed by router");
            topology.emit(
                router,
                EventKind::PacketReceived,
                json!({ "packet": packet.id().0, "from": topology.name(packet.from()) }),
            );
            return Ok(());
        }

        let path = topology.get_path(router, packet.to());
        if path.len() <= 1 {
            return Err(NetworkError::NotConnected {
                from: topology.name(router),
                to: topology.name(packet.to()),
            });
        }
        let next_hop = path[1];
        tracing::trace!(
            node = %topology.name(router),
            next_hop = %topology.name(next_hop),
            packet = %packet.id(),
            "routing"
        );
        topology.emit(
            router,
            EventKind::Routed,
            json!({
                "packet": packet.id().0,
                "to": topology.name(packet.to()),
                "next_hop": topology.name(next_hop),
            }),
        );
        topology.transmit(router, next_hop, packet.with_hop(router))
    }
}

/// Hands every packet reaching an adapter's router to the adapter.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AdapterIntercept {
    pub(crate) adapter: NodeId,
}

impl RouteHook for AdapterIntercept {
    fn route_packet(
        &self,
        topology: &Topology,
        _router: NodeId,
        packet: Packet,
    ) -> NetworkResult<()> {
        topology
            .adapter_role(self.adapter)?
            .receive(topology, self.adapter, packet)
    }
}

pub(crate) struct RouterRole {
    pub(crate) hook: Arc<dyn RouteHook>,
    /// Adapter owning this router. Owned routers never relay transit traffic.
    pub(crate) owner: Option<NodeId>,
}

impl fmt::Debug for RouterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterRole")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl RouterRole {
    pub(crate) fn forward(&self, topology: &Topology, me: NodeId) {
        for (_, packet) in topology.slot(me).map(|s| s.inbox.drain()).unwrap_or_default() {
            if let Err(err) = self.hook.route_packet(topology, me, packet) {
                topology.report_failure(me, &err);
            }
        }
    }
}
