//! Topology arena.
//!
//! [`Topology`] owns every node, connection, network and zone of a
//! simulation. Participants refer to each other through arena handles, so
//! the structure has no ownership cycles and can be shared across tick
//! drivers behind one `Arc`. After [`TopologyBuilder::build`] the structure
//! is frozen; only per-node state and inbound buffers change.

mod builder;
mod connection;
mod routing;

pub use builder::{NodeSpec, TopologyBuilder};
pub use connection::{Connection, LinkParams};
pub use routing::CostFunction;

pub(crate) use connection::Inbox;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use qkdnet_core::{
    EventKind, EventSink, NetworkError, NetworkId, NetworkResult, NodeId, Packet, PacketId,
    SharedKey, SimEvent, ZoneId,
};

use crate::{
    audit::AuditLog,
    config::SimConfig,
    node::{AdapterHandle, AdapterRole, AdapterStatus, HostRole, NodeInfo, NodeRole},
    world::SimClock,
};

/// Observer invoked for every event of the networks it is attached to.
pub type EventHook = Arc<dyn Fn(&SimEvent) + Send + Sync>;

/// Purpose of a zone. Descriptive only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    /// Homes and small offices.
    #[default]
    Residential,
    /// Businesses.
    Commercial,
    /// Plants and facilities.
    Industrial,
    /// Restricted sites.
    Secure,
}

/// Hierarchical grouping of networks. Carries no forwarding semantics.
pub struct ZoneInfo {
    /// Zone handle.
    pub id: ZoneId,
    /// Zone name.
    pub name: String,
    /// Zone purpose.
    pub kind: ZoneType,
    /// Enclosing zone, if any.
    pub parent: Option<ZoneId>,
    /// Networks registered in this zone or any of its children.
    pub networks: Vec<NetworkId>,
    pub(crate) hook: Option<EventHook>,
}

impl fmt::Debug for ZoneInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZoneInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("parent", &self.parent)
            .field("networks", &self.networks)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// A set of nodes ticked together.
pub struct NetworkInfo {
    /// Network handle.
    pub id: NetworkId,
    /// Network name.
    pub name: String,
    /// Zone the network was registered in.
    pub zone: Option<ZoneId>,
    /// Nodes in tick order. Adapter-owned routers are ticked by their adapter
    /// and do not appear here.
    pub nodes: Vec<NodeId>,
    pub(crate) hook: Option<EventHook>,
    /// Paced drivers currently ticking this network.
    pub(crate) drivers: AtomicUsize,
    pub(crate) ticks: AtomicU64,
}

impl fmt::Debug for NetworkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("zone", &self.zone)
            .field("nodes", &self.nodes)
            .field("drivers", &self.drivers.load(Ordering::Relaxed))
            .finish()
    }
}

pub(crate) struct NodeSlot {
    pub(crate) info: NodeInfo,
    pub(crate) inbox: Inbox,
    pub(crate) role: NodeRole,
}

/// The arena holding every participant of one simulation.
pub struct Topology {
    pub(crate) nodes: Vec<NodeSlot>,
    pub(crate) connections: Vec<Connection>,
    pub(crate) adjacency: Vec<Vec<qkdnet_core::ConnectionId>>,
    pub(crate) networks: Vec<NetworkInfo>,
    pub(crate) zones: Vec<ZoneInfo>,
    pub(crate) names: HashMap<String, NodeId>,
    pub(crate) config: SimConfig,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) audit: AuditLog,
    pub(crate) clock: SimClock,
    next_packet: AtomicU64,
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("nodes", &self.nodes.len())
            .field("connections", &self.connections.len())
            .field("networks", &self.networks)
            .field("zones", &self.zones)
            .field("clock", &self.clock.now())
            .finish()
    }
}

impl Topology {
    pub(crate) fn new(config: SimConfig, sink: Arc<dyn EventSink>, audit: AuditLog) -> Self {
        Self {
            nodes: Vec::new(),
            connections: Vec::new(),
            adjacency: Vec::new(),
            networks: Vec::new(),
            zones: Vec::new(),
            names: HashMap::new(),
            config,
            sink,
            audit,
            clock: SimClock::default(),
            next_packet: AtomicU64::new(0),
        }
    }

    /// Freeze the arena and hand every paired adapter's collaborator its
    /// callbacks.
    pub(crate) fn into_shared(self) -> Arc<Self> {
        let topology = Arc::new(self);
        let weak: Weak<Topology> = Arc::downgrade(&topology);
        for slot in &topology.nodes {
            if let NodeRole::Adapter(adapter) = &slot.role {
                let Some(partner) = adapter.partner else {
                    continue;
                };
                let Ok(partner_role) = topology.adapter_role(partner) else {
                    continue;
                };
                let link = Arc::new(AdapterHandle::new(weak.clone(), slot.info.id));
                adapter.quantum.attach(link, partner_role.quantum.id());
            }
        }
        topology
    }

    /// Configuration the topology was built with.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The world clock.
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// The audit trail.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// All networks in registration order.
    pub fn networks(&self) -> &[NetworkInfo] {
        &self.networks
    }

    /// All zones in registration order.
    pub fn zones(&self) -> &[ZoneInfo] {
        &self.zones
    }

    /// All connections.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Number of registered nodes, adapter-owned routers included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn slot(&self, id: NodeId) -> NetworkResult<&NodeSlot> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| NetworkError::NodeNotFound {
                name: id.to_string(),
            })
    }

    /// Static description of a node.
    pub fn node_info(&self, id: NodeId) -> NetworkResult<&NodeInfo> {
        self.slot(id).map(|slot| &slot.info)
    }

    /// Look a node up by its unique name.
    pub fn node_by_name(&self, name: &str) -> NetworkResult<NodeId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| NetworkError::NodeNotFound {
                name: name.to_string(),
            })
    }

    /// Name of a node, or its handle rendered as text if unknown.
    pub fn name(&self, id: NodeId) -> String {
        self.nodes
            .get(id.index())
            .map(|slot| slot.info.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub(crate) fn host_role(&self, id: NodeId) -> NetworkResult<&HostRole> {
        match &self.slot(id)?.role {
            NodeRole::Host(host) => Ok(host),
            _ => Err(self.wrong_role(id, "host")),
        }
    }

    pub(crate) fn adapter_role(&self, id: NodeId) -> NetworkResult<&AdapterRole> {
        match &self.slot(id)?.role {
            NodeRole::Adapter(adapter) => Ok(adapter),
            _ => Err(self.wrong_role(id, "quantum adapter")),
        }
    }

    pub(crate) fn wrong_role(&self, id: NodeId, expected: &'static str) -> NetworkError {
        NetworkError::WrongRole {
            node: self.name(id),
            expected,
        }
    }

    /// Connection joining `a` and `b`, if any.
    pub fn connection_between(&self, a: NodeId, b: NodeId) -> Option<&Connection> {
        self.adjacency
            .get(a.index())?
            .iter()
            .map(|id| &self.connections[id.index()])
            .find(|conn| conn.other(a) == Some(b))
    }

    /// Direct neighbours of a node, in connection order.
    pub fn neighbors(&self, id: NodeId) -> Vec<NodeId> {
        self.adjacency
            .get(id.index())
            .map(|conns| {
                conns
                    .iter()
                    .filter_map(|conn| self.connections[conn.index()].other(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Hand `packet` from `sender` to its neighbour `to`.
    ///
    /// Fails with [`NetworkError::NotConnected`] when no connection joins
    /// them.
    pub(crate) fn transmit(&self, sender: NodeId, to: NodeId, packet: Packet) -> NetworkResult<()> {
        let connection =
            self.connection_between(sender, to)
                .ok_or_else(|| NetworkError::NotConnected {
                    from: self.name(sender),
                    to: self.name(to),
                })?;
        connection.transmit(self, sender, packet)
    }

    /// Shortest path from `src` to `dst` under the configured cost function.
    ///
    /// Returns `[src]` when both are the same node and an empty path when
    /// `dst` is unreachable. Hosts and adapter-owned routers only appear as
    /// endpoints, never as transit hops.
    pub fn get_path(&self, src: NodeId, dst: NodeId) -> Vec<NodeId> {
        routing::shortest_path(self, src, dst, self.config.cost)
    }

    /// Number of packets waiting in a node's inbound buffers.
    pub fn buffered(&self, id: NodeId) -> usize {
        self.slot(id).map(|slot| slot.inbox.len()).unwrap_or(0)
    }

    /// Data packets a host has accepted, oldest first.
    pub fn delivered(&self, host: NodeId) -> NetworkResult<Vec<Packet>> {
        Ok(self.host_role(host)?.delivered())
    }

    /// The host's current default gateway.
    pub fn default_gateway(&self, host: NodeId) -> NetworkResult<Option<NodeId>> {
        Ok(self.host_role(host)?.default_gateway)
    }

    /// The router an adapter owns and intercepts.
    pub fn local_router(&self, adapter: NodeId) -> NetworkResult<NodeId> {
        Ok(self.adapter_role(adapter)?.local_router)
    }

    /// Snapshot of an adapter's protocol state.
    pub fn adapter_status(&self, adapter: NodeId) -> NetworkResult<AdapterStatus> {
        Ok(self.adapter_role(adapter)?.status())
    }

    /// Send application data from a host.
    pub fn send(
        &self,
        from: NodeId,
        data: impl Into<Vec<u8>>,
        destination: NodeId,
    ) -> NetworkResult<PacketId> {
        self.host_role(from)?.send(self, from, data.into(), destination)
    }

    /// Ask an adapter to start key agreement with its partner.
    pub fn initiate_qkd(&self, adapter: NodeId) -> NetworkResult<()> {
        self.adapter_role(adapter)?.initiate_qkd(self, adapter)
    }

    /// Deliver a derived key to an adapter, as its collaborator would.
    pub fn on_qkd_established(&self, adapter: NodeId, key: SharedKey) -> NetworkResult<()> {
        self.adapter_role(adapter)?
            .on_qkd_established(self, adapter, key);
        Ok(())
    }

    pub(crate) fn next_packet_id(&self) -> PacketId {
        PacketId(self.next_packet.fetch_add(1, Ordering::Relaxed))
    }

    /// Notify the event sink and the owning network's hook.
    ///
    /// Sink failures are logged and otherwise ignored.
    pub(crate) fn emit(&self, node: NodeId, kind: EventKind, payload: Value) {
        let event = SimEvent {
            kind,
            node: self.name(node),
            payload,
            timestamp: self.clock.now(),
        };
        if let Err(err) = self.sink.emit(&event) {
            tracing::warn!(error = %err, node = %event.node, ?kind, "event sink failed");
        }
        let hook = self
            .nodes
            .get(node.index())
            .and_then(|slot| self.networks.get(slot.info.network.index()))
            .and_then(|network| network.hook.as_ref());
        if let Some(hook) = hook {
            hook(&event);
        }
    }

    /// Log and publish a per-node failure without interrupting the tick.
    pub(crate) fn report_failure(&self, node: NodeId, err: &NetworkError) {
        tracing::error!(node = %self.name(node), error = %err, "node failed to handle packet");
        self.audit
            .append(format!("{} error: {}", self.name(node), err));
        self.emit(
            node,
            EventKind::Error,
            serde_json::json!({ "error": err.to_string() }),
        );
    }
}
