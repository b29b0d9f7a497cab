//! Registration of zones, networks, nodes and connections.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use qkdnet_core::{
    ConnectionId, EventKind, EventSink, KeyExchange, Location, NetworkError, NetworkId,
    NetworkResult, NodeId, Packet, ZoneId,
};

use super::{Connection, EventHook, Inbox, LinkParams, NetworkInfo, NodeSlot, Topology, ZoneInfo, ZoneType};
use crate::audit::AuditLog;
use crate::config::SimConfig;
use crate::node::{
    AdapterIntercept, AdapterRole, DataCallback, HostRole, NodeInfo, NodeKind, NodeRole,
    RouteHook, RouterRole, ShortestPath,
};
use crate::world::World;

/// Identity of a node being registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    /// Unique name.
    pub name: String,
    /// Network address.
    pub address: String,
    /// Position.
    pub location: Location,
    /// Zone override. Defaults to the owning network's zone.
    pub zone: Option<ZoneId>,
}

impl NodeSpec {
    /// A node at the origin, in its network's zone.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            location: Location::default(),
            zone: None,
        }
    }

    /// Place the node at `(x, y)`.
    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.location = Location::new(x, y);
        self
    }

    /// Put the node in `zone`.
    pub fn in_zone(mut self, zone: ZoneId) -> Self {
        self.zone = Some(zone);
        self
    }
}

/// Builds a [`Topology`] and hands it to a [`World`].
///
/// # Examples
///
/// ```
/// use qkdnet_sim::{LinkParams, NodeSpec, SimConfig, TopologyBuilder};
///
/// let mut builder = TopologyBuilder::new(SimConfig::default());
/// let net = builder.add_network("lan", None);
/// let alice = builder.add_host(net, NodeSpec::new("alice", "10.0.0.1")).unwrap();
/// let bob = builder.add_host(net, NodeSpec::new("bob", "10.0.0.2")).unwrap();
/// builder.connect(alice, bob, LinkParams::default()).unwrap();
///
/// let world = builder.build();
/// world.send(alice, "hello", bob).unwrap();
/// world.step();
/// assert_eq!(world.topology().delivered(bob).unwrap()[0].payload(), b"hello");
/// ```
pub struct TopologyBuilder {
    topology: Topology,
    network_hooks: Vec<Option<EventHook>>,
    pinned_gateways: HashSet<NodeId>,
}

impl TopologyBuilder {
    /// Empty topology with no event sink and no audit trail.
    pub fn new(config: SimConfig) -> Self {
        Self {
            topology: Topology::new(config, Arc::new(qkdnet_core::NullSink), AuditLog::disabled()),
            network_hooks: Vec::new(),
            pinned_gateways: HashSet::new(),
        }
    }

    /// Send simulation events to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.topology.sink = sink;
        self
    }

    /// Append audit lines to `audit`.
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.topology.audit = audit;
        self
    }

    /// Register a zone, optionally nested in `parent`.
    pub fn add_zone(
        &mut self,
        name: impl Into<String>,
        kind: ZoneType,
        parent: Option<ZoneId>,
    ) -> NetworkResult<ZoneId> {
        if let Some(parent) = parent {
            self.zone(parent)?;
        }
        let id = ZoneId::new(self.topology.zones.len() as u32);
        self.topology.zones.push(ZoneInfo {
            id,
            name: name.into(),
            kind,
            parent,
            networks: Vec::new(),
            hook: None,
        });
        Ok(id)
    }

    /// Observe every event of the networks in `zone` and its children.
    ///
    /// A hook on a nested zone or on the network itself takes precedence.
    pub fn on_zone_event(&mut self, zone: ZoneId, hook: EventHook) -> NetworkResult<()> {
        self.zone(zone)?;
        self.topology.zones[zone.index()].hook = Some(hook);
        Ok(())
    }

    /// Observe every event of one network.
    pub fn on_network_event(&mut self, network: NetworkId, hook: EventHook) -> NetworkResult<()> {
        self.network(network)?;
        self.network_hooks[network.index()] = Some(hook);
        Ok(())
    }

    /// Register a network. An unknown zone leaves the network unzoned.
    pub fn add_network(&mut self, name: impl Into<String>, zone: Option<ZoneId>) -> NetworkId {
        let zone = zone.filter(|z| z.index() < self.topology.zones.len());
        let id = NetworkId::new(self.topology.networks.len() as u32);
        let mut cursor = zone;
        while let Some(z) = cursor {
            let info = &mut self.topology.zones[z.index()];
            info.networks.push(id);
            cursor = info.parent;
        }
        self.topology.networks.push(NetworkInfo {
            id,
            name: name.into(),
            zone,
            nodes: Vec::new(),
            hook: None,
            drivers: Default::default(),
            ticks: Default::default(),
        });
        self.network_hooks.push(None);
        id
    }

    /// Register a classical host.
    pub fn add_host(&mut self, network: NetworkId, spec: NodeSpec) -> NetworkResult<NodeId> {
        self.add_node(network, spec, NodeKind::ClassicalHost, NodeRole::Host(HostRole::new()), true)
    }

    /// Register a classical router with shortest-path forwarding.
    pub fn add_router(&mut self, network: NetworkId, spec: NodeSpec) -> NetworkResult<NodeId> {
        self.add_router_with_hook(network, spec, Arc::new(ShortestPath))
    }

    /// Register a classical router with custom forwarding.
    pub fn add_router_with_hook(
        &mut self,
        network: NetworkId,
        spec: NodeSpec,
        hook: Arc<dyn RouteHook>,
    ) -> NetworkResult<NodeId> {
        let role = NodeRole::Router(RouterRole { hook, owner: None });
        self.add_node(network, spec, NodeKind::ClassicalRouter, role, true)
    }

    /// Register a quantum adapter backed by `quantum`.
    ///
    /// The adapter owns a new router named `<name>-router` at the same
    /// address. Connections made to the adapter attach to that router.
    pub fn add_adapter(
        &mut self,
        network: NetworkId,
        spec: NodeSpec,
        quantum: Arc<dyn KeyExchange>,
    ) -> NetworkResult<NodeId> {
        let router_spec = NodeSpec {
            name: format!("{}-router", spec.name),
            ..spec.clone()
        };
        self.check_name(&spec.name)?;
        self.check_name(&router_spec.name)?;

        // Handles are sequential, so the adapter takes the slot after its router.
        let adapter = NodeId::new(self.topology.nodes.len() as u32 + 1);
        let router_role = NodeRole::Router(RouterRole {
            hook: Arc::new(AdapterIntercept { adapter }),
            owner: Some(adapter),
        });
        let router =
            self.add_node(network, router_spec, NodeKind::ClassicalRouter, router_role, false)?;
        let role = NodeRole::Adapter(AdapterRole::new(router, quantum));
        self.add_node(network, spec, NodeKind::QuantumAdapter, role, true)
    }

    /// Register a quantum adapter and pair it with `partner` straight away.
    ///
    /// Fails with [`NetworkError::QuantumChannelDoesNotExist`] before
    /// registering anything when the collaborators share no channel.
    pub fn add_paired_adapter(
        &mut self,
        network: NetworkId,
        spec: NodeSpec,
        quantum: Arc<dyn KeyExchange>,
        partner: NodeId,
    ) -> NetworkResult<NodeId> {
        let partner_role = self.adapter(partner)?;
        if let Some(paired) = partner_role.partner {
            return Err(NetworkError::PairAdapterAlreadyExists {
                adapter: self.topology.name(partner),
                paired: self.topology.name(paired),
            });
        }
        if !quantum.channel_exists(partner_role.quantum.id()) {
            return Err(NetworkError::QuantumChannelDoesNotExist { adapter: spec.name });
        }
        let adapter = self.add_adapter(network, spec, quantum)?;
        self.pair_adapters(adapter, partner)?;
        Ok(adapter)
    }

    /// Pair two adapters and link their routers.
    ///
    /// Pairing happens once: if either side already has a partner the call
    /// fails with [`NetworkError::PairAdapterAlreadyExists`] and nothing
    /// changes.
    pub fn pair_adapters(&mut self, a: NodeId, b: NodeId) -> NetworkResult<()> {
        for (me, other) in [(a, b), (b, a)] {
            if let Some(paired) = self.adapter(me)?.partner {
                return Err(NetworkError::PairAdapterAlreadyExists {
                    adapter: self.topology.name(me),
                    paired: self.topology.name(paired),
                });
            }
            let peer = self.adapter(other)?.quantum.id();
            if !self.adapter(me)?.quantum.channel_exists(peer) {
                return Err(NetworkError::QuantumChannelDoesNotExist {
                    adapter: self.topology.name(me),
                });
            }
        }
        if a == b {
            return Err(NetworkError::Config {
                message: format!("adapter {} cannot pair with itself", self.topology.name(a)),
            });
        }

        let router_a = self.adapter(a)?.local_router;
        let router_b = self.adapter(b)?.local_router;
        if self.topology.connection_between(router_a, router_b).is_none() {
            self.link(router_a, router_b, LinkParams::default());
        }
        self.adapter_mut(a)?.partner = Some(b);
        self.adapter_mut(b)?.partner = Some(a);
        tracing::debug!(a = %self.topology.name(a), b = %self.topology.name(b), "adapters paired");
        Ok(())
    }

    /// Route a host's outgoing data through `adapter`.
    pub fn bind_adapter(&mut self, host: NodeId, adapter: NodeId) -> NetworkResult<()> {
        self.adapter(adapter)?;
        self.host_mut(host)?.adapter = Some(adapter);
        Ok(())
    }

    /// Connect two nodes. Adapters are connected through their routers.
    ///
    /// A host's default gateway follows its connections: the first
    /// connected router, or the first connected peer if it has no router.
    pub fn connect(&mut self, a: NodeId, b: NodeId, params: LinkParams) -> NetworkResult<ConnectionId> {
        let a = self.attachment_point(a)?;
        let b = self.attachment_point(b)?;
        if a == b {
            return Err(NetworkError::Config {
                message: format!("cannot connect {} to itself", self.topology.name(a)),
            });
        }
        if self.topology.connection_between(a, b).is_some() {
            return Err(NetworkError::Config {
                message: format!(
                    "{} and {} are already connected",
                    self.topology.name(a),
                    self.topology.name(b)
                ),
            });
        }
        Ok(self.link(a, b, params))
    }

    /// Pin a host's default gateway. Later connections no longer change it.
    pub fn set_default_gateway(&mut self, host: NodeId, gateway: NodeId) -> NetworkResult<()> {
        let gateway = self.attachment_point(gateway)?;
        self.host_mut(host)?.default_gateway = Some(gateway);
        self.pinned_gateways.insert(host);
        Ok(())
    }

    /// Invoke `callback` with every data packet `host` accepts.
    pub fn on_data(
        &mut self,
        host: NodeId,
        callback: impl Fn(&Packet) + Send + Sync + 'static,
    ) -> NetworkResult<()> {
        let callback: DataCallback = Arc::new(callback);
        self.host_mut(host)?.on_data = Some(callback);
        Ok(())
    }

    /// Handle of a registered node.
    pub fn node_by_name(&self, name: &str) -> NetworkResult<NodeId> {
        self.topology.node_by_name(name)
    }

    /// The router an adapter owns.
    pub fn local_router(&self, adapter: NodeId) -> NetworkResult<NodeId> {
        Ok(self.adapter(adapter)?.local_router)
    }

    /// Freeze the topology and wrap it in a [`World`].
    pub fn build(mut self) -> World {
        for index in 0..self.topology.networks.len() {
            let hook = self.network_hooks[index].clone().or_else(|| {
                let mut cursor = self.topology.networks[index].zone;
                while let Some(zone) = cursor {
                    let info = &self.topology.zones[zone.index()];
                    if info.hook.is_some() {
                        return info.hook.clone();
                    }
                    cursor = info.parent;
                }
                None
            });
            self.topology.networks[index].hook = hook;
        }

        for slot in &self.topology.nodes {
            let info = &slot.info;
            self.topology.audit.append(format!(
                "{} created at {} ({:?})",
                info.name, info.address, info.kind
            ));
            self.topology.emit(
                info.id,
                EventKind::NodeCreated,
                json!({
                    "kind": info.kind,
                    "address": info.address,
                    "network": self.topology.networks[info.network.index()].name,
                    "location": info.location,
                }),
            );
        }
        tracing::debug!(
            nodes = self.topology.nodes.len(),
            connections = self.topology.connections.len(),
            networks = self.topology.networks.len(),
            "topology built"
        );
        World::new(self.topology)
    }

    fn add_node(
        &mut self,
        network: NetworkId,
        spec: NodeSpec,
        kind: NodeKind,
        role: NodeRole,
        ticked: bool,
    ) -> NetworkResult<NodeId> {
        self.check_name(&spec.name)?;
        let zone = spec.zone.or(self.network(network)?.zone);
        let id = NodeId::new(self.topology.nodes.len() as u32);
        self.topology.names.insert(spec.name.clone(), id);
        self.topology.nodes.push(NodeSlot {
            info: NodeInfo {
                id,
                name: spec.name,
                address: spec.address,
                location: spec.location,
                network,
                zone,
                kind,
            },
            inbox: Inbox::default(),
            role,
        });
        self.topology.adjacency.push(Vec::new());
        if ticked {
            self.topology.networks[network.index()].nodes.push(id);
        }
        Ok(id)
    }

    fn link(&mut self, a: NodeId, b: NodeId, params: LinkParams) -> ConnectionId {
        let id = ConnectionId::new(self.topology.connections.len() as u32);
        self.topology.connections.push(Connection { id, a, b, params });
        self.topology.adjacency[a.index()].push(id);
        self.topology.adjacency[b.index()].push(id);
        self.update_gateway(a, b);
        self.update_gateway(b, a);
        id
    }

    fn update_gateway(&mut self, host: NodeId, peer: NodeId) {
        if self.pinned_gateways.contains(&host) {
            return;
        }
        let peer_is_router =
            self.topology.nodes[peer.index()].info.kind == NodeKind::ClassicalRouter;
        let current_is_router = |topology: &Topology, gateway: NodeId| {
            topology.nodes[gateway.index()].info.kind == NodeKind::ClassicalRouter
        };
        let current = match &self.topology.nodes[host.index()].role {
            NodeRole::Host(role) => role.default_gateway,
            _ => return,
        };
        let replace = match current {
            None => true,
            Some(gateway) => peer_is_router && !current_is_router(&self.topology, gateway),
        };
        if replace {
            if let NodeRole::Host(role) = &mut self.topology.nodes[host.index()].role {
                role.default_gateway = Some(peer);
            }
        }
    }

    fn check_name(&self, name: &str) -> NetworkResult<()> {
        if self.topology.names.contains_key(name) {
            return Err(NetworkError::Config {
                message: format!("duplicate node name {name}"),
            });
        }
        Ok(())
    }

    fn attachment_point(&self, node: NodeId) -> NetworkResult<NodeId> {
        match &self.topology.slot(node)?.role {
            NodeRole::Adapter(adapter) => Ok(adapter.local_router),
            _ => Ok(node),
        }
    }

    fn zone(&self, zone: ZoneId) -> NetworkResult<&ZoneInfo> {
        self.topology
            .zones
            .get(zone.index())
            .ok_or_else(|| NetworkError::Config {
                message: format!("unknown zone {zone}"),
            })
    }

    fn network(&self, network: NetworkId) -> NetworkResult<&NetworkInfo> {
        self.topology
            .networks
            .get(network.index())
            .ok_or_else(|| NetworkError::Config {
                message: format!("unknown network {network}"),
            })
    }

    fn adapter(&self, id: NodeId) -> NetworkResult<&AdapterRole> {
        self.topology.adapter_role(id)
    }

    fn adapter_mut(&mut self, id: NodeId) -> NetworkResult<&mut AdapterRole> {
        let err = self.topology.wrong_role(id, "quantum adapter");
        match self.slot_mut(id)? {
            NodeRole::Adapter(adapter) => Ok(adapter),
            _ => Err(err),
        }
    }

    fn host_mut(&mut self, id: NodeId) -> NetworkResult<&mut HostRole> {
        let err = self.topology.wrong_role(id, "host");
        match self.slot_mut(id)? {
            NodeRole::Host(host) => Ok(host),
            _ => Err(err),
        }
    }

    fn slot_mut(&mut self, id: NodeId) -> NetworkResult<&mut NodeRole> {
        self.topology
            .nodes
            .get_mut(id.index())
            .map(|slot| &mut slot.role)
            .ok_or_else(|| NetworkError::NodeNotFound {
                name: id.to_string(),
            })
    }
}
