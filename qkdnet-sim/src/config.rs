//! Simulation and topology configuration.
//!
//! [`SimConfig`] tunes the engine, [`QkdConfig`] the simulated key
//! agreement. [`TopologyConfig`] describes a whole world as JSON:
//!
//! ```json
//! {
//!   "zones": [{ "name": "city", "kind": "commercial" }],
//!   "networks": [{ "name": "west", "zone": "city" }, { "name": "east" }],
//!   "quantum_hosts": ["qx", "qy"],
//!   "quantum_channels": [{ "a": "qx", "b": "qy", "length": 10000, "loss_per_km": 0.01 }],
//!   "hosts": [{ "name": "alice", "address": "10.0.0.1", "network": "west" }],
//!   "routers": [{ "name": "r1", "address": "10.0.0.254", "network": "west" }],
//!   "adapters": [{ "name": "x", "address": "10.0.1.1", "network": "west", "quantum_host": "qx" }],
//!   "connections": [{ "a": "alice", "b": "r1" }, { "a": "r1", "b": "x", "cost": 5 }],
//!   "pairs": [["x", "y"]],
//!   "bindings": [{ "host": "alice", "adapter": "x" }]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use qkdnet_core::{
    EventSink, KeyExchange, NetworkError, NetworkId, NetworkResult, QuantumHostId, ZoneId,
};

use crate::audit::AuditLog;
use crate::quantum::{QuantumEndpoint, QuantumLayer};
use crate::topology::{CostFunction, LinkParams, NodeSpec, TopologyBuilder, ZoneType};
use crate::world::World;

/// Parameters of the simulated BB84 exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QkdConfig {
    /// Length of the derived key in bits.
    pub key_length: usize,
    /// Qubits sent per round.
    pub qubits_per_round: usize,
    /// Rounds attempted before giving up.
    pub max_rounds: u32,
    /// Base seed for the endpoints' generators. Each endpoint adds its id.
    pub seed: u64,
}

impl Default for QkdConfig {
    fn default() -> Self {
        Self {
            key_length: 128,
            qubits_per_round: 512,
            max_rounds: 8,
            seed: 0,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Ticks per second for the paced schedulers.
    pub tick_rate: f64,
    /// Edge weight used for path computation.
    pub cost: CostFunction,
    /// Key agreement parameters.
    pub qkd: QkdConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate: 1.5,
            cost: CostFunction::HopCount,
            qkd: QkdConfig::default(),
        }
    }
}

impl SimConfig {
    /// Fast ticking and short keys, for tests and demos.
    pub fn fast() -> Self {
        Self {
            tick_rate: 100.0,
            cost: CostFunction::HopCount,
            qkd: QkdConfig {
                key_length: 32,
                qubits_per_round: 128,
                ..QkdConfig::default()
            },
        }
    }

    /// Same configuration with a different cost function.
    pub fn with_cost(mut self, cost: CostFunction) -> Self {
        self.cost = cost;
        self
    }
}

/// A zone entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Unique zone name.
    pub name: String,
    /// Zone purpose.
    #[serde(default)]
    pub kind: ZoneType,
    /// Enclosing zone, declared earlier in the list.
    #[serde(default)]
    pub parent: Option<String>,
}

/// A network entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Unique network name.
    pub name: String,
    /// Zone the network belongs to.
    #[serde(default)]
    pub zone: Option<String>,
}

/// A host, router or adapter entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node name.
    pub name: String,
    /// Network address.
    #[serde(default)]
    pub address: String,
    /// Owning network.
    pub network: String,
    /// Position as `[x, y]`.
    #[serde(default)]
    pub location: (i32, i32),
    /// Quantum endpoint backing an adapter. Ignored for hosts and routers.
    #[serde(default)]
    pub quantum_host: Option<String>,
}

/// A quantum channel entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantumChannelConfig {
    /// First quantum host.
    pub a: String,
    /// Second quantum host.
    pub b: String,
    /// Length in metres.
    #[serde(default)]
    pub length: f64,
    /// Per-kilometre qubit loss probability.
    #[serde(default)]
    pub loss_per_km: f64,
}

/// A connection entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// First node.
    pub a: String,
    /// Second node.
    pub b: String,
    /// Nominal bandwidth.
    #[serde(default = "default_bandwidth")]
    pub bandwidth: u32,
    /// Administrative cost.
    #[serde(default = "default_cost")]
    pub cost: u32,
}

fn default_bandwidth() -> u32 {
    LinkParams::default().bandwidth
}

fn default_cost() -> u32 {
    LinkParams::default().cost
}

/// A host-to-adapter binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Host whose traffic is tunnelled.
    pub host: String,
    /// Adapter it goes through.
    pub adapter: String,
}

/// A pinned default gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host being configured.
    pub host: String,
    /// Its gateway.
    pub gateway: String,
}

/// JSON description of a complete world.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Engine configuration.
    pub sim: SimConfig,
    /// Zones, parents first.
    pub zones: Vec<ZoneConfig>,
    /// Networks.
    pub networks: Vec<NetworkConfig>,
    /// Quantum endpoint names.
    pub quantum_hosts: Vec<String>,
    /// Quantum channels between endpoints.
    pub quantum_channels: Vec<QuantumChannelConfig>,
    /// Classical hosts.
    pub hosts: Vec<NodeConfig>,
    /// Classical routers.
    pub routers: Vec<NodeConfig>,
    /// Quantum adapters.
    pub adapters: Vec<NodeConfig>,
    /// Classical connections.
    pub connections: Vec<ConnectionConfig>,
    /// Adapter pairings.
    pub pairs: Vec<(String, String)>,
    /// Host-to-adapter bindings.
    pub bindings: Vec<BindingConfig>,
    /// Pinned default gateways.
    pub gateways: Vec<GatewayConfig>,
}

fn unknown(what: &str, name: &str) -> NetworkError {
    NetworkError::Config {
        message: format!("unknown {what} {name}"),
    }
}

impl TopologyConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> NetworkResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> NetworkResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Build the described world.
    ///
    /// Also returns the quantum layer so callers can inspect endpoints.
    pub fn into_world(
        self,
        sink: Arc<dyn EventSink>,
        audit: AuditLog,
    ) -> NetworkResult<(World, QuantumLayer)> {
        let layer = QuantumLayer::new(self.sim.qkd.clone());
        let mut builder = TopologyBuilder::new(self.sim.clone())
            .with_sink(sink)
            .with_audit(audit);

        let mut zones: HashMap<&str, ZoneId> = HashMap::new();
        for zone in &self.zones {
            let parent = match &zone.parent {
                Some(parent) => Some(*zones.get(parent.as_str()).ok_or_else(|| unknown("zone", parent))?),
                None => None,
            };
            let id = builder.add_zone(zone.name.clone(), zone.kind, parent)?;
            zones.insert(&zone.name, id);
        }

        let mut networks: HashMap<&str, NetworkId> = HashMap::new();
        for network in &self.networks {
            let zone = match &network.zone {
                Some(zone) => Some(*zones.get(zone.as_str()).ok_or_else(|| unknown("zone", zone))?),
                None => None,
            };
            networks.insert(&network.name, builder.add_network(network.name.clone(), zone));
        }

        let mut endpoints: HashMap<&str, Arc<QuantumEndpoint>> = HashMap::new();
        for name in &self.quantum_hosts {
            endpoints.insert(name, layer.add_endpoint(name.clone()));
        }
        let endpoint_id = |name: &str| -> NetworkResult<QuantumHostId> {
            endpoints
                .get(name)
                .map(|endpoint| endpoint.id())
                .ok_or_else(|| unknown("quantum host", name))
        };
        for channel in &self.quantum_channels {
            layer.add_channel(
                endpoint_id(&channel.a)?,
                endpoint_id(&channel.b)?,
                channel.length,
                channel.loss_per_km,
            )?;
        }

        let node_spec = |node: &NodeConfig| -> NetworkResult<(NetworkId, NodeSpec)> {
            let network = *networks
                .get(node.network.as_str())
                .ok_or_else(|| unknown("network", &node.network))?;
            let (x, y) = node.location;
            Ok((network, NodeSpec::new(node.name.clone(), node.address.clone()).at(x, y)))
        };
        for host in &self.hosts {
            let (network, spec) = node_spec(host)?;
            builder.add_host(network, spec)?;
        }
        for router in &self.routers {
            let (network, spec) = node_spec(router)?;
            builder.add_router(network, spec)?;
        }
        for adapter in &self.adapters {
            let (network, spec) = node_spec(adapter)?;
            let quantum_host = adapter.quantum_host.as_deref().ok_or_else(|| NetworkError::Config {
                message: format!("adapter {} has no quantum_host", adapter.name),
            })?;
            let endpoint = endpoints
                .get(quantum_host)
                .cloned()
                .ok_or_else(|| unknown("quantum host", quantum_host))?;
            builder.add_adapter(network, spec, endpoint)?;
        }

        for (a, b) in &self.pairs {
            let a = builder.node_by_name(a)?;
            let b = builder.node_by_name(b)?;
            builder.pair_adapters(a, b)?;
        }
        for connection in &self.connections {
            let a = builder.node_by_name(&connection.a)?;
            let b = builder.node_by_name(&connection.b)?;
            builder.connect(a, b, LinkParams::new(connection.bandwidth, connection.cost))?;
        }
        for binding in &self.bindings {
            let host = builder.node_by_name(&binding.host)?;
            let adapter = builder.node_by_name(&binding.adapter)?;
            builder.bind_adapter(host, adapter)?;
        }
        for gateway in &self.gateways {
            let host = builder.node_by_name(&gateway.host)?;
            let via = builder.node_by_name(&gateway.gateway)?;
            builder.set_default_gateway(host, via)?;
        }

        tracing::info!(
            hosts = self.hosts.len(),
            routers = self.routers.len(),
            adapters = self.adapters.len(),
            "topology loaded"
        );
        Ok((builder.build(), layer))
    }
}
