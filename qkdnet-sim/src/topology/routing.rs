//! Path computation over the connection graph.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};

use qkdnet_core::NodeId;

use super::{Connection, Topology};
use crate::node::NodeRole;

/// Edge weight used by routers when computing shortest paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostFunction {
    /// Every connection weighs 1.
    #[default]
    HopCount,
    /// The connection's declared cost, at least 1.
    Cost,
    /// Faster links are cheaper: `1_000_000 / bandwidth`, at least 1.
    InverseBandwidth,
}

impl CostFunction {
    /// Weight of one connection.
    pub fn weight(self, connection: &Connection) -> u64 {
        match self {
            CostFunction::HopCount => 1,
            CostFunction::Cost => u64::from(connection.params.cost.max(1)),
            CostFunction::InverseBandwidth => {
                (1_000_000 / u64::from(connection.params.bandwidth.max(1))).max(1)
            }
        }
    }
}

/// Only plain routers relay traffic for others.
fn is_transit(topology: &Topology, node: NodeId) -> bool {
    topology
        .nodes
        .get(node.index())
        .is_some_and(|slot| matches!(&slot.role, NodeRole::Router(router) if router.owner.is_none()))
}

/// Dijkstra from `src` to `dst`. Ties resolve towards lower node handles.
pub(super) fn shortest_path(
    topology: &Topology,
    src: NodeId,
    dst: NodeId,
    cost: CostFunction,
) -> Vec<NodeId> {
    if src.index() >= topology.nodes.len() || dst.index() >= topology.nodes.len() {
        return Vec::new();
    }
    if src == dst {
        return vec![src];
    }

    let mut dist: HashMap<NodeId, u64> = HashMap::from([(src, 0)]);
    let mut prev: HashMap<NodeId, NodeId> = HashMap::new();
    let mut heap = BinaryHeap::from([Reverse((0u64, src))]);

    while let Some(Reverse((d, node))) = heap.pop() {
        if node == dst {
            break;
        }
        if dist.get(&node).is_some_and(|best| d > *best) {
            continue;
        }
        if node != src && !is_transit(topology, node) {
            continue;
        }
        for conn_id in &topology.adjacency[node.index()] {
            let conn = &topology.connections[conn_id.index()];
            let Some(next) = conn.other(node) else {
                continue;
            };
            let candidate = d + cost.weight(conn);
            if dist.get(&next).map_or(true, |best| candidate < *best) {
                dist.insert(next, candidate);
                prev.insert(next, node);
                heap.push(Reverse((candidate, next)));
            }
        }
    }

    if !prev.contains_key(&dst) {
        return Vec::new();
    }
    let mut path = vec![dst];
    let mut cursor = dst;
    while let Some(&step) = prev.get(&cursor) {
        path.push(step);
        cursor = step;
    }
    path.reverse();
    path
}
