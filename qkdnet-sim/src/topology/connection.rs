//! Connections and per-node inbound buffers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use qkdnet_core::{ConnectionId, NetworkError, NetworkResult, NodeId, Packet};

use super::Topology;

/// Declared capacity parameters of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkParams {
    /// Nominal bandwidth. Used by [`CostFunction::InverseBandwidth`](super::CostFunction).
    pub bandwidth: u32,
    /// Administrative cost. Used by [`CostFunction::Cost`](super::CostFunction).
    pub cost: u32,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            bandwidth: 10,
            cost: 1,
        }
    }
}

impl LinkParams {
    /// Parameters with the given bandwidth and cost.
    pub const fn new(bandwidth: u32, cost: u32) -> Self {
        Self { bandwidth, cost }
    }
}

/// Undirected link between two nodes.
///
/// Registered on both endpoints' adjacency at creation. Transmission adds
/// no delay of its own: the receiver sees the packet at its next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Connection handle.
    pub id: ConnectionId,
    /// First endpoint.
    pub a: NodeId,
    /// Second endpoint.
    pub b: NodeId,
    /// Capacity parameters.
    pub params: LinkParams,
}

impl Connection {
    /// The endpoint opposite `node`, or `None` if `node` is not an endpoint.
    pub fn other(&self, node: NodeId) -> Option<NodeId> {
        if node == self.a {
            Some(self.b)
        } else if node == self.b {
            Some(self.a)
        } else {
            None
        }
    }

    /// Whether `node` is one of the endpoints.
    pub fn touches(&self, node: NodeId) -> bool {
        self.other(node).is_some()
    }

    /// Queue `packet` at the far endpoint, in the buffer kept for `sender`.
    pub(crate) fn transmit(
        &self,
        topology: &Topology,
        sender: NodeId,
        packet: Packet,
    ) -> NetworkResult<()> {
        let receiver = self.other(sender).ok_or_else(|| NetworkError::NotConnected {
            from: topology.name(sender),
            to: topology.name(packet.next_hop()),
        })?;
        let slot = topology.slot(receiver)?;
        tracing::trace!(
            connection = %self.id,
            from = %topology.name(sender),
            to = %slot.info.name,
            packet = %packet.id(),
            "transmit"
        );
        slot.inbox.push(sender, packet.via(receiver));
        Ok(())
    }
}

/// Inbound buffers of one node, one FIFO queue per sending neighbour.
///
/// Kept apart from the node's state lock so connections can deliver while
/// the receiver is busy.
#[derive(Debug, Default)]
pub(crate) struct Inbox {
    buffers: Mutex<BTreeMap<NodeId, VecDeque<Packet>>>,
}

impl Inbox {
    pub(crate) fn push(&self, sender: NodeId, packet: Packet) {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(sender)
            .or_default()
            .push_back(packet);
    }

    /// Take every buffered packet, grouped by sender and FIFO within a sender.
    pub(crate) fn drain(&self) -> Vec<(NodeId, Packet)> {
        let buffers =
            std::mem::take(&mut *self.buffers.lock().unwrap_or_else(PoisonError::into_inner));
        buffers
            .into_iter()
            .flat_map(|(sender, queue)| queue.into_iter().map(move |packet| (sender, packet)))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(VecDeque::len)
            .sum()
    }
}
