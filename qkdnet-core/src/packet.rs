//! The in-process message envelope.
//!
//! Packets are values: once built, a packet is never edited in place.
//! Forwarding code derives a new packet from the old one through the
//! consuming `with_*`/`via` methods, which keeps a packet held in one node's
//! buffer independent from whatever another node does next.

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, PacketId};

/// What a packet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    /// Application data, plaintext or ciphertext.
    Data,
    /// Classical side-channel message of the key-agreement protocol.
    QkdTransmission,
}

/// A message travelling through the classical topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    id: PacketId,
    kind: PacketKind,
    payload: Vec<u8>,
    from: NodeId,
    to: NodeId,
    final_destination: Option<NodeId>,
    next_hop: NodeId,
    hops: Vec<NodeId>,
}

impl Packet {
    /// Build a packet originating at `from` and addressed to `to`.
    ///
    /// The hop trail starts with the origin and the next hop defaults to the
    /// immediate target.
    pub fn new(
        id: PacketId,
        kind: PacketKind,
        payload: impl Into<Vec<u8>>,
        from: NodeId,
        to: NodeId,
    ) -> Self {
        Self {
            id,
            kind,
            payload: payload.into(),
            from,
            to,
            final_destination: None,
            next_hop: to,
            hops: vec![from],
        }
    }

    /// Build a data packet.
    pub fn data(id: PacketId, payload: impl Into<Vec<u8>>, from: NodeId, to: NodeId) -> Self {
        Self::new(id, PacketKind::Data, payload, from, to)
    }

    /// Build a key-agreement side-channel packet.
    pub fn qkd(id: PacketId, payload: impl Into<Vec<u8>>, from: NodeId, to: NodeId) -> Self {
        Self::new(id, PacketKind::QkdTransmission, payload, from, to)
    }

    /// Record the true destination of traffic tunnelled through an adapter.
    pub fn with_final_destination(mut self, destination: Option<NodeId>) -> Self {
        self.final_destination = destination;
        self
    }

    /// Replace the payload, keeping addressing and trail.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Readdress the packet to a new immediate target.
    pub fn addressed_to(mut self, to: NodeId) -> Self {
        self.to = to;
        self
    }

    /// Set the neighbour the packet is about to be handed to.
    pub fn via(mut self, next_hop: NodeId) -> Self {
        self.next_hop = next_hop;
        self
    }

    /// Append a node to the hop trail.
    pub fn with_hop(mut self, hop: NodeId) -> Self {
        self.hops.push(hop);
        self
    }

    /// Packet identifier.
    pub fn id(&self) -> PacketId {
        self.id
    }

    /// Packet kind.
    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// Whether this is an application data packet.
    pub fn is_data(&self) -> bool {
        self.kind == PacketKind::Data
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload rendered for logs and events.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Originating node.
    pub fn from(&self) -> NodeId {
        self.from
    }

    /// Immediate target.
    pub fn to(&self) -> NodeId {
        self.to
    }

    /// True destination behind an adapter tunnel, if any.
    pub fn final_destination(&self) -> Option<NodeId> {
        self.final_destination
    }

    /// Neighbour the packet was last handed to.
    pub fn next_hop(&self) -> NodeId {
        self.next_hop
    }

    /// Nodes that have transmitted this packet, origin first.
    pub fn hops(&self) -> &[NodeId] {
        &self.hops
    }

    /// The node that handed this packet to its current holder.
    pub fn previous_hop(&self) -> Option<NodeId> {
        self.hops.last().copied()
    }
}
