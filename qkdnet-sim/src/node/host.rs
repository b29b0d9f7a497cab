//! Classical hosts.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::json;

use qkdnet_core::{EventKind, NetworkError, NetworkResult, NodeId, Packet, PacketId};

use crate::topology::Topology;

/// Application callback invoked with every data packet a host accepts.
pub(crate) type DataCallback = Arc<dyn Fn(&Packet) + Send + Sync>;

pub(crate) struct HostRole {
    pub(crate) default_gateway: Option<NodeId>,
    pub(crate) adapter: Option<NodeId>,
    pub(crate) on_data: Option<DataCallback>,
    delivered: Mutex<Vec<Packet>>,
}

impl HostRole {
    pub(crate) fn new() -> Self {
        Self {
            default_gateway: None,
            adapter: None,
            on_data: None,
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn delivered(&self) -> Vec<Packet> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Originate a data packet towards `destination`.
    ///
    /// A host bound to an adapter addresses the adapter's router and records
    /// the real destination so the far adapter can recover it.
    pub(crate) fn send(
        &self,
        topology: &Topology,
        me: NodeId,
        data: Vec<u8>,
        destination: NodeId,
    ) -> NetworkResult<PacketId> {
        topology.slot(destination)?;
        let (target, final_destination) = match self.adapter {
            Some(adapter) => (topology.local_router(adapter)?, Some(destination)),
            None => (destination, None),
        };

        let next_hop = if topology.connection_between(me, target).is_some() {
            target
        } else {
            tracing::debug!(node = %topology.name(me), "sending to default gateway");
            self.default_gateway
                .ok_or_else(|| NetworkError::DefaultGatewayNotFound {
                    node: topology.name(me),
                })?
        };
        if topology.connection_between(me, next_hop).is_none() {
            return Err(NetworkError::NotConnected {
                from: topology.name(me),
                to: topology.name(next_hop),
            });
        }

        let packet = Packet::data(topology.next_packet_id(), data, me, target)
            .with_final_destination(final_destination);
        let id = packet.id();
        let data = packet.payload_lossy();

        topology.audit.append(format!(
            "{} sent data '{}' to {} (next hop: {})",
            topology.name(me),
            data,
            topology.name(destination),
            topology.name(next_hop)
        ));
        topology.transmit(me, next_hop, packet)?;
        topology.emit(
            me,
            EventKind::PacketSent,
            json!({
                "packet": id.0,
                "data": data,
                "destination": topology.name(destination),
                "next_hop": topology.name(next_hop),
            }),
        );
        Ok(id)
    }

    pub(crate) fn forward(&self, topology: &Topology, me: NodeId) {
        for (sender, packet) in topology.slot(me).map(|s| s.inbox.drain()).unwrap_or_default() {
            if packet.to() == me {
                self.receive(topology, me, packet);
            } else {
                tracing::warn!(
                    node = %topology.name(me),
                    from = %topology.name(sender),
                    packet = %packet.id(),
                    "unexpected packet, dropping"
                );
                topology.emit(
                    me,
                    EventKind::Anomaly,
                    json!({
                        "reason": "unexpected packet",
                        "packet": packet.id().0,
                        "from": topology.name(sender),
                    }),
                );
            }
        }
    }

    fn receive(&self, topology: &Topology, me: NodeId, packet: Packet) {
        topology.emit(
            me,
            EventKind::PacketReceived,
            json!({ "packet": packet.id().0, "from": topology.name(packet.from()) }),
        );
        if !packet.is_data() {
            return;
        }

        let data = packet.payload_lossy();
        topology
            .audit
            .append(format!("{} received data '{}'", topology.name(me), data));
        tracing::info!(node = %topology.name(me), %data, "data received");

        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(packet.clone());
        if let Some(callback) = &self.on_data {
            callback(&packet);
        }
        topology.emit(me, EventKind::DataReceived, json!({ "data": data }));
    }
}
