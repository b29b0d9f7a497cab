//! Quantum adapters.
//!
//! An adapter owns one classical router and intercepts everything that
//! reaches it. Data headed for the paired side waits until key agreement
//! with the partner completes, then crosses the adapter link encrypted with
//! the shared key; the partner decrypts and forwards it to the recorded
//! final destination.
//!
//! ```text
//!   NO_KEY ──first packet──▶ AWAITING_QKD ──key callback──▶ KEYED
//!                            (packets parked)              (parked packets
//!                                                           re-dispatched in
//!                                                           arrival order)
//! ```
//!
//! Calls into the quantum collaborator, event notifications and failures of
//! replayed packets are collected while the adapter lock is held and
//! delivered after it is released, so a collaborator, sink or network hook
//! may call back into the adapter synchronously or from another thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use qkdnet_core::{
    AdapterLink, EventKind, KeyExchange, NetworkError, NetworkResult, NodeId, Packet, PacketKind,
    SharedKey, decrypt, encrypt,
};

use crate::topology::Topology;

/// Key-agreement state of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterPhase {
    /// No key and no agreement in progress.
    #[default]
    NoKey,
    /// Agreement started; data is parked.
    AwaitingQkd,
    /// Shared key present.
    Keyed,
}

/// Snapshot of an adapter's protocol state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterStatus {
    /// Current phase.
    pub phase: AdapterPhase,
    /// Shared key, once established.
    pub shared_key: Option<SharedKey>,
    /// Packets parked until the key exists.
    pub pending: usize,
    /// Times this adapter asked its collaborator to start agreement.
    pub qkd_initiations: u64,
    /// Paired adapter.
    pub partner: Option<NodeId>,
}

#[derive(Debug, Default)]
struct AdapterState {
    phase: AdapterPhase,
    shared_key: Option<SharedKey>,
    pending: VecDeque<Packet>,
    qkd_initiations: u64,
}

/// Work postponed until the adapter lock is released.
#[derive(Debug)]
enum Deferred {
    Initiate,
    Classical(Vec<u8>),
    Event(EventKind, Value),
    Failure(NetworkError),
}

pub(crate) struct AdapterRole {
    pub(crate) local_router: NodeId,
    pub(crate) partner: Option<NodeId>,
    pub(crate) quantum: Arc<dyn KeyExchange>,
    state: Mutex<AdapterState>,
}

impl AdapterRole {
    pub(crate) fn new(local_router: NodeId, quantum: Arc<dyn KeyExchange>) -> Self {
        Self {
            local_router,
            partner: None,
            quantum,
            state: Mutex::new(AdapterState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> AdapterStatus {
        let state = self.lock();
        AdapterStatus {
            phase: state.phase,
            shared_key: state.shared_key.clone(),
            pending: state.pending.len(),
            qkd_initiations: state.qkd_initiations,
            partner: self.partner,
        }
    }

    fn partner_router(&self, topology: &Topology) -> Option<NodeId> {
        let partner = self.partner?;
        topology
            .adapter_role(partner)
            .ok()
            .map(|role| role.local_router)
    }

    fn require_partner_router(&self, topology: &Topology, me: NodeId) -> NetworkResult<NodeId> {
        self.partner_router(topology)
            .ok_or_else(|| NetworkError::PairAdapterDoesNotExist {
                adapter: topology.name(me),
            })
    }

    /// Entry point for every packet reaching the adapter's router.
    pub(crate) fn receive(
        &self,
        topology: &Topology,
        me: NodeId,
        packet: Packet,
    ) -> NetworkResult<()> {
        topology.audit.append(format!(
            "{} received packet from {}",
            topology.name(me),
            topology.name(packet.from())
        ));
        let mut deferred = Vec::new();
        let result = {
            let mut state = self.lock();
            self.dispatch(topology, me, &mut state, packet, &mut deferred)
        };
        let collaborator = self.run_deferred(topology, me, deferred);
        result.and(collaborator)
    }

    fn dispatch(
        &self,
        topology: &Topology,
        me: NodeId,
        state: &mut AdapterState,
        packet: Packet,
        deferred: &mut Vec<Deferred>,
    ) -> NetworkResult<()> {
        let partner_router = self.partner_router(topology);

        // Ciphertext relayed by the partner.
        if packet.is_data() && partner_router.is_some() && packet.previous_hop() == partner_router
        {
            return self.process(topology, me, state, packet, deferred);
        }

        if packet.kind() == PacketKind::QkdTransmission {
            topology.audit.append(format!(
                "{} received QKD transmission packet",
                topology.name(me)
            ));
            deferred.push(Deferred::Classical(packet.payload().to_vec()));
            return Ok(());
        }

        if state.shared_key.is_none() && self.partner.is_some() {
            if state.phase == AdapterPhase::NoKey {
                self.begin_qkd(topology, me, state, deferred);
            }
            tracing::debug!(node = %topology.name(me), packet = %packet.id(), "parking packet until key exists");
            deferred.push(Deferred::Event(
                EventKind::PacketHeld,
                json!({ "packet": packet.id().0, "pending": state.pending.len() + 1 }),
            ));
            state.pending.push_back(packet);
            return Ok(());
        }

        if packet.to() == self.local_router {
            let Some(key) = &state.shared_key else {
                tracing::warn!(node = %topology.name(me), "cannot forward packet, no shared key");
                topology.audit.append(format!(
                    "{} cannot forward packet, no shared key",
                    topology.name(me)
                ));
                deferred.push(Deferred::Event(
                    EventKind::Anomaly,
                    json!({ "reason": "no shared key", "packet": packet.id().0 }),
                ));
                return Ok(());
            };
            let partner_router = self.require_partner_router(topology, me)?;
            let ciphertext = encrypt(packet.payload(), key);
            topology.audit.append(format!(
                "{} encrypted data '{}'",
                topology.name(me),
                packet.payload_lossy()
            ));
            deferred.push(Deferred::Event(
                EventKind::Encrypted,
                json!({ "packet": packet.id().0, "bytes": ciphertext.len() }),
            ));
            let packet = packet
                .with_payload(ciphertext)
                .addressed_to(partner_router);
            return self.forward(topology, me, packet, partner_router, deferred);
        }

        // Relayed unmodified. The partner treats DATA from this router as
        // ciphertext, so only adapter-addressed traffic arrives intact.
        let partner_router = self.require_partner_router(topology, me)?;
        self.forward(topology, me, packet, partner_router, deferred)
    }

    fn begin_qkd(
        &self,
        topology: &Topology,
        me: NodeId,
        state: &mut AdapterState,
        deferred: &mut Vec<Deferred>,
    ) {
        state.phase = AdapterPhase::AwaitingQkd;
        state.qkd_initiations += 1;
        let partner = self.partner.map(|p| topology.name(p)).unwrap_or_default();
        tracing::info!(node = %topology.name(me), %partner, "initiating qkd");
        topology
            .audit
            .append(format!("{} initiating QKD with {}", topology.name(me), partner));
        deferred.push(Deferred::Event(
            EventKind::QkdInitiated,
            json!({ "with_adapter": partner }),
        ));
        deferred.push(Deferred::Initiate);
    }

    /// Decrypt ciphertext from the partner and send it on to its destination.
    fn process(
        &self,
        topology: &Topology,
        me: NodeId,
        state: &mut AdapterState,
        packet: Packet,
        deferred: &mut Vec<Deferred>,
    ) -> NetworkResult<()> {
        let Some(key) = &state.shared_key else {
            tracing::warn!(node = %topology.name(me), packet = %packet.id(), "cannot process packet yet, no shared key");
            topology.audit.append(format!(
                "{} cannot process packet, no shared key",
                topology.name(me)
            ));
            deferred.push(Deferred::Event(
                EventKind::Anomaly,
                json!({ "reason": "ciphertext before key", "packet": packet.id().0 }),
            ));
            state.pending.push_back(packet);
            return Ok(());
        };

        let plaintext = decrypt(packet.payload(), key);
        let target = packet.final_destination().unwrap_or(packet.to());
        topology.audit.append(format!(
            "{} decrypted data to '{}'",
            topology.name(me),
            String::from_utf8_lossy(&plaintext)
        ));
        deferred.push(Deferred::Event(
            EventKind::Decrypted,
            json!({ "packet": packet.id().0, "to": topology.name(target) }),
        ));
        let packet = packet
            .with_payload(plaintext)
            .addressed_to(target)
            .with_final_destination(None);
        self.forward(topology, me, packet, target, deferred)
    }

    /// Send `packet` out of the adapter's router towards `to`.
    fn forward(
        &self,
        topology: &Topology,
        me: NodeId,
        packet: Packet,
        to: NodeId,
        deferred: &mut Vec<Deferred>,
    ) -> NetworkResult<()> {
        let router = self.local_router;
        let packet = packet.with_hop(router);
        topology.audit.append(format!(
            "{} forwarding packet from {} to {}",
            topology.name(me),
            topology.name(packet.from()),
            topology.name(to)
        ));

        if topology.connection_between(router, to).is_some() {
            deferred.push(Deferred::Event(
                EventKind::Routed,
                json!({ "packet": packet.id().0, "next_hop": topology.name(to), "direct": true }),
            ));
            return topology.transmit(router, to, packet);
        }

        let path = topology.get_path(router, packet.to());
        if path.len() <= 1 {
            return Err(NetworkError::NotConnected {
                from: topology.name(router),
                to: topology.name(packet.to()),
            });
        }
        let next_hop = path[1];
        deferred.push(Deferred::Event(
            EventKind::Routed,
            json!({ "packet": packet.id().0, "next_hop": topology.name(next_hop), "direct": false }),
        ));
        topology.transmit(router, next_hop, packet)
    }

    fn run_deferred(
        &self,
        topology: &Topology,
        me: NodeId,
        deferred: Vec<Deferred>,
    ) -> NetworkResult<()> {
        let mut first_error = None;
        for action in deferred {
            let result = match action {
                Deferred::Initiate => self.quantum.initiate_qkd(),
                Deferred::Classical(payload) => self.quantum.receive_classical(&payload),
                Deferred::Event(kind, payload) => {
                    topology.emit(me, kind, payload);
                    continue;
                }
                Deferred::Failure(err) => {
                    topology.report_failure(me, &err);
                    continue;
                }
            };
            if let Err(err) = result {
                tracing::error!(node = %topology.name(me), error = %err, "quantum collaborator failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub(crate) fn initiate_qkd(&self, topology: &Topology, me: NodeId) -> NetworkResult<()> {
        if self.partner.is_none() {
            tracing::debug!(node = %topology.name(me), "no paired adapter to perform qkd");
            return Err(NetworkError::PairAdapterDoesNotExist {
                adapter: topology.name(me),
            });
        }
        let mut deferred = Vec::new();
        {
            let mut state = self.lock();
            if state.phase != AdapterPhase::NoKey {
                return Ok(());
            }
            self.begin_qkd(topology, me, &mut state, &mut deferred);
        }
        self.run_deferred(topology, me, deferred)
    }

    /// Store the key and replay parked packets in arrival order.
    pub(crate) fn on_qkd_established(&self, topology: &Topology, me: NodeId, key: SharedKey) {
        let mut deferred = Vec::new();
        {
            let mut state = self.lock();
            if state.shared_key.is_some() {
                tracing::warn!(node = %topology.name(me), "shared key already established, ignoring new key");
                deferred.push(Deferred::Event(
                    EventKind::Anomaly,
                    json!({ "reason": "duplicate key" }),
                ));
            } else {
                tracing::info!(node = %topology.name(me), bits = key.len(), "qkd established");
                topology
                    .audit
                    .append(format!("{} QKD established ({} bits)", topology.name(me), key.len()));
                deferred.push(Deferred::Event(
                    EventKind::QkdEstablished,
                    json!({ "bits": key.len() }),
                ));
                state.shared_key = Some(key);
                state.phase = AdapterPhase::Keyed;

                let pending = std::mem::take(&mut state.pending);
                for packet in pending {
                    if let Err(err) = self.dispatch(topology, me, &mut state, packet, &mut deferred) {
                        deferred.push(Deferred::Failure(err));
                    }
                }
            }
        }
        if let Err(err) = self.run_deferred(topology, me, deferred) {
            topology.report_failure(me, &err);
        }
    }

    /// Carry a side-channel message to the partner's router.
    pub(crate) fn send_classical(
        &self,
        topology: &Topology,
        me: NodeId,
        payload: Vec<u8>,
    ) -> NetworkResult<()> {
        let partner_router = self.require_partner_router(topology, me)?;
        let packet = Packet::qkd(
            topology.next_packet_id(),
            payload,
            self.local_router,
            partner_router,
        );
        topology.transmit(self.local_router, partner_router, packet)
    }
}

/// [`AdapterLink`] handed to an adapter's collaborator.
///
/// Holds the topology weakly: a collaborator outliving its simulation gets
/// errors instead of keeping the arena alive.
pub(crate) struct AdapterHandle {
    topology: Weak<Topology>,
    adapter: NodeId,
}

impl AdapterHandle {
    pub(crate) fn new(topology: Weak<Topology>, adapter: NodeId) -> Self {
        Self { topology, adapter }
    }
}

impl AdapterLink for AdapterHandle {
    fn send_classical(&self, payload: Vec<u8>) -> NetworkResult<()> {
        let topology = self.topology.upgrade().ok_or_else(|| NetworkError::NodeNotFound {
            name: self.adapter.to_string(),
        })?;
        topology
            .adapter_role(self.adapter)?
            .send_classical(&topology, self.adapter, payload)
    }

    fn key_established(&self, key: SharedKey) {
        let Some(topology) = self.topology.upgrade() else {
            tracing::warn!(adapter = %self.adapter, "key delivered after topology was dropped");
            return;
        };
        match topology.adapter_role(self.adapter) {
            Ok(role) => role.on_qkd_established(&topology, self.adapter, key),
            Err(err) => tracing::warn!(error = %err, "key delivered to unknown adapter"),
        }
    }
}
