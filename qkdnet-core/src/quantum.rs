//! Seams between a quantum adapter and the quantum layer.
//!
//! The adapter never performs key agreement itself. It asks a
//! [`KeyExchange`] collaborator to start, forwards it the classical
//! side-channel messages that arrive over the network, and gets the derived
//! key back through the [`AdapterLink`] it handed over at attach time.
//!
//! Callbacks on [`AdapterLink`] may arrive on any thread. Implementations of
//! [`KeyExchange`] must not assume they run on the tick thread.

use std::sync::Arc;

use crate::{cipher::SharedKey, error::NetworkResult, types::QuantumHostId};

/// The quantum-layer collaborator of one adapter.
pub trait KeyExchange: Send + Sync {
    /// Identity of this endpoint in the quantum layer.
    fn id(&self) -> QuantumHostId;

    /// Whether a quantum channel connects this endpoint to `peer`.
    fn channel_exists(&self, peer: QuantumHostId) -> bool;

    /// Hand over the callbacks into the owning adapter and name the peer
    /// endpoint that key agreement runs against.
    fn attach(&self, link: Arc<dyn AdapterLink>, peer: QuantumHostId);

    /// Start key agreement with the channel peer. Returns without waiting
    /// for the key; completion is reported through [`AdapterLink::key_established`].
    fn initiate_qkd(&self) -> NetworkResult<()>;

    /// Handle a classical side-channel message from the peer.
    fn receive_classical(&self, payload: &[u8]) -> NetworkResult<()>;
}

/// Callbacks a [`KeyExchange`] uses to reach its adapter.
pub trait AdapterLink: Send + Sync {
    /// Send a side-channel message to the paired adapter over the classical
    /// network.
    fn send_classical(&self, payload: Vec<u8>) -> NetworkResult<()>;

    /// Report the derived shared key.
    fn key_established(&self, key: SharedKey);
}
