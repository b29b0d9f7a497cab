//! Simulated quantum layer.
//!
//! A [`QuantumLayer`] registers quantum endpoints and the lossy quantum
//! channels between them. Each [`QuantumEndpoint`] is the [`KeyExchange`]
//! collaborator of one adapter and agrees on a key with its channel peer
//! through a BB84-style exchange: qubits travel over the quantum channel,
//! basis announcement and sifting travel as JSON over the adapters'
//! classical link.
//!
//! There is no noise model and no eavesdropper: qubits measured in the
//! preparation basis always yield the prepared bit.
//!
//! [`KeyExchange`]: qkdnet_core::KeyExchange

mod endpoint;
mod message;

pub use endpoint::QuantumEndpoint;
pub use message::SideChannelMessage;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};

use qkdnet_core::{NetworkError, NetworkResult, QuantumHostId};

use crate::config::QkdConfig;

/// Lossy link carrying qubits between two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantumChannel {
    /// First endpoint.
    pub a: QuantumHostId,
    /// Second endpoint.
    pub b: QuantumHostId,
    /// Fibre length in metres.
    pub length: f64,
    /// Probability that a qubit is lost per kilometre.
    pub loss_per_km: f64,
}

impl QuantumChannel {
    /// Probability that one qubit is lost over the whole length.
    pub fn loss_probability(&self) -> f64 {
        let km = self.length / 1000.0;
        (1.0 - (1.0 - self.loss_per_km).powf(km)).clamp(0.0, 1.0)
    }

    /// Whether the channel joins `x` and `y`, in either direction.
    pub fn joins(&self, x: QuantumHostId, y: QuantumHostId) -> bool {
        (self.a == x && self.b == y) || (self.a == y && self.b == x)
    }
}

pub(crate) struct LayerInner {
    pub(crate) config: QkdConfig,
    endpoints: Mutex<Vec<Weak<QuantumEndpoint>>>,
    channels: Mutex<Vec<QuantumChannel>>,
}

impl LayerInner {
    fn endpoints(&self) -> MutexGuard<'_, Vec<Weak<QuantumEndpoint>>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channels(&self) -> MutexGuard<'_, Vec<QuantumChannel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn channel(&self, x: QuantumHostId, y: QuantumHostId) -> Option<QuantumChannel> {
        self.channels().iter().find(|c| c.joins(x, y)).copied()
    }

    pub(crate) fn endpoint(&self, id: QuantumHostId) -> Option<Arc<QuantumEndpoint>> {
        self.endpoints().get(id.index()).and_then(Weak::upgrade)
    }
}

/// Registry of quantum endpoints and channels. Clones share the registry.
#[derive(Clone)]
pub struct QuantumLayer {
    inner: Arc<LayerInner>,
}

impl std::fmt::Debug for QuantumLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuantumLayer")
            .field("config", &self.inner.config)
            .field("endpoints", &self.inner.endpoints().len())
            .field("channels", &*self.inner.channels())
            .finish()
    }
}

impl QuantumLayer {
    /// Empty layer running key agreement with `config`.
    pub fn new(config: QkdConfig) -> Self {
        Self {
            inner: Arc::new(LayerInner {
                config,
                endpoints: Mutex::new(Vec::new()),
                channels: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register an endpoint.
    pub fn add_endpoint(&self, name: impl Into<String>) -> Arc<QuantumEndpoint> {
        let mut endpoints = self.inner.endpoints();
        let id = QuantumHostId::new(endpoints.len() as u32);
        let endpoint = Arc::new(QuantumEndpoint::new(id, name.into(), self.inner.clone()));
        endpoints.push(Arc::downgrade(&endpoint));
        endpoint
    }

    /// Join two endpoints with a quantum channel `length` metres long.
    pub fn add_channel(
        &self,
        a: QuantumHostId,
        b: QuantumHostId,
        length: f64,
        loss_per_km: f64,
    ) -> NetworkResult<()> {
        let known = self.inner.endpoints().len();
        if a == b || a.index() >= known || b.index() >= known {
            return Err(NetworkError::Config {
                message: format!("invalid quantum channel endpoints {a} and {b}"),
            });
        }
        if !(0.0..1.0).contains(&loss_per_km) || !length.is_finite() || length < 0.0 {
            return Err(NetworkError::Config {
                message: format!(
                    "invalid quantum channel parameters: length {length}, loss {loss_per_km}"
                ),
            });
        }
        let mut channels = self.inner.channels();
        if channels.iter().any(|c| c.joins(a, b)) {
            return Err(NetworkError::Config {
                message: format!("quantum channel between {a} and {b} already exists"),
            });
        }
        channels.push(QuantumChannel {
            a,
            b,
            length,
            loss_per_km,
        });
        Ok(())
    }

    /// All channels in registration order.
    pub fn channels(&self) -> Vec<QuantumChannel> {
        self.inner.channels().clone()
    }

    /// Key-agreement parameters.
    pub fn config(&self) -> &QkdConfig {
        &self.inner.config
    }
}
