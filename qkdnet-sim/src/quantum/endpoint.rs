//! BB84 endpoint.
//!
//! Of the two endpoints on a channel, the one with the lower id prepares and
//! sends qubits (the initiator); the other measures them (the responder).
//!
//! ```text
//!   initiator                               responder
//!   ── qubits (quantum channel) ──────────▶ measure in random bases
//!   ── Announce { round, bases } ─────────▶ keep positions whose basis matched
//!   ◀──────────────── Sift { round, matches }
//!   enough matches?
//!     yes: ── Confirm { round } ──────────▶ derive key from matched bits
//!          derive key from prepared bits
//!     no:  start round + 1 (up to max_rounds)
//! ```
//!
//! A responder asked to initiate sends `Request` instead. All collaborator
//! calls are made after the endpoint's lock is released.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use qkdnet_core::{AdapterLink, KeyExchange, NetworkError, NetworkResult, QuantumHostId, SharedKey};

use super::{LayerInner, SideChannelMessage};

/// Prepared or measured qubit: `(bit, basis)`.
type Qubit = (u8, u8);

enum Effect {
    Classical(SideChannelMessage),
    Qubits {
        peer: QuantumHostId,
        round: u32,
        qubits: Vec<Option<Qubit>>,
    },
    Key(SharedKey),
}

struct EndpointState {
    link: Option<Arc<dyn AdapterLink>>,
    peer: Option<QuantumHostId>,
    rng: ChaCha8Rng,
    /// Round in progress, 0 when idle.
    round: u32,
    rounds_run: u32,
    prepared: Vec<Qubit>,
    measured: Vec<Option<Qubit>>,
    matches: Vec<usize>,
    key: Option<SharedKey>,
}

/// Quantum-layer collaborator of one adapter.
pub struct QuantumEndpoint {
    id: QuantumHostId,
    name: String,
    layer: Arc<LayerInner>,
    state: Mutex<EndpointState>,
}

impl fmt::Debug for QuantumEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("QuantumEndpoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("peer", &state.peer)
            .field("round", &state.round)
            .field("keyed", &state.key.is_some())
            .finish()
    }
}

impl QuantumEndpoint {
    pub(super) fn new(id: QuantumHostId, name: String, layer: Arc<LayerInner>) -> Self {
        let seed = layer.config.seed.wrapping_add(id.index() as u64);
        Self {
            id,
            name,
            layer,
            state: Mutex::new(EndpointState {
                link: None,
                peer: None,
                rng: ChaCha8Rng::seed_from_u64(seed),
                round: 0,
                rounds_run: 0,
                prepared: Vec::new(),
                measured: Vec::new(),
                matches: Vec::new(),
                key: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EndpointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Peer named at attach time.
    pub fn peer(&self) -> Option<QuantumHostId> {
        self.lock().peer
    }

    /// Key agreed with the peer, once complete.
    pub fn key(&self) -> Option<SharedKey> {
        self.lock().key.clone()
    }

    /// Rounds this endpoint has taken part in.
    pub fn rounds(&self) -> u32 {
        self.lock().rounds_run
    }

    fn is_initiator(&self, peer: QuantumHostId) -> bool {
        self.id < peer
    }

    fn attached(&self, state: &EndpointState) -> NetworkResult<QuantumHostId> {
        match (&state.link, state.peer) {
            (Some(_), Some(peer)) => Ok(peer),
            _ => Err(NetworkError::Protocol {
                message: format!("quantum endpoint {} is not attached to an adapter", self.name),
            }),
        }
    }

    fn start_round(
        &self,
        state: &mut EndpointState,
        peer: QuantumHostId,
        round: u32,
    ) -> NetworkResult<Vec<Effect>> {
        let channel = self.layer.channel(self.id, peer).ok_or_else(|| {
            NetworkError::Protocol {
                message: format!("no quantum channel between {} and {peer}", self.id),
            }
        })?;
        let loss = channel.loss_probability();
        let count = self.layer.config.qubits_per_round;

        let rng = &mut state.rng;
        let prepared: Vec<Qubit> = (0..count)
            .map(|_| (u8::from(rng.random::<bool>()), u8::from(rng.random::<bool>())))
            .collect();
        let qubits = prepared
            .iter()
            .map(|&qubit| (!rng.random_bool(loss)).then_some(qubit))
            .collect();
        let bases = prepared.iter().map(|&(_, basis)| basis).collect();

        tracing::debug!(endpoint = %self.name, round, qubits = count, loss, "starting bb84 round");
        state.round = round;
        state.rounds_run += 1;
        state.prepared = prepared;
        Ok(vec![
            Effect::Qubits {
                peer,
                round,
                qubits,
            },
            Effect::Classical(SideChannelMessage::Announce { round, bases }),
        ])
    }

    /// Measure qubits arriving over the quantum channel.
    fn receive_qubits(&self, round: u32, qubits: Vec<Option<Qubit>>) {
        let mut state = self.lock();
        let rng = &mut state.rng;
        let measured = qubits
            .into_iter()
            .map(|qubit| {
                qubit.map(|(bit, basis)| {
                    let mine = u8::from(rng.random::<bool>());
                    let value = if mine == basis {
                        bit
                    } else {
                        u8::from(rng.random::<bool>())
                    };
                    (value, mine)
                })
            })
            .collect();
        state.measured = measured;
        state.matches.clear();
        state.round = round;
        state.rounds_run += 1;
    }

    fn handle(&self, message: SideChannelMessage) -> NetworkResult<Vec<Effect>> {
        let mut state = self.lock();
        let peer = self.attached(&state)?;
        let key_length = self.layer.config.key_length;

        match message {
            SideChannelMessage::Request => {
                if !self.is_initiator(peer) || state.key.is_some() || state.round != 0 {
                    tracing::debug!(endpoint = %self.name, "ignoring key agreement request");
                    return Ok(Vec::new());
                }
                self.start_round(&mut state, peer, 1)
            }
            SideChannelMessage::Announce { round, bases } => {
                if round != state.round || bases.len() != state.measured.len() {
                    return Err(NetworkError::Protocol {
                        message: format!("announce for round {round} does not match measured qubits"),
                    });
                }
                let matches: Vec<usize> = state
                    .measured
                    .iter()
                    .zip(&bases)
                    .enumerate()
                    .filter_map(|(i, (qubit, basis))| match qubit {
                        Some((_, mine)) if mine == basis => Some(i),
                        _ => None,
                    })
                    .collect();
                state.matches = matches.clone();
                Ok(vec![Effect::Classical(SideChannelMessage::Sift {
                    round,
                    matches,
                })])
            }
            SideChannelMessage::Sift { round, matches } => {
                if round != state.round || state.key.is_some() {
                    tracing::debug!(endpoint = %self.name, round, "ignoring stale sift");
                    return Ok(Vec::new());
                }
                if matches.iter().any(|&i| i >= state.prepared.len()) {
                    return Err(NetworkError::Protocol {
                        message: format!("sift for round {round} names unknown qubits"),
                    });
                }
                if matches.len() >= key_length {
                    let key = SharedKey::from_bits(
                        matches[..key_length].iter().map(|&i| state.prepared[i].0),
                    );
                    tracing::debug!(endpoint = %self.name, round, sifted = matches.len(), "key derived");
                    state.key = Some(key.clone());
                    state.round = 0;
                    return Ok(vec![
                        Effect::Classical(SideChannelMessage::Confirm { round }),
                        Effect::Key(key),
                    ]);
                }
                if round < self.layer.config.max_rounds {
                    tracing::debug!(endpoint = %self.name, round, sifted = matches.len(), "too few matches, retrying");
                    return self.start_round(&mut state, peer, round + 1);
                }
                state.round = 0;
                Err(NetworkError::Protocol {
                    message: format!("no key after {round} rounds"),
                })
            }
            SideChannelMessage::Confirm { round } => {
                if round != state.round || state.key.is_some() {
                    tracing::debug!(endpoint = %self.name, round, "ignoring stale confirm");
                    return Ok(Vec::new());
                }
                let bits: Option<Vec<u8>> = state
                    .matches
                    .iter()
                    .take(key_length)
                    .map(|&i| state.measured[i].map(|(bit, _)| bit))
                    .collect();
                let bits = bits.filter(|bits| bits.len() == key_length).ok_or_else(|| {
                    NetworkError::Protocol {
                        message: format!("confirm for round {round} without enough sifted bits"),
                    }
                })?;
                let key = SharedKey::from_bits(bits);
                state.key = Some(key.clone());
                state.round = 0;
                Ok(vec![Effect::Key(key)])
            }
        }
    }

    fn apply(&self, effects: Vec<Effect>) -> NetworkResult<()> {
        let link = self.lock().link.clone();
        let Some(link) = link else {
            return Ok(());
        };
        for effect in effects {
            match effect {
                Effect::Classical(message) => link.send_classical(message.encode()?)?,
                Effect::Qubits {
                    peer,
                    round,
                    qubits,
                } => {
                    let peer = self.layer.endpoint(peer).ok_or_else(|| NetworkError::Protocol {
                        message: format!("quantum endpoint {peer} is gone"),
                    })?;
                    peer.receive_qubits(round, qubits);
                }
                Effect::Key(key) => {
                    tracing::info!(endpoint = %self.name, bits = key.len(), "bb84 key established");
                    link.key_established(key);
                }
            }
        }
        Ok(())
    }
}

impl KeyExchange for QuantumEndpoint {
    fn id(&self) -> QuantumHostId {
        self.id
    }

    fn channel_exists(&self, peer: QuantumHostId) -> bool {
        self.layer.channel(self.id, peer).is_some()
    }

    fn attach(&self, link: Arc<dyn AdapterLink>, peer: QuantumHostId) {
        let mut state = self.lock();
        state.link = Some(link);
        state.peer = Some(peer);
    }

    fn initiate_qkd(&self) -> NetworkResult<()> {
        let effects = {
            let mut state = self.lock();
            let peer = self.attached(&state)?;
            if state.key.is_some() || state.round != 0 {
                return Ok(());
            }
            if self.is_initiator(peer) {
                self.start_round(&mut state, peer, 1)?
            } else {
                vec![Effect::Classical(SideChannelMessage::Request)]
            }
        };
        self.apply(effects)
    }

    fn receive_classical(&self, payload: &[u8]) -> NetworkResult<()> {
        let message = SideChannelMessage::decode(payload)?;
        tracing::trace!(endpoint = %self.name, ?message, "side-channel message");
        let effects = self.handle(message)?;
        self.apply(effects)
    }
}
