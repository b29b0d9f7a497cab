//! # qkdnet-core
//!
//! Core types shared by the qkdnet simulation engine.
//!
//! - **Identifiers**: arena handles for nodes, networks, zones, connections
//!   and quantum endpoints
//! - **Packets**: the in-process message envelope and its hop trail
//! - **Errors**: the [`NetworkError`] taxonomy
//! - **Collaborator traits**: [`EventSink`] for the live-event consumer and
//!   [`KeyExchange`]/[`AdapterLink`] for the quantum layer
//! - **Cipher**: the toy XOR stream cipher keyed by a [`SharedKey`]

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod cipher;
mod error;
mod events;
mod packet;
mod quantum;
mod types;

pub use cipher::{SharedKey, decrypt, encrypt};
pub use error::{NetworkError, NetworkResult, SinkError};
pub use events::{EventKind, EventSink, NullSink, RecordingSink, SimEvent};
pub use packet::{Packet, PacketKind};
pub use quantum::{AdapterLink, KeyExchange};
pub use types::{ConnectionId, Location, NetworkId, NodeId, PacketId, QuantumHostId, ZoneId};
