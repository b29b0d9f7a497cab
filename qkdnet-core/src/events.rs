//! Live simulation events and the sink that consumes them.
//!
//! The engine notifies an [`EventSink`] on node creation, packet send and
//! receive, encryption, key agreement and routing decisions. Sinks are pure
//! consumers: a failing sink is logged by the caller and otherwise ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};

use crate::error::SinkError;

/// Category of a simulation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A node was registered.
    NodeCreated,
    /// A host handed a packet to a connection.
    PacketSent,
    /// A node accepted a packet addressed to it.
    PacketReceived,
    /// Application data reached its destination host.
    DataReceived,
    /// A router or adapter chose a next hop.
    Routed,
    /// An adapter encrypted a payload.
    Encrypted,
    /// An adapter decrypted a payload.
    Decrypted,
    /// An adapter started key agreement.
    QkdInitiated,
    /// An adapter obtained its shared key.
    QkdEstablished,
    /// An adapter parked a packet until its key exists.
    PacketHeld,
    /// Non-fatal oddity: unexpected packet, missing key, duplicate key.
    Anomaly,
    /// A node failed to handle a packet during a tick.
    Error,
}

/// One notification emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    /// Event category.
    pub kind: EventKind,
    /// Name of the node the event happened at.
    pub node: String,
    /// Free-form details.
    pub payload: Value,
    /// World clock tick at emission.
    pub timestamp: u64,
}

/// Consumer of simulation events.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: &SimEvent) -> Result<(), SinkError>;
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &SimEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink that keeps every event in memory, for inspection in tests and tools.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SimEvent>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events, oldest first.
    pub fn events(&self) -> Vec<SimEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded events of one kind.
    pub fn of_kind(&self, kind: EventKind) -> Vec<SimEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of recorded events of one kind.
    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.kind == kind)
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &SimEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}
