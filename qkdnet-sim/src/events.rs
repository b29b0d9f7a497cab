//! Event sinks provided by the engine.
//!
//! [`ChannelSink`] bridges the synchronous emit path onto a tokio channel so
//! a live consumer (a UI broadcaster, a JSON-lines printer) can read events
//! at its own pace.

use qkdnet_core::{EventSink, SimEvent, SinkError};
use tokio::sync::mpsc;

/// Sink forwarding every event into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<SimEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SimEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &SimEvent) -> Result<(), SinkError> {
        self.sender
            .send(event.clone())
            .map_err(|_| SinkError::Closed)
    }
}
