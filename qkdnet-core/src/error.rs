//! Error types for simulation operations.

use thiserror::Error;

/// Errors raised by topology, forwarding and adapter operations.
///
/// Connectivity and protocol-state errors are fatal to the call that raised
/// them but never to the scheduler: a failing node is logged and the tick
/// moves on to the next one.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    /// A host has neither a direct link to the target nor a gateway.
    #[error("default gateway not found for node {node}")]
    DefaultGatewayNotFound {
        /// Name of the sending node.
        node: String,
    },

    /// No connection exists between two nodes that needed one.
    #[error("connection not found between {from} and {to}")]
    NotConnected {
        /// Node attempting the transmission.
        from: String,
        /// Node it tried to reach.
        to: String,
    },

    /// An adapter's quantum collaborator has no channel to its partner's.
    #[error("quantum channel does not exist for adapter {adapter}")]
    QuantumChannelDoesNotExist {
        /// Adapter being paired.
        adapter: String,
    },

    /// The adapter is already paired.
    #[error("pair adapter ({paired}) already exists for adapter {adapter}")]
    PairAdapterAlreadyExists {
        /// Adapter that was asked to pair again.
        adapter: String,
        /// Its existing partner.
        paired: String,
    },

    /// Key agreement was requested on an unpaired adapter.
    #[error("pair adapter does not exist for adapter {adapter}")]
    PairAdapterDoesNotExist {
        /// The unpaired adapter.
        adapter: String,
    },

    /// A node lookup by name or handle failed.
    #[error("node not found: {name}")]
    NodeNotFound {
        /// Name or handle that was looked up.
        name: String,
    },

    /// The node exists but does not have the role the operation needs.
    #[error("node {node} is not a {expected}")]
    WrongRole {
        /// Node that was looked up.
        node: String,
        /// Role the operation expected.
        expected: &'static str,
    },

    /// Tick rate must be finite and positive.
    #[error("invalid tick rate: {fps}")]
    InvalidTickRate {
        /// The rejected frames-per-second value.
        fps: f64,
    },

    /// The scheduler is already ticking.
    #[error("world is already running")]
    AlreadyRunning,

    /// A key-agreement side-channel payload could not be understood.
    #[error("qkd protocol error: {message}")]
    Protocol {
        /// What went wrong.
        message: String,
    },

    /// Topology configuration is invalid.
    #[error("configuration error: {message}")]
    Config {
        /// What went wrong.
        message: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

/// A type alias for `Result<T, NetworkError>`.
pub type NetworkResult<T> = Result<T, NetworkError>;

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        NetworkError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        NetworkError::Config {
            message: err.to_string(),
        }
    }
}

/// Failure reported by an event sink.
///
/// Sinks are best-effort: the engine logs these and carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The consumer side has gone away.
    #[error("event sink closed")]
    Closed,

    /// The event could not be delivered.
    #[error("event sink failed: {0}")]
    Failed(String),
}
