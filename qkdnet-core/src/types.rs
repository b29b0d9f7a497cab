//! Arena handles used across the simulation.
//!
//! Every topology participant lives in a central registry and is referred to
//! by a small copyable index instead of a shared pointer. This keeps the
//! node ↔ network, adapter ↔ adapter and zone ↔ parent relations free of
//! reference cycles.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            /// Create a handle from a raw arena index.
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Raw arena index.
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Handle to a node (host, router or adapter) in the topology arena.
    NodeId,
    "node"
);
arena_id!(
    /// Handle to a network.
    NetworkId,
    "net"
);
arena_id!(
    /// Handle to a zone.
    ZoneId,
    "zone"
);
arena_id!(
    /// Handle to a classical connection.
    ConnectionId,
    "conn"
);
arena_id!(
    /// Handle to an endpoint of the quantum layer.
    QuantumHostId,
    "qhost"
);

/// Monotonic packet identifier, unique within one topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PacketId(pub u64);

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkt#{}", self.0)
    }
}

/// Planar position of a node. Purely descriptive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Horizontal coordinate.
    pub x: i32,
    /// Vertical coordinate.
    pub y: i32,
}

impl Location {
    /// Create a location.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Location {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}
