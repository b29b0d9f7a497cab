use serde::{Deserialize, Serialize};

use qkdnet_core::{NetworkError, NetworkResult};

/// Classical side-channel message of the BB84 exchange.
///
/// Serialised as JSON and carried in `QKD_TRANSMISSION` packets between the
/// paired adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideChannelMessage {
    /// Responder asks the initiator to start a round.
    Request,
    /// Initiator announces its preparation bases for a round.
    Announce {
        /// Round number, starting at 1.
        round: u32,
        /// One basis per qubit sent, 0 or 1.
        bases: Vec<u8>,
    },
    /// Responder reports the positions it received and measured in the
    /// announced basis.
    Sift {
        /// Round number.
        round: u32,
        /// Matching positions, ascending.
        matches: Vec<usize>,
    },
    /// Initiator has derived the key from this round.
    Confirm {
        /// Round number.
        round: u32,
    },
}

impl SideChannelMessage {
    pub(crate) fn encode(&self) -> NetworkResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| NetworkError::Protocol {
            message: err.to_string(),
        })
    }

    pub(crate) fn decode(payload: &[u8]) -> NetworkResult<Self> {
        serde_json::from_slice(payload).map_err(|err| NetworkError::Protocol {
            message: format!("malformed side-channel message: {err}"),
        })
    }
}
