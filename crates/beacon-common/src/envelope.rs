//! Wire envelope for multicast announcements.
//!
//! One envelope per UDP datagram, encoded as a JSON object:
//!
//! ```text
//! {"sender":"3fa9c01b","token":"prod","sent_at":1700000000000,
//!  "payload":{"type":"leader_info","host":"10.0.0.4","port":8080}}
//! ```
//!
//! `master_info` is accepted as an alias of `leader_info`. Payload types this
//! version does not know decode as [`Payload::Unknown`] instead of failing.

use serde::{Deserialize, Serialize};

use crate::constants::MAX_ENVELOPE_BYTES;
use crate::error::BeaconError;
use crate::types::{ClusterToken, LeaderAddress, NodeId};

/// Typed content carried by an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// A leader advertising where it can be reached
    #[serde(alias = "master_info")]
    LeaderInfo { host: String, port: u16 },

    /// Any payload type this node does not understand
    #[serde(other)]
    Unknown,
}

impl Payload {
    pub fn leader_info(address: &LeaderAddress) -> Self {
        Self::LeaderInfo {
            host: address.host.clone(),
            port: address.port,
        }
    }

    /// The announced leader address, if this is an announcement
    pub fn as_leader_address(&self) -> Option<LeaderAddress> {
        match self {
            Self::LeaderInfo { host, port } => Some(LeaderAddress::new(host.clone(), *port)),
            Self::Unknown => None,
        }
    }
}

/// A message on the multicast group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identity of the sending process
    pub sender: NodeId,
    /// Cluster the sender belongs to
    pub token: ClusterToken,
    /// Unix timestamp in milliseconds (informational)
    #[serde(default)]
    pub sent_at: i64,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(sender: NodeId, token: ClusterToken, payload: Payload) -> Self {
        Self {
            sender,
            token,
            sent_at: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }

    /// Serialize for the wire, refusing anything that would not fit in one datagram
    pub fn encode(&self) -> Result<Vec<u8>, BeaconError> {
        let bytes = serde_json::to_vec(self).map_err(|e| BeaconError::Encode(e.to_string()))?;
        if bytes.len() > MAX_ENVELOPE_BYTES {
            return Err(BeaconError::Encode(format!(
                "envelope is {} bytes, limit is {}",
                bytes.len(),
                MAX_ENVELOPE_BYTES
            )));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BeaconError> {
        serde_json::from_slice(bytes).map_err(|e| BeaconError::Decode(e.to_string()))
    }

    /// Whether a node with `identity` in cluster `token` should look at this envelope
    pub fn accepted_by(&self, identity: &NodeId, token: &ClusterToken) -> bool {
        &self.sender != identity && &self.token == token
    }
}
