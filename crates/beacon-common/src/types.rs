//! Core types shared across Beacon components.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::NODE_ID_LEN;

/// Opaque string naming a logical cluster.
///
/// Two nodes only interact if their tokens match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterToken(String);

impl ClusterToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Random per-process identifier used to drop our own broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Generate a fresh identifier (8 lowercase hex characters)
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::rng();
        let id: String = (0..NODE_ID_LEN)
            .map(|_| char::from_digit(rng.random_range(0..16u32), 16).unwrap_or('0'))
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reachable address of a leader
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaderAddress {
    pub host: String,
    pub port: u16,
}

impl LeaderAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// HTTP URL of the leader, with a trailing slash
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

impl fmt::Display for LeaderAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The two mutually exclusive outcomes of discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Leader,
    Follower,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leader => f.write_str("leader"),
            Self::Follower => f.write_str("follower"),
        }
    }
}

/// Outcome of one discovery attempt. Computed once per coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryResult {
    /// Nobody announced in time; we lead at our own address
    Leader { self_address: LeaderAddress },
    /// Another node announced first
    Follower { leader: LeaderAddress },
}

impl DiscoveryResult {
    pub fn role(&self) -> Role {
        match self {
            Self::Leader { .. } => Role::Leader,
            Self::Follower { .. } => Role::Follower,
        }
    }

    /// Address of the leader, whoever it is
    pub fn leader_address(&self) -> &LeaderAddress {
        match self {
            Self::Leader { self_address } => self_address,
            Self::Follower { leader } => leader,
        }
    }
}
