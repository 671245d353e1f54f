//! # Beacon Common
//!
//! Shared types and protocol definitions used by Beacon nodes.
//!
//! ## Modules
//! - `types` - Core data structures (ClusterToken, NodeId, LeaderAddress, Role, etc.)
//! - `envelope` - The multicast wire envelope and its JSON codec
//! - `error` - Common error types
//! - `constants` - Protocol constants and defaults

pub mod constants;
pub mod envelope;
pub mod error;
pub mod types;

pub use envelope::{Envelope, Payload};
pub use error::BeaconError;
pub use types::*;
