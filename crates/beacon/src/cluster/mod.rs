//! Cluster discovery and leader election.
//!
//! Implements:
//! - One-shot gate (deadline vs. announcement race)
//! - Broadcast transport (UDP multicast, scoped by cluster token)
//! - Discovery/election coordinator

mod coordinator;
mod gate;
#[cfg(test)]
mod memory;
mod multicast;
mod transport;

pub use coordinator::{Coordinator, DiscoverySettings, RunOutcome};
pub use multicast::{MulticastTransport, local_interface_addr};
