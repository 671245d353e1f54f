//! Broadcast transport seam.
//!
//! A transport moves [`Envelope`]s between nodes on a best-effort basis and hands
//! accepted inbound envelopes to registered [`Listener`]s. The [`Dispatcher`] holds
//! the decode, filter, and fan-out logic shared by every implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use beacon_common::{BeaconError, ClusterToken, Envelope, NodeId, Payload};

/// Receives accepted envelopes on the transport's receive loop.
///
/// Called synchronously; keep the work cheap or hand it off.
pub trait Listener: Send + Sync {
    fn on_envelope(&self, envelope: &Envelope);
}

impl<F> Listener for F
where
    F: Fn(&Envelope) + Send + Sync,
{
    fn on_envelope(&self, envelope: &Envelope) {
        self(envelope)
    }
}

/// Unreliable group communication scoped by cluster token
pub trait Transport: Clone + Send + Sync + 'static {
    /// Identity used to drop our own envelopes
    fn identity(&self) -> &NodeId;

    /// Cluster this transport belongs to
    fn token(&self) -> &ClusterToken;

    /// Transmit one envelope to the group. No retry, no delivery confirmation.
    fn send(&self, envelope: &Envelope) -> impl Future<Output = Result<(), BeaconError>> + Send;

    /// Register a listener. The first registration starts the receive loop.
    fn add_listener(&self, listener: Arc<dyn Listener>);

    /// Wrap a payload in an envelope from this node
    fn envelope(&self, payload: Payload) -> Envelope {
        Envelope::new(self.identity().clone(), self.token().clone(), payload)
    }
}

/// Decode, filter, and fan-out for inbound datagrams
pub struct Dispatcher {
    identity: NodeId,
    token: ClusterToken,
    listeners: RwLock<Vec<Arc<dyn Listener>>>,
    receiving: AtomicBool,
}

impl Dispatcher {
    pub fn new(identity: NodeId, token: ClusterToken) -> Self {
        Self {
            identity,
            token,
            listeners: RwLock::new(Vec::new()),
            receiving: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &NodeId {
        &self.identity
    }

    pub fn token(&self) -> &ClusterToken {
        &self.token
    }

    /// Add a listener. Returns true exactly once: when the caller must start the receive loop.
    pub fn register(&self, listener: Arc<dyn Listener>) -> bool {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);

        !self.receiving.swap(true, Ordering::AcqRel)
    }

    #[cfg(test)]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Handle one inbound datagram. Returns the number of listeners invoked.
    pub fn dispatch(&self, data: &[u8], from: Option<SocketAddr>) -> usize {
        let envelope = match Envelope::decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(from = ?from, len = data.len(), error = %e, "Dropping undecodable datagram");
                return 0;
            }
        };

        if !envelope.accepted_by(&self.identity, &self.token) {
            tracing::trace!(sender = %envelope.sender, "Ignoring envelope (self or other cluster)");
            return 0;
        }

        // Snapshot so listeners may register further listeners without deadlocking
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for listener in &listeners {
            listener.on_envelope(&envelope);
        }

        listeners.len()
    }
}
