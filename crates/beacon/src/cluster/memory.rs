//! In-memory transport emulating one multicast segment.
//!
//! Every transport joined to the same [`MemoryNetwork`] sees every datagram,
//! including its own, and runs it through the same [`Dispatcher`] as the
//! multicast transport.

use std::sync::Arc;

use tokio::sync::broadcast;

use beacon_common::{BeaconError, ClusterToken, Envelope, NodeId};

use super::transport::{Dispatcher, Listener, Transport};

const SEGMENT_CAPACITY: usize = 256;

/// A shared "network segment"
#[derive(Clone)]
pub struct MemoryNetwork {
    tx: broadcast::Sender<Vec<u8>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SEGMENT_CAPACITY);
        Self { tx }
    }

    /// Attach a node to the segment
    pub fn join(&self, identity: NodeId, token: ClusterToken) -> MemoryTransport {
        MemoryTransport {
            inner: Arc::new(Inner {
                tx: self.tx.clone(),
                dispatcher: Dispatcher::new(identity, token),
            }),
        }
    }

    /// Put raw bytes on the segment, bypassing encoding
    pub fn inject(&self, datagram: &[u8]) {
        let _ = self.tx.send(datagram.to_vec());
    }
}

#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<Vec<u8>>,
    dispatcher: Dispatcher,
}

impl Transport for MemoryTransport {
    fn identity(&self) -> &NodeId {
        self.inner.dispatcher.identity()
    }

    fn token(&self) -> &ClusterToken {
        self.inner.dispatcher.token()
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), BeaconError> {
        let bytes = envelope.encode()?;
        // Nobody listening is not an error on a lossy segment
        let _ = self.inner.tx.send(bytes);
        Ok(())
    }

    fn add_listener(&self, listener: Arc<dyn Listener>) {
        if self.inner.dispatcher.register(listener) {
            let mut rx = self.inner.tx.subscribe();
            let inner = self.inner.clone();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(datagram) => {
                            inner.dispatcher.dispatch(&datagram, None);
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_common::{LeaderAddress, Payload};
    use std::sync::Mutex;
    use std::time::Duration;

    fn recorder(transport: &MemoryTransport) -> Arc<Mutex<Vec<Envelope>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        transport.add_listener(Arc::new(move |envelope: &Envelope| {
            sink.lock().unwrap().push(envelope.clone());
        }));
        seen
    }

    #[tokio::test]
    async fn test_delivery_is_scoped_and_skips_self() {
        let network = MemoryNetwork::new();
        let a = network.join(NodeId::from("a"), ClusterToken::new("x"));
        let b = network.join(NodeId::from("b"), ClusterToken::new("x"));
        let c = network.join(NodeId::from("c"), ClusterToken::new("y"));

        let seen_a = recorder(&a);
        let seen_b = recorder(&b);
        let seen_c = recorder(&c);

        let payload = Payload::leader_info(&LeaderAddress::new("10.0.0.1", 8080));
        a.send(&a.envelope(payload)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(seen_b.lock().unwrap().len(), 1);
        assert!(seen_c.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_receive_loop_survives_garbage() {
        let network = MemoryNetwork::new();
        let a = network.join(NodeId::from("a"), ClusterToken::new("x"));
        let b = network.join(NodeId::from("b"), ClusterToken::new("x"));
        let seen_b = recorder(&b);

        network.inject(b"\xde\xad\xbe\xef");
        network.inject(b"{\"sender\":42}");
        a.send(&a.envelope(Payload::Unknown)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = seen_b.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sender, NodeId::from("a"));
    }
}
