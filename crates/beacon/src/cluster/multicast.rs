//! UDP multicast transport.
//!
//! Every node joins the same well-known group (`239.255.42.99:45892`) with
//! `SO_REUSEADDR`/`SO_REUSEPORT`, so several nodes may share a host. Loopback is
//! left on; our own envelopes come back and are dropped by sender identity.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use beacon_common::constants::{MULTICAST_GROUP, MULTICAST_PORT, MULTICAST_TTL, RECV_BUFFER_SIZE};
use beacon_common::{BeaconError, ClusterToken, Envelope, NodeId};

use super::transport::{Dispatcher, Listener, Transport};

/// Transport over the well-known multicast group
#[derive(Clone)]
pub struct MulticastTransport {
    inner: Arc<Inner>,
}

struct Inner {
    socket: UdpSocket,
    group: SocketAddrV4,
    dispatcher: Dispatcher,
}

impl MulticastTransport {
    /// Join the protocol's multicast group. Must be called inside a Tokio runtime.
    pub fn bind(identity: NodeId, token: ClusterToken) -> Result<Self, BeaconError> {
        Self::bind_group(SocketAddrV4::new(MULTICAST_GROUP, MULTICAST_PORT), identity, token)
    }

    /// Join an explicit multicast group
    pub fn bind_group(
        group: SocketAddrV4,
        identity: NodeId,
        token: ClusterToken,
    ) -> Result<Self, BeaconError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;

        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, group.port()));
        socket.bind(&bind_addr.into())?;
        socket.join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_multicast_ttl_v4(MULTICAST_TTL)?;

        let socket = UdpSocket::from_std(socket.into())?;

        tracing::info!(
            group = %group,
            node = %identity,
            "📡 Joined discovery multicast group"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                socket,
                group,
                dispatcher: Dispatcher::new(identity, token),
            }),
        })
    }

    /// Receive datagrams until the runtime shuts down
    async fn run_receiver(self) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        tracing::debug!(group = %self.inner.group, "👂 Discovery receiver started");

        loop {
            match self.inner.socket.recv_from(&mut buf).await {
                Ok((len, addr)) => {
                    self.inner.dispatcher.dispatch(&buf[..len], Some(addr));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Discovery receive error");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

impl Transport for MulticastTransport {
    fn identity(&self) -> &NodeId {
        self.inner.dispatcher.identity()
    }

    fn token(&self) -> &ClusterToken {
        self.inner.dispatcher.token()
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), BeaconError> {
        let bytes = envelope.encode()?;
        self.inner.socket.send_to(&bytes, self.inner.group).await?;
        tracing::trace!(len = bytes.len(), "Sent envelope");
        Ok(())
    }

    fn add_listener(&self, listener: Arc<dyn Listener>) {
        if self.inner.dispatcher.register(listener) {
            tokio::spawn(self.clone().run_receiver());
        }
    }
}

/// Address of the interface that routes toward the multicast group.
///
/// Connecting a UDP socket sends nothing; it only asks the kernel for a route.
pub fn local_interface_addr() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((MULTICAST_GROUP, MULTICAST_PORT)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_common::{LeaderAddress, Payload};
    use tokio::sync::mpsc;

    /// Attach a listener that forwards every accepted sender id
    fn record_senders(transport: &MulticastTransport) -> mpsc::UnboundedReceiver<NodeId> {
        let (tx, rx) = mpsc::unbounded_channel();
        transport.add_listener(Arc::new(move |envelope: &Envelope| {
            let _ = tx.send(envelope.sender.clone());
        }));
        rx
    }

    #[tokio::test]
    async fn test_same_cluster_peer_receives_and_sender_drops_own_envelope() {
        let group = SocketAddrV4::new(Ipv4Addr::new(239, 255, 42, 77), 45977);
        let token = ClusterToken::new("multicast-test");

        let a = MulticastTransport::bind_group(group, NodeId::from("a"), token.clone()).unwrap();
        let b = MulticastTransport::bind_group(group, NodeId::from("b"), token).unwrap();
        let c = MulticastTransport::bind_group(group, NodeId::from("c"), ClusterToken::new("other"))
            .unwrap();

        let mut seen_a = record_senders(&a);
        let mut seen_b = record_senders(&b);
        let mut seen_c = record_senders(&c);

        // Let the receive loops reach recv_from
        tokio::time::sleep(Duration::from_millis(50)).await;

        let envelope = a.envelope(Payload::leader_info(&LeaderAddress::new("10.0.0.1", 8080)));
        a.send(&envelope).await.unwrap();

        let sender = tokio::time::timeout(Duration::from_secs(2), seen_b.recv())
            .await
            .expect("peer never received the envelope")
            .unwrap();
        assert_eq!(sender, NodeId::from("a"));

        // Loopback hands the datagram back to A as well; it must be dropped
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(seen_a.try_recv().is_err());
        assert!(seen_c.try_recv().is_err());
    }

    #[test]
    fn test_local_interface_addr_is_specific() {
        // Sandboxes without a route yield None; anything returned must be usable
        if let Some(ip) = local_interface_addr() {
            assert!(!ip.is_unspecified());
        }
    }
}
