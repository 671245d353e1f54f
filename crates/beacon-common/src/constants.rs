//! Protocol constants and defaults shared by Beacon components.
//!
//! The multicast group and port are part of the protocol: every Beacon node on a
//! network segment uses the same pair, and only the cluster token separates clusters.

use std::net::Ipv4Addr;

/// Multicast group all nodes announce on
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 42, 99);

/// Multicast port all nodes announce on
pub const MULTICAST_PORT: u16 = 45892;

/// Receive buffer size; larger datagrams are truncated by the kernel
pub const RECV_BUFFER_SIZE: usize = 1024;

/// Largest envelope we are willing to put on the wire
pub const MAX_ENVELOPE_BYTES: usize = RECV_BUFFER_SIZE;

/// Multicast TTL (stay on the local segment)
pub const MULTICAST_TTL: u32 = 1;

/// Conventional leader port that naive clients hard-code
pub const DEFAULT_LEADER_PORT: u16 = 8080;

/// Address the redirect responder binds on
pub const DEFAULT_REDIRECT_BIND_HOST: &str = "0.0.0.0";

/// Lower bound of the randomized discovery window (milliseconds)
pub const DEFAULT_WINDOW_MIN_MS: u64 = 3_000;

/// Upper bound of the randomized discovery window (milliseconds)
pub const DEFAULT_WINDOW_MAX_MS: u64 = 6_000;

/// Interval between leader announcements (milliseconds)
pub const DEFAULT_ANNOUNCE_INTERVAL_MS: u64 = 1_000;

/// Time a worker gets to exit after SIGTERM before it is killed (milliseconds)
pub const DEFAULT_TERMINATE_GRACE_MS: u64 = 5_000;

/// Length of the random node identifier (hex characters)
pub const NODE_ID_LEN: usize = 8;

/// Placeholders substituted into worker flag values once discovery completes
pub mod placeholders {
    /// Leader host, e.g. `10.0.0.4`
    pub const LEADER_HOST: &str = "{leader_host}";

    /// Leader port, e.g. `8080`
    pub const LEADER_PORT: &str = "{leader_port}";

    /// Leader URL, e.g. `http://10.0.0.4:8080/`
    pub const LEADER_URL: &str = "{leader_url}";
}
