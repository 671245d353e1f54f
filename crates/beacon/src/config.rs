//! Configuration management for Beacon.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use beacon_common::constants::{
    DEFAULT_ANNOUNCE_INTERVAL_MS, DEFAULT_LEADER_PORT, DEFAULT_REDIRECT_BIND_HOST,
    DEFAULT_TERMINATE_GRACE_MS, DEFAULT_WINDOW_MAX_MS, DEFAULT_WINDOW_MIN_MS,
};
use beacon_common::{BeaconError, ClusterToken, LeaderAddress};

use crate::cluster::{DiscoverySettings, local_interface_addr};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Cluster token; nodes only talk to nodes with the same token
    #[serde(default)]
    pub token: String,

    /// Host we announce when leading (auto-detected if not set)
    #[serde(default)]
    pub advertise_host: Option<String>,

    /// Conventional leader port
    #[serde(default = "default_leader_port")]
    pub leader_port: u16,

    /// Host the follower's redirect responder binds on
    #[serde(default = "default_redirect_bind_host")]
    pub redirect_bind_host: String,

    /// Discovery timing
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Worker programs
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Discovery timing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Shortest wait for an announcement (milliseconds)
    #[serde(default = "default_window_min")]
    pub window_min_ms: u64,

    /// Longest wait for an announcement (milliseconds)
    #[serde(default = "default_window_max")]
    pub window_max_ms: u64,

    /// Leader announcement interval (milliseconds)
    #[serde(default = "default_announce_interval")]
    pub announce_interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            window_min_ms: default_window_min(),
            window_max_ms: default_window_max(),
            announce_interval_ms: default_announce_interval(),
        }
    }
}

impl DiscoveryConfig {
    pub fn settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            window_min: Duration::from_millis(self.window_min_ms),
            window_max: Duration::from_millis(self.window_max_ms),
            announce_interval: Duration::from_millis(self.announce_interval_ms),
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Program run when this node leads
    #[serde(default)]
    pub leader: WorkerProgram,

    /// Program run when this node follows
    #[serde(default)]
    pub follower: WorkerProgram,

    /// Time between SIGTERM and kill (milliseconds)
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            leader: WorkerProgram::default(),
            follower: WorkerProgram::default(),
            terminate_grace_ms: default_terminate_grace(),
        }
    }
}

impl WorkerConfig {
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

/// One worker executable and its flags (`--foo` or `--foo=bar`).
/// Positional arguments are rejected at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerProgram {
    #[serde(default)]
    pub executable: String,

    #[serde(default)]
    pub flags: Vec<String>,
}

// Default value functions
fn default_leader_port() -> u16 { DEFAULT_LEADER_PORT }
fn default_redirect_bind_host() -> String { DEFAULT_REDIRECT_BIND_HOST.to_string() }
fn default_window_min() -> u64 { DEFAULT_WINDOW_MIN_MS }
fn default_window_max() -> u64 { DEFAULT_WINDOW_MAX_MS }
fn default_announce_interval() -> u64 { DEFAULT_ANNOUNCE_INTERVAL_MS }
fn default_terminate_grace() -> u64 { DEFAULT_TERMINATE_GRACE_MS }

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref token) = args.token {
            config.token = token.clone();
        }
        if let Some(ref host) = args.advertise_host {
            config.advertise_host = Some(host.clone());
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations discovery cannot run with
    pub fn validate(&self) -> Result<(), BeaconError> {
        if self.token.trim().is_empty() {
            return Err(BeaconError::Config(
                "cluster token is required (--token or BEACON_CLUSTER_TOKEN)".to_string(),
            ));
        }
        if self.discovery.window_min_ms > self.discovery.window_max_ms {
            return Err(BeaconError::Config(format!(
                "discovery window is empty: min {}ms > max {}ms",
                self.discovery.window_min_ms, self.discovery.window_max_ms
            )));
        }
        if self.discovery.announce_interval_ms == 0 {
            return Err(BeaconError::Config(
                "announce interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cluster_token(&self) -> ClusterToken {
        ClusterToken::new(self.token.clone())
    }

    /// Address we announce if we become leader
    pub fn self_address(&self) -> LeaderAddress {
        let host = match &self.advertise_host {
            Some(host) => host.clone(),
            None => local_interface_addr()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| {
                    tracing::warn!("Could not detect a routable interface, advertising 127.0.0.1");
                    "127.0.0.1".to_string()
                }),
        };
        LeaderAddress::new(host, self.leader_port)
    }

    /// Where the follower's redirect responder listens
    pub fn redirect_bind_addr(&self) -> Result<SocketAddr, BeaconError> {
        let ip: IpAddr = self.redirect_bind_host.parse().map_err(|_| {
            BeaconError::Config(format!(
                "invalid redirect bind host '{}'",
                self.redirect_bind_host
            ))
        })?;
        Ok(SocketAddr::new(ip, self.leader_port))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            advertise_host: None,
            leader_port: default_leader_port(),
            redirect_bind_host: default_redirect_bind_host(),
            discovery: DiscoveryConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}
