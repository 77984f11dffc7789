//! Configuration loading and validation.
//!
//! A daemon instance is described by a TOML file:
//!
//! ```toml
//! router_id = 1
//! incoming_ports = [5001]
//! periodic_update_time = 30
//! timeout = 180
//! garbage_collection_time = 120
//!
//! [[peers]]
//! router_id = 2
//! port = 5002
//! metric = 1
//! ```

use crate::router::{Peer, RouterConfig};
use crate::RouterId;
use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub router_id: u16,
    pub incoming_ports: Vec<u16>,
    /// Address all sockets bind to and all advertisements are sent to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Seconds between scheduled advertisements.
    pub periodic_update_time: u64,
    /// Seconds of silence before a route is poisoned.
    pub timeout: u64,
    /// Seconds after poisoning before a route is removed.
    pub garbage_collection_time: u64,
    /// How long a single readiness poll may wait, in milliseconds.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerConfig {
    pub router_id: u16,
    pub port: u16,
    pub metric: u8,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_poll_timeout_ms() -> u64 {
    500
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration")]
    Parse(#[from] toml::de::Error),
    #[error("router_id must be greater than zero")]
    InvalidRouterId,
    #[error("at least one incoming port is required")]
    NoIncomingPorts,
    #[error("port 0 cannot be bound")]
    InvalidPort,
    #[error("duplicate incoming port {0}")]
    DuplicateIncomingPort(u16),
    #[error("{0} must be greater than zero")]
    InvalidTimer(&'static str),
    #[error("peer {0} is not a valid router id")]
    InvalidPeerId(u16),
    #[error("peer {0} has link metric {1}, expected 1..=15")]
    InvalidLinkMetric(u16, u8),
    #[error("peer {0} is configured twice")]
    DuplicatePeer(u16),
}

impl Config {
    /// Reads, parses and validates the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        let config: Config = toml::from_str(&contents)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router_id == 0 {
            return Err(ConfigError::InvalidRouterId);
        }

        if self.incoming_ports.is_empty() {
            return Err(ConfigError::NoIncomingPorts);
        }

        let mut seen_ports = HashSet::new();
        for port in &self.incoming_ports {
            if *port == 0 {
                return Err(ConfigError::InvalidPort);
            }
            if !seen_ports.insert(*port) {
                return Err(ConfigError::DuplicateIncomingPort(*port));
            }
        }

        if self.periodic_update_time == 0 {
            return Err(ConfigError::InvalidTimer("periodic_update_time"));
        }
        if self.timeout == 0 {
            return Err(ConfigError::InvalidTimer("timeout"));
        }
        if self.garbage_collection_time == 0 {
            return Err(ConfigError::InvalidTimer("garbage_collection_time"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimer("poll_timeout_ms"));
        }

        let mut seen_peers = HashSet::new();
        for peer in &self.peers {
            if peer.router_id == 0 || peer.router_id == self.router_id {
                return Err(ConfigError::InvalidPeerId(peer.router_id));
            }
            if peer.port == 0 {
                return Err(ConfigError::InvalidPort);
            }
            if !(1..=15).contains(&peer.metric) {
                return Err(ConfigError::InvalidLinkMetric(peer.router_id, peer.metric));
            }
            if !seen_peers.insert(peer.router_id) {
                return Err(ConfigError::DuplicatePeer(peer.router_id));
            }
        }

        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            id: RouterId::new(self.router_id),
            peers: self
                .peers
                .iter()
                .map(|peer| Peer {
                    id: RouterId::new(peer.router_id),
                    port: peer.port,
                    link_metric: peer.metric,
                })
                .collect(),
            periodic_interval: Duration::from_secs(self.periodic_update_time),
            timeout: Duration::from_secs(self.timeout),
            gc_window: Duration::from_secs(self.garbage_collection_time),
        }
    }
}
