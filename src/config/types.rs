//! Configuration Types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::heartbeat::HeartbeatConfig;
use crate::tcp::{TcpClientConfig, TcpServerConfig};
use crate::udp::{UdpClientConfig, UdpServerConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub heartbeat: HeartbeatConfig,
    pub tcp: TcpConfig,
    pub udp: UdpConfig,
}

/// Manager-wide settings shared by every instance
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default connect timeout for TCP clients that set none of their own
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Cap on simultaneously open inbound connections across all servers
    pub max_connections: usize,
    /// Per-socket read buffer size in bytes
    pub read_buffer_size: usize,
    /// Capacity of the lifecycle event channel
    pub event_buffer_size: usize,
    /// How long graceful shutdown waits for connections to drain
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Start every configured TCP/UDP server at boot
    pub auto_start_all: bool,
    /// Connect every configured client at boot
    pub auto_connect_all: bool,
    pub log_level: String,
}

/// Named TCP instances declared in configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TcpConfig {
    pub servers: HashMap<String, TcpServerConfig>,
    pub clients: HashMap<String, TcpClientConfig>,
}

/// Named UDP instances declared in configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct UdpConfig {
    pub servers: HashMap<String, UdpServerConfig>,
    pub clients: HashMap<String, UdpClientConfig>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            max_connections: 1000,
            read_buffer_size: 8192,
            event_buffer_size: 1024,
            shutdown_timeout: Duration::from_secs(30),
            auto_start_all: false,
            auto_connect_all: false,
            log_level: "info".to_string(),
        }
    }
}
