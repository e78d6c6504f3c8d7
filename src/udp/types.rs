//! UDP Instance Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Configuration of one named datagram server
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UdpServerConfig {
    /// Bind host; must be an IP address
    pub host: String,
    pub port: u16,
    /// Enable SO_REUSEADDR on the bound socket
    pub reuse_addr: bool,
    /// Start this server during bootstrap
    pub auto_start: bool,
}

impl Default for UdpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            reuse_addr: false,
            auto_start: false,
        }
    }
}

/// Configuration of one named datagram client. The host and port name the
/// default destination; individual sends may override it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UdpClientConfig {
    pub host: String,
    pub port: u16,
    /// Create this client during bootstrap
    pub auto_connect: bool,
}

impl Default for UdpClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            auto_connect: false,
        }
    }
}

/// Explicit per-send destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpTarget {
    pub host: String,
    pub port: u16,
}

impl UdpTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub(crate) fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One bound datagram server socket
pub(crate) struct UdpServerInstance {
    pub(crate) config: UdpServerConfig,
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) local_addr: SocketAddr,
    pub(crate) recv_task: JoinHandle<()>,
}

impl Drop for UdpServerInstance {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// One datagram client socket on an ephemeral local port
pub(crate) struct UdpClientInstance {
    pub(crate) config: UdpClientConfig,
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) local_addr: SocketAddr,
    pub(crate) recv_task: JoinHandle<()>,
}

impl Drop for UdpClientInstance {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = UdpServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert!(!config.reuse_addr);
    }

    #[test]
    fn test_target_endpoint() {
        let target = UdpTarget::new("10.1.2.3", 9300);
        assert_eq!(target.endpoint(), "10.1.2.3:9300");
    }
}
