//! TCP Instance Types

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::registry::ConnectionId;

/// Configuration of one named listening server
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TcpServerConfig {
    /// Bind host; must be an IP address
    pub host: String,
    /// Listen port; 0 asks the OS for an ephemeral port
    pub port: u16,
    pub backlog: u32,
    /// Enable SO_KEEPALIVE on accepted sockets
    pub keep_alive: bool,
    /// Start this server during bootstrap
    pub auto_start: bool,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            backlog: 511,
            keep_alive: false,
            auto_start: false,
        }
    }
}

/// Configuration of one named outbound client
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TcpClientConfig {
    /// Target host; IP address or resolvable name
    pub host: String,
    pub port: u16,
    /// Per-client connect timeout; falls back to the manager-wide default
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
    /// Enable SO_KEEPALIVE on the connected socket
    pub keep_alive: bool,
    /// Delay between automatic reconnect attempts; reconnection only runs
    /// when `max_reconnect_attempts` is also set
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Option<Duration>,
    pub max_reconnect_attempts: Option<u32>,
    /// Connect this client during bootstrap
    pub auto_connect: bool,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            connect_timeout: None,
            keep_alive: false,
            reconnect_interval: None,
            max_reconnect_attempts: None,
            auto_connect: false,
        }
    }
}

/// Client connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Disconnected => "disconnected",
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named listening server and the connections it owns
pub(crate) struct ServerInstance {
    pub(crate) config: TcpServerConfig,
    pub(crate) local_addr: SocketAddr,
    pub(crate) running: bool,
    pub(crate) connection_ids: HashSet<ConnectionId>,
    pub(crate) accept_task: JoinHandle<()>,
}

impl Drop for ServerInstance {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// One named outbound client and its reconnect bookkeeping
pub(crate) struct ClientInstance {
    pub(crate) config: TcpClientConfig,
    pub(crate) state: ClientState,
    pub(crate) reconnect_attempts: u32,
    /// Bumped on every successful connect so callbacks from a previous
    /// socket cannot tear down the current one
    pub(crate) generation: u64,
    pub(crate) writer: Option<Arc<Mutex<OwnedWriteHalf>>>,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) reader_task: Option<JoinHandle<()>>,
    pub(crate) reconnect_timer: Option<JoinHandle<()>>,
}

impl ClientInstance {
    pub(crate) fn new(config: TcpClientConfig) -> Self {
        Self {
            config,
            state: ClientState::Disconnected,
            reconnect_attempts: 0,
            generation: 0,
            writer: None,
            remote_addr: None,
            reader_task: None,
            reconnect_timer: None,
        }
    }

    /// Cancel the pending reconnect timer, if one is scheduled
    pub(crate) fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    /// Stop the read loop of the current socket, if one is running
    pub(crate) fn abort_reader(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

impl Drop for ClientInstance {
    fn drop(&mut self) {
        self.cancel_reconnect_timer();
        self.abort_reader();
    }
}

/// Snapshot of a server for queries
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub local_addr: SocketAddr,
    pub running: bool,
    pub connections: usize,
}

/// Snapshot of a client for queries
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub state: ClientState,
    pub remote_addr: Option<SocketAddr>,
    pub reconnect_attempts: u32,
}

/// Outcome of one write within a broadcast
#[derive(Debug, Clone)]
pub struct SendReport {
    pub id: ConnectionId,
    pub error: Option<String>,
}

impl SendReport {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}
