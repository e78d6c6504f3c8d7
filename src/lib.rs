//! SockHub Library
//!
//! Multi-instance socket connection manager built with Rust. Runs any number
//! of named TCP servers, TCP clients, and UDP endpoints side by side, tracks
//! every inbound connection in a registry, keeps links alive with heartbeat
//! probes, reconnects dropped clients automatically, and reports everything
//! that happens on a single lifecycle event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod metrics;
pub mod registry;
pub mod shutdown;
pub mod tcp;
pub mod udp;

pub use config::{Config, ConfigManager};
pub use error::{Error, Result};
pub use events::{EventBus, SocketEvent};
pub use heartbeat::HeartbeatConfig;
pub use metrics::Metrics;
pub use registry::{ConnectionId, ConnectionInfo};
pub use shutdown::ShutdownCoordinator;
pub use tcp::TcpManager;
pub use udp::UdpManager;
