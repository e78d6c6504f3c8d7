//! UDP Management Module
//!
//! Named datagram servers and clients. Connectionless: no reconnect machine
//! and no per-connection registry, just bound sockets and discrete sends.

pub mod manager;
pub mod types;

pub use manager::UdpManager;
pub use types::{UdpClientConfig, UdpServerConfig, UdpTarget};
