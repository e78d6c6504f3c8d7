//! TCP Management Module
//!
//! Named listening servers, named outbound clients with automatic
//! reconnection, and the connections flowing through them.

pub mod client;
pub mod manager;
pub mod server;
pub mod types;

pub use manager::TcpManager;
pub use types::{ClientInfo, ClientState, SendReport, ServerInfo, TcpClientConfig, TcpServerConfig};
