//! UDP Manager
//!
//! Datagram sockets carry no connection state: creating a server binds a
//! port and starts receiving, creating a client binds an ephemeral local
//! port so replies can come back. Sends are discrete datagrams to either the
//! client's default destination or an explicit per-call target.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{EventBus, SocketEvent};
use crate::metrics::Metrics;

use super::types::{
    UdpClientConfig, UdpClientInstance, UdpServerConfig, UdpServerInstance, UdpTarget,
};

/// Largest datagram a recv loop will accept
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Everything guarded by the manager's state lock
#[derive(Default)]
struct UdpState {
    servers: HashMap<String, UdpServerInstance>,
    clients: HashMap<String, UdpClientInstance>,
}

/// Bind a datagram socket without awaiting, so it can run under the state
/// lock. Every failure in the sequence surfaces as a bind error.
fn bind_udp(host: &str, port: u16, reuse_addr: bool) -> Result<(UdpSocket, SocketAddr)> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid bind address {}:{}", host, port)))?;

    let bind_err = |e: io::Error| Error::Bind {
        addr: addr.to_string(),
        source: e,
    };

    let socket =
        Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    if reuse_addr {
        socket.set_reuse_address(true).map_err(bind_err)?;
    }
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    let socket = UdpSocket::from_std(socket.into()).map_err(bind_err)?;
    let local_addr = socket.local_addr().map_err(bind_err)?;
    Ok((socket, local_addr))
}

/// Manages named UDP servers and clients
#[derive(Clone)]
pub struct UdpManager {
    state: Arc<Mutex<UdpState>>,
    events: EventBus,
    metrics: Arc<Metrics>,
}

impl UdpManager {
    /// Create a new UdpManager
    pub fn new(events: EventBus, metrics: Arc<Metrics>) -> Self {
        Self {
            state: Arc::new(Mutex::new(UdpState::default())),
            events,
            metrics,
        }
    }

    /// The event bus this manager publishes to
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Bind a named datagram server and start receiving
    pub async fn create_server(&self, name: &str, config: UdpServerConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.servers.contains_key(name) {
            return Err(Error::ServerAlreadyExists(name.to_string()));
        }

        let (socket, local_addr) = bind_udp(&config.host, config.port, config.reuse_addr)?;
        let socket = Arc::new(socket);

        let recv_task = tokio::spawn(Self::server_recv_loop(
            self.clone(),
            name.to_string(),
            Arc::clone(&socket),
        ));
        state.servers.insert(
            name.to_string(),
            UdpServerInstance {
                config,
                socket,
                local_addr,
                recv_task,
            },
        );

        info!("UDP server '{}' listening on {}", name, local_addr);
        self.events.publish(SocketEvent::UdpListening {
            name: name.to_string(),
            addr: local_addr,
        });
        Ok(())
    }

    /// Close a named datagram server
    pub async fn close_server(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(instance) = state.servers.remove(name) else {
            return Err(Error::ServerNotFound(name.to_string()));
        };
        instance.recv_task.abort();
        info!("UDP server '{}' closed", name);
        Ok(())
    }

    /// Create a named datagram client bound to an ephemeral local port
    pub async fn create_client(&self, name: &str, config: UdpClientConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.clients.contains_key(name) {
            return Err(Error::ClientAlreadyExists(name.to_string()));
        }

        let (socket, local_addr) = bind_udp("0.0.0.0", 0, false)?;
        let socket = Arc::new(socket);

        let recv_task = tokio::spawn(Self::client_recv_loop(
            self.clone(),
            name.to_string(),
            Arc::clone(&socket),
        ));
        info!(
            "UDP client '{}' created for {}:{} (local {})",
            name, config.host, config.port, local_addr
        );
        state.clients.insert(
            name.to_string(),
            UdpClientInstance {
                config,
                socket,
                local_addr,
                recv_task,
            },
        );
        Ok(())
    }

    /// Close a named datagram client
    pub async fn close_client(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(instance) = state.clients.remove(name) else {
            return Err(Error::ClientNotFound(name.to_string()));
        };
        instance.recv_task.abort();
        info!("UDP client '{}' closed", name);
        Ok(())
    }

    /// Send one datagram from a named client. UDP is connectionless, so this
    /// needs no prior connect; it fails only for an unknown name or a failed
    /// send. `target` overrides the client's default destination.
    pub async fn send_message(
        &self,
        name: &str,
        payload: &[u8],
        target: Option<UdpTarget>,
    ) -> Result<()> {
        let (socket, endpoint) = {
            let state = self.state.lock().await;
            let instance = state
                .clients
                .get(name)
                .ok_or_else(|| Error::ClientNotFound(name.to_string()))?;
            let endpoint = match &target {
                Some(t) => t.endpoint(),
                None => format!("{}:{}", instance.config.host, instance.config.port),
            };
            (Arc::clone(&instance.socket), endpoint)
        };

        match socket.send_to(payload, endpoint.as_str()).await {
            Ok(sent) => {
                debug!("UDP client '{}' sent {} bytes to {}", name, sent, endpoint);
                self.metrics.datagram_sent();
                Ok(())
            }
            Err(e) => {
                warn!("UDP client '{}' send to {} failed: {}", name, endpoint, e);
                self.metrics.send_failed();
                Err(Error::Write(e))
            }
        }
    }

    /// Send one datagram from a named server socket, typically a reply to a
    /// previously received datagram's source address
    pub async fn send_from_server(
        &self,
        name: &str,
        payload: &[u8],
        target: UdpTarget,
    ) -> Result<()> {
        let socket = {
            let state = self.state.lock().await;
            let instance = state
                .servers
                .get(name)
                .ok_or_else(|| Error::ServerNotFound(name.to_string()))?;
            Arc::clone(&instance.socket)
        };

        let endpoint = target.endpoint();
        match socket.send_to(payload, endpoint.as_str()).await {
            Ok(sent) => {
                debug!("UDP server '{}' sent {} bytes to {}", name, sent, endpoint);
                self.metrics.datagram_sent();
                Ok(())
            }
            Err(e) => {
                warn!("UDP server '{}' send to {} failed: {}", name, endpoint, e);
                self.metrics.send_failed();
                Err(Error::Write(e))
            }
        }
    }

    /// Names of all datagram servers
    pub async fn server_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.servers.keys().cloned().collect()
    }

    /// Names of all datagram clients
    pub async fn client_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.clients.keys().cloned().collect()
    }

    pub async fn has_server(&self, name: &str) -> bool {
        let state = self.state.lock().await;
        state.servers.contains_key(name)
    }

    pub async fn has_client(&self, name: &str) -> bool {
        let state = self.state.lock().await;
        state.clients.contains_key(name)
    }

    /// Bound address of a server, or `None` for an unknown name
    pub async fn server_addr(&self, name: &str) -> Option<SocketAddr> {
        let state = self.state.lock().await;
        state.servers.get(name).map(|instance| instance.local_addr)
    }

    /// Local address of a client, or `None` for an unknown name
    pub async fn client_addr(&self, name: &str) -> Option<SocketAddr> {
        let state = self.state.lock().await;
        state.clients.get(name).map(|instance| instance.local_addr)
    }

    /// Close every server and client this manager owns
    pub async fn close_all(&self) {
        for name in self.server_names().await {
            if let Err(e) = self.close_server(&name).await {
                warn!("failed to close UDP server '{}': {}", name, e);
            }
        }
        for name in self.client_names().await {
            if let Err(e) = self.close_client(&name).await {
                warn!("failed to close UDP client '{}': {}", name, e);
            }
        }
    }

    /// Relay inbound datagrams as events until the socket fails or the task
    /// is aborted
    async fn server_recv_loop(manager: UdpManager, name: String, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((n, from)) => {
                    debug!("UDP server '{}' received {} bytes from {}", name, n, from);
                    manager.metrics.datagram_received();
                    manager.events.publish(SocketEvent::UdpDatagram {
                        name: name.clone(),
                        payload: Bytes::copy_from_slice(&buf[..n]),
                        from,
                    });
                }
                Err(e) => {
                    warn!("UDP server '{}' receive error: {}", name, e);
                    manager.events.publish(SocketEvent::UdpServerError {
                        name: name.clone(),
                        error: e.to_string(),
                    });
                    return;
                }
            }
        }
    }

    async fn client_recv_loop(manager: UdpManager, name: String, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((n, from)) => {
                    debug!("UDP client '{}' received {} bytes from {}", name, n, from);
                    manager.metrics.datagram_received();
                    manager.events.publish(SocketEvent::UdpClientDatagram {
                        name: name.clone(),
                        payload: Bytes::copy_from_slice(&buf[..n]),
                        from,
                    });
                }
                Err(e) => {
                    warn!("UDP client '{}' receive error: {}", name, e);
                    manager.events.publish(SocketEvent::UdpClientError {
                        name: name.clone(),
                        error: e.to_string(),
                    });
                    return;
                }
            }
        }
    }
}
