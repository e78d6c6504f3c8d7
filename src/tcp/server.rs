//! TCP Server Operations
//!
//! Listener lifecycle and inbound connection handling. Binding happens
//! eagerly inside `create_server`, under the state lock, so the `listening`
//! event always precedes the first `connection` event of that server.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::events::SocketEvent;
use crate::heartbeat::ProbeTarget;
use crate::registry::{Connection, ConnectionId};

use super::manager::TcpManager;
use super::types::{SendReport, ServerInstance, TcpServerConfig};

/// Bind a listener without awaiting, so it can run under the state lock
fn bind_listener(config: &TcpServerConfig) -> Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|_| {
            Error::InvalidConfig(format!(
                "invalid listen address {}:{}",
                config.host, config.port
            ))
        })?;

    let bind_err = |e: io::Error| Error::Bind {
        addr: addr.to_string(),
        source: e,
    };

    let socket =
        Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket
        .listen(config.backlog.min(i32::MAX as u32) as i32)
        .map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    TcpListener::from_std(socket.into()).map_err(bind_err)
}

impl TcpManager {
    /// Create a named server and start accepting immediately. Fails if the
    /// name is taken or the address cannot be bound; no instance is retained
    /// on failure.
    pub async fn create_server(&self, name: &str, config: TcpServerConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.servers.contains_key(name) {
            return Err(Error::ServerAlreadyExists(name.to_string()));
        }

        let listener = bind_listener(&config)?;
        let local_addr = listener.local_addr()?;

        let accept_task = tokio::spawn(Self::accept_loop(
            self.clone(),
            name.to_string(),
            listener,
            config.keep_alive,
        ));

        state.servers.insert(
            name.to_string(),
            ServerInstance {
                config,
                local_addr,
                running: true,
                connection_ids: HashSet::new(),
                accept_task,
            },
        );

        info!("TCP server '{}' listening on {}", name, local_addr);
        self.events.publish(SocketEvent::Listening {
            server: name.to_string(),
            addr: local_addr,
        });
        Ok(())
    }

    /// Stop listening and force-close every connection the server owns
    pub async fn close_server(&self, name: &str) -> Result<()> {
        let closed = {
            let mut state = self.state.lock().await;
            let Some(instance) = state.servers.remove(name) else {
                return Err(Error::ServerNotFound(name.to_string()));
            };
            instance.accept_task.abort();

            for id in &instance.connection_ids {
                if let Some(conn) = state.registry.unregister(id) {
                    self.metrics.connection_closed(conn.opened_at.elapsed());
                    self.events.publish(SocketEvent::ConnectionEnd {
                        server: name.to_string(),
                        id: id.clone(),
                    });
                    conn.signal_close();
                }
            }
            instance.connection_ids.len()
        };

        self.heartbeat
            .cancel(&ProbeTarget::Server(name.to_string()))
            .await;

        info!("TCP server '{}' closed, {} connections dropped", name, closed);
        Ok(())
    }

    /// Write `payload` to every open connection of one server. Best-effort:
    /// one failed write does not abort the others, and each failure is
    /// reported in the returned list.
    pub async fn send_to_all(&self, name: &str, payload: &[u8]) -> Result<Vec<SendReport>> {
        let connections = {
            let state = self.state.lock().await;
            let instance = state
                .servers
                .get(name)
                .ok_or_else(|| Error::ServerNotFound(name.to_string()))?;
            if !instance.running {
                return Err(Error::ServerNotRunning(name.to_string()));
            }
            instance
                .connection_ids
                .iter()
                .filter_map(|id| state.registry.get(id))
                .collect::<Vec<_>>()
        };

        let mut reports = Vec::with_capacity(connections.len());
        for conn in connections {
            match conn.write(payload).await {
                Ok(()) => {
                    self.metrics.bytes_sent(payload.len() as u64);
                    reports.push(SendReport {
                        id: conn.id.clone(),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("broadcast write to {} failed: {}", conn.id, e);
                    self.metrics.send_failed();
                    reports.push(SendReport {
                        id: conn.id.clone(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(reports)
    }

    /// Accept inbound sockets until the listener fails or the task is aborted
    async fn accept_loop(manager: TcpManager, name: String, listener: TcpListener, keep_alive: bool) {
        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    if keep_alive {
                        if let Err(e) = SockRef::from(&stream).set_keepalive(true) {
                            warn!("failed to enable keep-alive for {}: {}", remote, e);
                        }
                    }
                    manager.register_inbound(&name, stream, remote).await;
                }
                Err(e) => {
                    error!("TCP server '{}' accept failed: {}", name, e);
                    manager.server_failed(&name, e.to_string()).await;
                    return;
                }
            }
        }
    }

    /// Register an accepted socket and wire its read loop. The connection is
    /// in the registry and in the server's set before the `connection` event
    /// is published.
    async fn register_inbound(&self, server: &str, stream: TcpStream, remote: SocketAddr) {
        let local = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("dropping connection from {}: {}", remote, e);
                return;
            }
        };

        let mut state = self.state.lock().await;
        if state.registry.len() >= self.max_connections {
            warn!(
                "connection cap ({}) reached, dropping connection from {}",
                self.max_connections, remote
            );
            return;
        }
        if !state.servers.contains_key(server) {
            // server closed between accept and registration
            return;
        }

        let id = self.ids.next_id();
        let (read_half, write_half) = stream.into_split();
        let (close_tx, close_rx) = watch::channel(false);
        let connection = Connection::new(
            id.clone(),
            server.to_string(),
            remote,
            local,
            write_half,
            close_tx,
        );
        state.registry.register(Arc::new(connection));
        if let Some(instance) = state.servers.get_mut(server) {
            instance.connection_ids.insert(id.clone());
        }
        self.metrics.connection_opened();

        tokio::spawn(Self::connection_read_loop(
            self.clone(),
            server.to_string(),
            id.clone(),
            read_half,
            close_rx,
            self.read_buffer_size,
        ));

        info!("TCP server '{}' accepted {} as {}", server, remote, id);
        self.events.publish(SocketEvent::Connection {
            server: server.to_string(),
            id,
            remote,
        });
    }

    /// Mark a server as no longer accepting after a listener failure
    async fn server_failed(&self, name: &str, error: String) {
        let mut state = self.state.lock().await;
        if let Some(instance) = state.servers.get_mut(name) {
            instance.running = false;
        }
        self.events.publish(SocketEvent::ServerError {
            server: name.to_string(),
            error,
        });
    }

    /// Relay inbound bytes as `data` events until EOF, error, or force-close
    async fn connection_read_loop(
        manager: TcpManager,
        server: String,
        id: ConnectionId,
        mut read_half: OwnedReadHalf,
        mut close_rx: watch::Receiver<bool>,
        buffer_size: usize,
    ) {
        let mut buf = BytesMut::with_capacity(buffer_size);
        loop {
            buf.reserve(buffer_size);
            tokio::select! {
                result = read_half.read_buf(&mut buf) => match result {
                    Ok(0) => {
                        manager.connection_closed(&server, &id, None).await;
                        return;
                    }
                    Ok(n) => {
                        debug!("connection {} received {} bytes", id, n);
                        manager.metrics.bytes_received(n as u64);
                        manager.events.publish(SocketEvent::Data {
                            server: server.clone(),
                            id: id.clone(),
                            payload: buf.split().freeze(),
                        });
                    }
                    Err(e) => {
                        manager.connection_closed(&server, &id, Some(e.to_string())).await;
                        return;
                    }
                },
                // force-close: whoever signalled already unregistered the id
                // and emitted the terminal event
                _ = close_rx.changed() => {
                    return;
                }
            }
        }
    }
}
