//! TCP Client Operations
//!
//! Outbound connection lifecycle: a created client starts `Disconnected` and
//! performs no I/O until `connect_client` drives it through `Connecting` to
//! `Connected`. An unrequested close or error drops it back to
//! `Disconnected`, and when both `reconnect_interval` and
//! `max_reconnect_attempts` are configured, a single reconnect timer is
//! scheduled until either a connect succeeds (resetting the attempt counter)
//! or the ceiling is reached.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::SocketEvent;
use crate::heartbeat::ProbeTarget;

use super::manager::{TcpManager, TcpState};
use super::types::{ClientInstance, ClientState, TcpClientConfig};

/// Best-effort SO_KEEPALIVE; a failure is logged, not fatal
fn apply_keep_alive(stream: &TcpStream, name: &str) {
    if let Err(e) = SockRef::from(stream).set_keepalive(true) {
        warn!("failed to enable keep-alive for client '{}': {}", name, e);
    }
}

impl TcpManager {
    /// Create a named client in the `Disconnected` state; no network I/O
    /// happens until `connect_client`.
    pub async fn create_client(&self, name: &str, config: TcpClientConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.clients.contains_key(name) {
            return Err(Error::ClientAlreadyExists(name.to_string()));
        }

        info!(
            "TCP client '{}' created for {}:{}",
            name, config.host, config.port
        );
        state
            .clients
            .insert(name.to_string(), ClientInstance::new(config));
        Ok(())
    }

    /// Connect a client. Only legal from `Disconnected`; a success resets the
    /// reconnect attempt counter, a failure returns the client to
    /// `Disconnected` and feeds the reconnect policy.
    pub async fn connect_client(&self, name: &str) -> Result<()> {
        let (addr, connect_timeout, keep_alive) = {
            let mut state = self.state.lock().await;
            let instance = state
                .clients
                .get_mut(name)
                .ok_or_else(|| Error::ClientNotFound(name.to_string()))?;
            if instance.state != ClientState::Disconnected {
                return Err(Error::ClientAlreadyConnected(name.to_string()));
            }
            instance.cancel_reconnect_timer();
            instance.state = ClientState::Connecting;
            (
                format!("{}:{}", instance.config.host, instance.config.port),
                instance.config.connect_timeout.unwrap_or(self.connect_timeout),
                instance.config.keep_alive,
            )
        };

        debug!("TCP client '{}' connecting to {}", name, addr);
        match Self::dial(&addr, connect_timeout).await {
            Ok(stream) => {
                if keep_alive {
                    apply_keep_alive(&stream, name);
                }
                self.client_connected(name, stream).await
            }
            Err(e) => {
                self.connect_failed(name, &e).await;
                Err(e)
            }
        }
    }

    /// Cancel any pending reconnect, drop the socket, and remove the client.
    /// Terminal: no automatic reconnection survives this call.
    pub async fn close_client(&self, name: &str) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            let Some(mut instance) = state.clients.remove(name) else {
                return Err(Error::ClientNotFound(name.to_string()));
            };
            instance.cancel_reconnect_timer();
            instance.abort_reader();
            instance.writer = None;

            self.events.publish(SocketEvent::ClientClose {
                client: name.to_string(),
                had_error: false,
            });
        }

        self.heartbeat
            .cancel(&ProbeTarget::Client(name.to_string()))
            .await;

        info!("TCP client '{}' closed", name);
        Ok(())
    }

    /// Write `payload` on a connected client socket
    pub async fn send_to_client(&self, name: &str, payload: &[u8]) -> Result<()> {
        let writer = {
            let state = self.state.lock().await;
            let instance = state
                .clients
                .get(name)
                .ok_or_else(|| Error::ClientNotFound(name.to_string()))?;
            if instance.state != ClientState::Connected {
                return Err(Error::ClientNotConnected(name.to_string()));
            }
            instance
                .writer
                .clone()
                .ok_or_else(|| Error::ClientNotConnected(name.to_string()))?
        };

        let mut guard = writer.lock().await;
        match guard.write_all(payload).await {
            Ok(()) => {
                self.metrics.bytes_sent(payload.len() as u64);
                Ok(())
            }
            Err(e) => {
                self.metrics.send_failed();
                Err(Error::Write(e))
            }
        }
    }

    /// Resolve and dial, bounding both steps by the connect timeout. Multiple
    /// resolved addresses are tried in order; the last failure wins.
    async fn dial(addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
        let addrs = match timeout(connect_timeout, lookup_host(addr)).await {
            Ok(Ok(addrs)) => addrs.collect::<Vec<_>>(),
            Ok(Err(e)) => {
                return Err(Error::Resolve {
                    addr: addr.to_string(),
                    source: e,
                })
            }
            Err(_) => {
                return Err(Error::ConnectTimeout {
                    addr: addr.to_string(),
                    timeout: connect_timeout,
                })
            }
        };

        if addrs.is_empty() {
            return Err(Error::Resolve {
                addr: addr.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
            });
        }

        let mut last_err = None;
        for candidate in addrs {
            match timeout(connect_timeout, TcpStream::connect(candidate)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => {
                    debug!("connect to {} failed: {}", candidate, e);
                    last_err = Some(Error::Connect {
                        addr: candidate.to_string(),
                        source: e,
                    });
                }
                Err(_) => {
                    last_err = Some(Error::ConnectTimeout {
                        addr: candidate.to_string(),
                        timeout: connect_timeout,
                    });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Resolve {
            addr: addr.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
        }))
    }

    /// Attach a freshly connected socket to its instance and start reading
    async fn client_connected(&self, name: &str, stream: TcpStream) -> Result<()> {
        let remote = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();

        let mut state = self.state.lock().await;
        let Some(instance) = state.clients.get_mut(name) else {
            // closed while the dial was in flight; the socket drops here
            return Err(Error::ClientNotFound(name.to_string()));
        };
        if instance.state != ClientState::Connecting {
            // the instance was recreated mid-dial; this socket is stale
            return Err(Error::ClientNotConnected(name.to_string()));
        }

        instance.generation += 1;
        let generation = instance.generation;
        instance.state = ClientState::Connected;
        instance.reconnect_attempts = 0;
        instance.writer = Some(Arc::new(Mutex::new(write_half)));
        instance.remote_addr = remote;

        let reader = tokio::spawn(Self::client_read_loop(
            self.clone(),
            name.to_string(),
            generation,
            read_half,
            self.read_buffer_size,
        ));
        if let Some(old) = instance.reader_task.replace(reader) {
            old.abort();
        }

        self.metrics.client_connected();
        match remote {
            Some(addr) => info!("TCP client '{}' connected to {}", name, addr),
            None => info!("TCP client '{}' connected", name),
        }
        self.events.publish(SocketEvent::ClientConnect {
            client: name.to_string(),
        });
        Ok(())
    }

    /// Return a client to `Disconnected` after a failed dial and evaluate the
    /// reconnect policy
    async fn connect_failed(&self, name: &str, error: &Error) {
        let mut state = self.state.lock().await;
        let Some(instance) = state.clients.get_mut(name) else {
            return;
        };
        instance.state = ClientState::Disconnected;
        instance.writer = None;
        instance.remote_addr = None;

        warn!("TCP client '{}' connect failed: {}", name, error);
        self.events.publish(SocketEvent::ClientError {
            client: name.to_string(),
            error: error.to_string(),
        });
        self.schedule_reconnect_locked(&mut state, name);
    }

    /// Tear down a client whose socket reported EOF or an error. `generation`
    /// ties the callback to the socket that produced it, so a stale read loop
    /// from before a reconnect cannot touch the current socket.
    pub(super) async fn client_disconnected(
        &self,
        name: &str,
        generation: u64,
        error: Option<String>,
    ) {
        let mut state = self.state.lock().await;
        let Some(instance) = state.clients.get_mut(name) else {
            return;
        };
        if instance.generation != generation {
            return;
        }
        if instance.state != ClientState::Connected {
            return;
        }

        instance.state = ClientState::Disconnected;
        instance.writer = None;
        instance.remote_addr = None;
        instance.abort_reader();

        let had_error = error.is_some();
        match error {
            Some(e) => {
                warn!("TCP client '{}' connection error: {}", name, e);
                self.events.publish(SocketEvent::ClientError {
                    client: name.to_string(),
                    error: e,
                });
            }
            None => {
                info!("TCP client '{}' connection ended by peer", name);
                self.events.publish(SocketEvent::ClientEnd {
                    client: name.to_string(),
                });
            }
        }
        self.events.publish(SocketEvent::ClientClose {
            client: name.to_string(),
            had_error,
        });
        self.metrics.client_disconnected();

        self.schedule_reconnect_locked(&mut state, name);
    }

    /// Schedule one reconnect timer if the policy allows another attempt.
    /// Requires both `reconnect_interval` and `max_reconnect_attempts`; at
    /// most one timer is pending per client.
    fn schedule_reconnect_locked(&self, state: &mut TcpState, name: &str) {
        let Some(instance) = state.clients.get_mut(name) else {
            return;
        };
        let (Some(interval), Some(max)) = (
            instance.config.reconnect_interval,
            instance.config.max_reconnect_attempts,
        ) else {
            return;
        };
        if instance.reconnect_attempts >= max {
            warn!(
                "TCP client '{}' giving up after {} reconnect attempts",
                name, instance.reconnect_attempts
            );
            return;
        }

        instance.cancel_reconnect_timer();
        let manager = self.clone();
        let client = name.to_string();
        let handle = tokio::spawn(async move {
            sleep(interval).await;
            manager.reconnect_fire(&client).await;
        });
        instance.reconnect_timer = Some(handle);
        debug!(
            "TCP client '{}' reconnect scheduled in {:?} (attempt {} of {})",
            name,
            interval,
            instance.reconnect_attempts + 1,
            max
        );
    }

    /// Timer body: count the attempt and re-run the connect sequence
    async fn reconnect_fire(&self, name: &str) {
        let (addr, connect_timeout, keep_alive) = {
            let mut state = self.state.lock().await;
            let Some(instance) = state.clients.get_mut(name) else {
                return;
            };
            if instance.state != ClientState::Disconnected {
                // a manual connect won the race
                return;
            }
            instance.reconnect_timer = None;
            instance.reconnect_attempts += 1;
            instance.state = ClientState::Connecting;
            self.metrics.reconnect_attempted();
            info!(
                "TCP client '{}' reconnect attempt {}",
                name, instance.reconnect_attempts
            );
            (
                format!("{}:{}", instance.config.host, instance.config.port),
                instance.config.connect_timeout.unwrap_or(self.connect_timeout),
                instance.config.keep_alive,
            )
        };

        match Self::dial(&addr, connect_timeout).await {
            Ok(stream) => {
                if keep_alive {
                    apply_keep_alive(&stream, name);
                }
                if let Err(e) = self.client_connected(name, stream).await {
                    debug!("TCP client '{}' vanished during reconnect: {}", name, e);
                }
            }
            Err(e) => self.connect_failed(name, &e).await,
        }
    }

    /// Read loop for a connected client socket
    async fn client_read_loop(
        manager: TcpManager,
        name: String,
        generation: u64,
        mut read_half: OwnedReadHalf,
        buffer_size: usize,
    ) {
        let mut buf = BytesMut::with_capacity(buffer_size);
        loop {
            buf.reserve(buffer_size);
            match read_half.read_buf(&mut buf).await {
                Ok(0) => {
                    manager.client_disconnected(&name, generation, None).await;
                    return;
                }
                Ok(n) => {
                    debug!("TCP client '{}' received {} bytes", name, n);
                    manager.metrics.bytes_received(n as u64);
                    manager.events.publish(SocketEvent::ClientData {
                        client: name.clone(),
                        payload: buf.split().freeze(),
                    });
                }
                Err(e) => {
                    manager
                        .client_disconnected(&name, generation, Some(e.to_string()))
                        .await;
                    return;
                }
            }
        }
    }
}
