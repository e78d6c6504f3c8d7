//! TCP Manager Core
//!
//! Owns the server map, the client map, and the connection registry behind a
//! single state lock. Mutations and their lifecycle events happen under the
//! lock, so subscribers observe registry changes and events in a consistent
//! order: a connection is registered before its `connection` event and
//! unregistered before its `connectionEnd`/`connectionError` event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant};
use tracing::{info, warn};

use crate::config::GeneralConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, SocketEvent};
use crate::heartbeat::{HeartbeatScheduler, ProbeTarget, PROBE};
use crate::metrics::Metrics;
use crate::registry::{ConnectionId, ConnectionInfo, ConnectionRegistry, IdGenerator};

use super::types::{ClientInfo, ClientInstance, ClientState, ServerInfo, ServerInstance};

/// Everything guarded by the manager's state lock
#[derive(Default)]
pub(super) struct TcpState {
    pub(super) servers: HashMap<String, ServerInstance>,
    pub(super) clients: HashMap<String, ClientInstance>,
    pub(super) registry: ConnectionRegistry,
}

/// Manages named TCP servers, named TCP clients, and their connections
#[derive(Clone)]
pub struct TcpManager {
    pub(super) state: Arc<Mutex<TcpState>>,
    pub(super) events: EventBus,
    pub(super) metrics: Arc<Metrics>,
    pub(super) heartbeat: Arc<HeartbeatScheduler>,
    pub(super) ids: Arc<IdGenerator>,
    pub(super) connect_timeout: Duration,
    pub(super) max_connections: usize,
    pub(super) read_buffer_size: usize,
}

impl TcpManager {
    /// Create a new TcpManager
    pub fn new(config: &GeneralConfig, events: EventBus, metrics: Arc<Metrics>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TcpState::default())),
            events,
            metrics,
            heartbeat: Arc::new(HeartbeatScheduler::new()),
            ids: Arc::new(IdGenerator::new()),
            connect_timeout: config.connect_timeout,
            max_connections: config.max_connections,
            read_buffer_size: config.read_buffer_size,
        }
    }

    /// The event bus this manager publishes to
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Names of all servers, running or not
    pub async fn server_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.servers.keys().cloned().collect()
    }

    /// Names of all clients regardless of state
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

    /// Ids of every currently open connection
    pub async fn connection_ids(&self) -> Vec<ConnectionId> {
        let state = self.state.lock().await;
        state.registry.ids()
    }

    /// Number of currently open connections
    pub async fn connection_count(&self) -> usize {
        let state = self.state.lock().await;
        state.registry.len()
    }

    /// Snapshot of one server, or `None` for an unknown name
    pub async fn server_info(&self, name: &str) -> Option<ServerInfo> {
        let state = self.state.lock().await;
        state.servers.get(name).map(|instance| ServerInfo {
            name: name.to_string(),
            local_addr: instance.local_addr,
            running: instance.running,
            connections: instance.connection_ids.len(),
        })
    }

    /// Snapshot of one client, or `None` for an unknown name
    pub async fn client_info(&self, name: &str) -> Option<ClientInfo> {
        let state = self.state.lock().await;
        state.clients.get(name).map(|instance| ClientInfo {
            name: name.to_string(),
            state: instance.state,
            remote_addr: instance.remote_addr,
            reconnect_attempts: instance.reconnect_attempts,
        })
    }

    /// Snapshot of one connection, or `None` for an unknown id
    pub async fn connection_info(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        let state = self.state.lock().await;
        state.registry.get(id).map(|conn| conn.info())
    }

    /// Write `payload` to one registered connection
    pub async fn send_to_connection(&self, id: &ConnectionId, payload: &[u8]) -> Result<()> {
        let conn = {
            let state = self.state.lock().await;
            state
                .registry
                .get(id)
                .ok_or_else(|| Error::ConnectionNotFound(id.to_string()))?
        };

        match conn.write(payload).await {
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

    /// Force-close one connection; closing an id that is already gone is a
    /// no-op.
    pub async fn close_connection(&self, id: &ConnectionId) {
        let mut state = self.state.lock().await;
        let Some(conn) = state.registry.unregister(id) else {
            return;
        };
        if let Some(instance) = state.servers.get_mut(conn.server.as_str()) {
            instance.connection_ids.remove(id);
        }
        self.metrics.connection_closed(conn.opened_at.elapsed());
        info!("connection {} force-closed", id);
        self.events.publish(SocketEvent::ConnectionEnd {
            server: conn.server.clone(),
            id: id.clone(),
        });
        conn.signal_close();
    }

    /// Tear down one connection after its socket reported end or error.
    /// Resolves the race with force-close paths: whichever caller unregisters
    /// the id first emits the terminal event.
    pub(super) async fn connection_closed(
        &self,
        server: &str,
        id: &ConnectionId,
        error: Option<String>,
    ) {
        let mut state = self.state.lock().await;
        let Some(conn) = state.registry.unregister(id) else {
            return;
        };
        if let Some(instance) = state.servers.get_mut(server) {
            instance.connection_ids.remove(id);
        }
        self.metrics.connection_closed(conn.opened_at.elapsed());
        match error {
            Some(e) => {
                warn!("connection {} on server '{}' errored: {}", id, server, e);
                self.events.publish(SocketEvent::ConnectionError {
                    server: server.to_string(),
                    id: id.clone(),
                    error: e,
                });
            }
            None => {
                info!("connection {} on server '{}' ended", id, server);
                self.events.publish(SocketEvent::ConnectionEnd {
                    server: server.to_string(),
                    id: id.clone(),
                });
            }
        }
        conn.signal_close();
    }

    /// Close every server and client this manager owns
    pub async fn close_all(&self) {
        for name in self.server_names().await {
            if let Err(e) = self.close_server(&name).await {
                warn!("failed to close TCP server '{}': {}", name, e);
            }
        }
        for name in self.client_names().await {
            if let Err(e) = self.close_client(&name).await {
                warn!("failed to close TCP client '{}': {}", name, e);
            }
        }
    }

    /// Start one probe timer per instance known right now. Instances created
    /// afterwards are not probed until heartbeat is restarted.
    pub async fn start_heartbeat(&self, interval: Duration) -> usize {
        let (server_names, client_names) = {
            let state = self.state.lock().await;
            (
                state.servers.keys().cloned().collect::<Vec<_>>(),
                state.clients.keys().cloned().collect::<Vec<_>>(),
            )
        };

        let mut started = 0;
        for name in server_names {
            let manager = self.clone();
            let server = name.clone();
            let handle = tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + interval, interval);
                loop {
                    ticker.tick().await;
                    manager.probe_server(&server).await;
                }
            });
            self.heartbeat.insert(ProbeTarget::Server(name), handle).await;
            started += 1;
        }

        for name in client_names {
            let manager = self.clone();
            let client = name.clone();
            let handle = tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + interval, interval);
                loop {
                    ticker.tick().await;
                    manager.probe_client(&client).await;
                }
            });
            self.heartbeat.insert(ProbeTarget::Client(name), handle).await;
            started += 1;
        }

        info!(
            "heartbeat started for {} instances at {:?} intervals",
            started, interval
        );
        started
    }

    /// Cancel every probe timer; returns how many were cleared
    pub async fn stop_heartbeat(&self) -> usize {
        let cleared = self.heartbeat.stop_all().await;
        if cleared > 0 {
            info!("heartbeat stopped, {} timers cleared", cleared);
        }
        cleared
    }

    /// Write the probe to every open connection of one server
    async fn probe_server(&self, name: &str) {
        let connections = {
            let state = self.state.lock().await;
            let Some(instance) = state.servers.get(name) else {
                return;
            };
            instance
                .connection_ids
                .iter()
                .filter_map(|id| state.registry.get(id))
                .collect::<Vec<_>>()
        };

        for conn in connections {
            match conn.write(PROBE).await {
                Ok(()) => self.metrics.heartbeat_sent(),
                Err(e) => {
                    warn!("heartbeat to connection {} failed: {}", conn.id, e);
                    self.metrics.send_failed();
                    self.connection_closed(name, &conn.id, Some(format!("heartbeat write failed: {}", e)))
                        .await;
                }
            }
        }
    }

    /// Write the probe to one connected client
    async fn probe_client(&self, name: &str) {
        let (writer, generation) = {
            let state = self.state.lock().await;
            let Some(instance) = state.clients.get(name) else {
                return;
            };
            if instance.state != ClientState::Connected {
                return;
            }
            let Some(writer) = instance.writer.clone() else {
                return;
            };
            (writer, instance.generation)
        };

        let result = {
            let mut guard = writer.lock().await;
            guard.write_all(PROBE).await
        };

        match result {
            Ok(()) => self.metrics.heartbeat_sent(),
            Err(e) => {
                warn!("heartbeat to client '{}' failed: {}", name, e);
                self.metrics.send_failed();
                self.client_disconnected(name, generation, Some(format!("heartbeat write failed: {}", e)))
                    .await;
            }
        }
    }
}
