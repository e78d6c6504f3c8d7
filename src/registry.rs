//! Connection Registry
//!
//! Canonical bookkeeping of accepted connections. The registry itself does no
//! I/O; the TCP manager mutates it under its state lock.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{watch, Mutex};

/// Unique identifier of one accepted connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Issues connection ids that are unique for the process lifetime: a monotonic
/// sequence number paired with the wall-clock millisecond of issue.
#[derive(Debug)]
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        ConnectionId(format!("conn_{}_{}", seq, millis))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// One accepted inbound socket tracked by the registry
pub struct Connection {
    pub id: ConnectionId,
    pub server: String,
    pub remote_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub opened_at: Instant,
    writer: Mutex<OwnedWriteHalf>,
    close_tx: watch::Sender<bool>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        server: String,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
        writer: OwnedWriteHalf,
        close_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            id,
            server,
            remote_addr,
            local_addr,
            opened_at: Instant::now(),
            writer: Mutex::new(writer),
            close_tx,
        }
    }

    /// Write the full payload to the peer
    pub(crate) async fn write(&self, payload: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(payload).await
    }

    /// Tell the read loop to stop; the socket closes once both halves drop
    pub(crate) fn signal_close(&self) {
        let _ = self.close_tx.send(true);
    }

    /// Snapshot of the connection for queries
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            server: self.server.clone(),
            remote_addr: self.remote_addr,
            local_addr: self.local_addr,
            age: self.opened_at.elapsed(),
        }
    }
}

/// Snapshot of a connection's addresses for queries
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub server: String,
    pub remote_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub age: Duration,
}

/// Id-to-connection map; pure bookkeeping, no error conditions of its own
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connection: Arc<Connection>) {
        self.connections.insert(connection.id.clone(), connection);
    }

    /// Remove a connection; `None` when the id was never registered or is
    /// already gone, which callers treat as "someone else closed it first".
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.remove(id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).cloned()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn make_connection(id: ConnectionId) -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = TcpStream::connect(addr).await.unwrap();
        let (stream, remote_addr) = listener.accept().await.unwrap();
        let local_addr = stream.local_addr().unwrap();
        let (_read_half, write_half) = stream.into_split();
        let (close_tx, _close_rx) = watch::channel(false);
        let connection = Arc::new(Connection::new(
            id,
            "s1".to_string(),
            remote_addr,
            local_addr,
            write_half,
            close_tx,
        ));
        (connection, peer)
    }

    #[test]
    fn test_ids_are_unique_and_sequenced() {
        let generator = IdGenerator::new();
        let first = generator.next_id();
        let second = generator.next_id();
        assert_ne!(first, second);
        assert!(first.as_str().starts_with("conn_1_"));
        assert!(second.as_str().starts_with("conn_2_"));
    }

    #[tokio::test]
    async fn test_register_get_unregister() {
        let generator = IdGenerator::new();
        let id = generator.next_id();
        let (connection, _peer) = make_connection(id.clone()).await;

        let mut registry = ConnectionRegistry::new();
        registry.register(connection);

        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids(), vec![id.clone()]);

        let removed = registry.unregister(&id);
        assert!(removed.is_some());
        assert!(registry.is_empty());
        assert!(!registry.ids().contains(&id));
    }

    #[tokio::test]
    async fn test_unregister_absent_is_none() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.unregister(&ConnectionId::from("conn_9_0")).is_none());
        assert!(registry.get(&ConnectionId::from("conn_9_0")).is_none());
    }

    #[tokio::test]
    async fn test_connection_info_snapshot() {
        let id = ConnectionId::from("conn_1_123");
        let (connection, _peer) = make_connection(id.clone()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let info = connection.info();
        assert_eq!(info.id, id);
        assert_eq!(info.server, "s1");
        assert_eq!(info.remote_addr, connection.remote_addr);
        // age counts from the accept, not from the snapshot
        assert!(info.age >= Duration::from_millis(20));
    }
}
