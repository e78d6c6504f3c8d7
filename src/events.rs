//! Lifecycle Events
//!
//! All managers publish through one broadcast bus so collaborators can observe
//! connection lifecycles without polling.

use bytes::Bytes;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::registry::ConnectionId;

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Lifecycle event emitted by the socket managers
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// A server socket is bound and accepting
    Listening { server: String, addr: SocketAddr },
    /// A server accepted an inbound connection; the id is already registered
    Connection {
        server: String,
        id: ConnectionId,
        remote: SocketAddr,
    },
    /// Bytes arrived on a server connection
    Data {
        server: String,
        id: ConnectionId,
        payload: Bytes,
    },
    /// A server connection terminated cleanly or was force-closed
    ConnectionEnd { server: String, id: ConnectionId },
    /// A server connection died with an error
    ConnectionError {
        server: String,
        id: ConnectionId,
        error: String,
    },
    /// The listener itself failed and stopped accepting
    ServerError { server: String, error: String },
    /// A client completed its connect
    ClientConnect { client: String },
    /// Bytes arrived on a client socket
    ClientData { client: String, payload: Bytes },
    /// The remote end closed a client socket
    ClientEnd { client: String },
    /// A client socket errored
    ClientError { client: String, error: String },
    /// A client socket is fully closed
    ClientClose { client: String, had_error: bool },
    /// A UDP server socket is bound
    UdpListening { name: String, addr: SocketAddr },
    /// A datagram arrived on a UDP server socket
    UdpDatagram {
        name: String,
        payload: Bytes,
        from: SocketAddr,
    },
    /// A datagram arrived on a UDP client socket
    UdpClientDatagram {
        name: String,
        payload: Bytes,
        from: SocketAddr,
    },
    /// A UDP server socket errored
    UdpServerError { name: String, error: String },
    /// A UDP client socket errored
    UdpClientError { name: String, error: String },
}

impl SocketEvent {
    /// Short label for logging and assertions
    pub fn kind(&self) -> &'static str {
        match self {
            SocketEvent::Listening { .. } => "listening",
            SocketEvent::Connection { .. } => "connection",
            SocketEvent::Data { .. } => "data",
            SocketEvent::ConnectionEnd { .. } => "connection_end",
            SocketEvent::ConnectionError { .. } => "connection_error",
            SocketEvent::ServerError { .. } => "server_error",
            SocketEvent::ClientConnect { .. } => "client_connect",
            SocketEvent::ClientData { .. } => "client_data",
            SocketEvent::ClientEnd { .. } => "client_end",
            SocketEvent::ClientError { .. } => "client_error",
            SocketEvent::ClientClose { .. } => "client_close",
            SocketEvent::UdpListening { .. } => "udp_listening",
            SocketEvent::UdpDatagram { .. } => "udp_datagram",
            SocketEvent::UdpClientDatagram { .. } => "udp_client_datagram",
            SocketEvent::UdpServerError { .. } => "udp_server_error",
            SocketEvent::UdpClientError { .. } => "udp_client_error",
        }
    }
}

/// Broadcast fan-out for socket events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SocketEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity; slow subscribers lag and
    /// lose the oldest events rather than blocking the managers.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream for `StreamExt` style consumers
    pub fn stream(&self) -> BroadcastStream<SocketEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event; events are fire-and-forget, with no subscribers the
    /// event is dropped.
    pub(crate) fn publish(&self, event: SocketEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
