//! Integration tests for heartbeat keep-alive probes

use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};

use sockhub::config::GeneralConfig;
use sockhub::heartbeat::PROBE;
use sockhub::tcp::{ClientState, TcpClientConfig, TcpServerConfig};
use sockhub::{EventBus, Metrics, SocketEvent, TcpManager};

fn manager() -> TcpManager {
    TcpManager::new(
        &GeneralConfig::default(),
        EventBus::new(64),
        Arc::new(Metrics::new()),
    )
}

async fn next_event(rx: &mut broadcast::Receiver<SocketEvent>) -> SocketEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event bus closed")
}

fn spawn_acceptor(listener: TcpListener) -> mpsc::UnboundedReceiver<TcpStream> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if tx.send(stream).is_err() {
                return;
            }
        }
    });
    rx
}

#[tokio::test]
async fn test_probe_reaches_server_connections() {
    let manager = manager();
    let mut rx = manager.events().subscribe();

    manager
        .create_server(
            "intake",
            TcpServerConfig {
                host: "127.0.0.1".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let addr = match next_event(&mut rx).await {
        SocketEvent::Listening { addr, .. } => addr,
        other => panic!("expected listening, got {:?}", other),
    };

    let mut peer = TcpStream::connect(addr).await.unwrap();
    next_event(&mut rx).await;

    let started = manager.start_heartbeat(Duration::from_millis(100)).await;
    assert_eq!(started, 1);

    // the peer sees the probe payload on the next tick
    let mut buf = [0u8; 4];
    timeout(Duration::from_secs(2), peer.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..], PROBE);

    assert_eq!(manager.stop_heartbeat().await, 1);
}

#[tokio::test]
async fn test_probe_reaches_connected_clients() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut accepted = spawn_acceptor(listener);

    let manager = manager();
    manager
        .create_client(
            "uplink",
            TcpClientConfig {
                host: "127.0.0.1".to_string(),
                port: addr.port(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    manager.connect_client("uplink").await.unwrap();

    let mut peer = timeout(Duration::from_secs(2), accepted.recv())
        .await
        .unwrap()
        .unwrap();

    let started = manager.start_heartbeat(Duration::from_millis(100)).await;
    assert_eq!(started, 1);

    let mut buf = [0u8; 4];
    timeout(Duration::from_secs(2), peer.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..], PROBE);

    manager.stop_heartbeat().await;
}

#[tokio::test]
async fn test_late_instances_are_probed_only_after_a_restart() {
    let manager = manager();
    let mut rx = manager.events().subscribe();

    // nothing exists yet, so nothing gets a timer
    assert_eq!(manager.start_heartbeat(Duration::from_millis(100)).await, 0);

    manager
        .create_server(
            "late",
            TcpServerConfig {
                host: "127.0.0.1".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let addr = match next_event(&mut rx).await {
        SocketEvent::Listening { addr, .. } => addr,
        other => panic!("expected listening, got {:?}", other),
    };
    let mut peer = TcpStream::connect(addr).await.unwrap();
    next_event(&mut rx).await;

    // a server created after the start sits outside the snapshot
    let mut buf = [0u8; 4];
    assert!(timeout(Duration::from_millis(300), peer.read_exact(&mut buf))
        .await
        .is_err());

    // restarting rebuilds the snapshot and picks it up
    assert_eq!(manager.start_heartbeat(Duration::from_millis(100)).await, 1);
    timeout(Duration::from_secs(2), peer.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..], PROBE);

    assert_eq!(manager.stop_heartbeat().await, 1);
}

#[tokio::test]
async fn test_disconnected_clients_are_not_probed() {
    let manager = manager();
    manager
        .create_client("idle", TcpClientConfig::default())
        .await
        .unwrap();

    let mut rx = manager.events().subscribe();
    let started = manager.start_heartbeat(Duration::from_millis(50)).await;
    assert_eq!(started, 1);

    // several intervals pass without any probe-failure events
    assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
    assert_eq!(
        manager.client_info("idle").await.unwrap().state,
        ClientState::Disconnected
    );

    manager.stop_heartbeat().await;
}

#[tokio::test]
async fn test_stop_heartbeat_clears_timers_exactly_once() {
    let manager = manager();
    manager
        .create_server(
            "intake",
            TcpServerConfig {
                host: "127.0.0.1".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    manager
        .create_client("uplink", TcpClientConfig::default())
        .await
        .unwrap();

    assert_eq!(manager.start_heartbeat(Duration::from_secs(30)).await, 2);
    // restarting replaces the timers instead of duplicating them
    assert_eq!(manager.start_heartbeat(Duration::from_secs(60)).await, 2);

    assert_eq!(manager.stop_heartbeat().await, 2);
    assert_eq!(manager.stop_heartbeat().await, 0);
}
