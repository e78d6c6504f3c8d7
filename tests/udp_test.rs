//! Integration tests for UDP servers, clients, and datagram exchange

use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};

use sockhub::udp::{UdpClientConfig, UdpServerConfig, UdpTarget};
use sockhub::{Error, EventBus, Metrics, SocketEvent, UdpManager};

fn manager() -> UdpManager {
    UdpManager::new(EventBus::new(64), Arc::new(Metrics::new()))
}

fn loopback_server() -> UdpServerConfig {
    UdpServerConfig {
        host: "127.0.0.1".to_string(),
        ..Default::default()
    }
}

async fn next_event(rx: &mut broadcast::Receiver<SocketEvent>) -> SocketEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event bus closed")
}

#[tokio::test]
async fn test_send_without_connect_to_explicit_target() {
    let manager = manager();
    let mut rx = manager.events().subscribe();

    manager
        .create_server("telemetry", loopback_server())
        .await
        .unwrap();
    let addr = match next_event(&mut rx).await {
        SocketEvent::UdpListening { name, addr } => {
            assert_eq!(name, "telemetry");
            addr
        }
        other => panic!("expected udp_listening, got {:?}", other),
    };
    assert_eq!(manager.server_addr("telemetry").await, Some(addr));

    manager
        .create_client("probe", UdpClientConfig::default())
        .await
        .unwrap();
    let local = manager.client_addr("probe").await.unwrap();

    // no connect step: the datagram goes straight to the named target
    manager
        .send_message(
            "probe",
            b"m1",
            Some(UdpTarget::new("127.0.0.1", addr.port())),
        )
        .await
        .unwrap();

    match next_event(&mut rx).await {
        SocketEvent::UdpDatagram {
            name,
            payload,
            from,
        } => {
            assert_eq!(name, "telemetry");
            assert_eq!(payload.as_ref(), b"m1");
            assert_eq!(from.port(), local.port());
        }
        other => panic!("expected udp_datagram, got {:?}", other),
    }
}

#[tokio::test]
async fn test_send_falls_back_to_the_configured_destination() {
    let manager = manager();
    let mut rx = manager.events().subscribe();

    manager
        .create_server("telemetry", loopback_server())
        .await
        .unwrap();
    let addr = match next_event(&mut rx).await {
        SocketEvent::UdpListening { addr, .. } => addr,
        other => panic!("expected udp_listening, got {:?}", other),
    };

    let config = UdpClientConfig {
        host: "127.0.0.1".to_string(),
        port: addr.port(),
        ..Default::default()
    };
    manager.create_client("beacon", config).await.unwrap();

    manager
        .send_message("beacon", b"default-dest", None)
        .await
        .unwrap();

    match next_event(&mut rx).await {
        SocketEvent::UdpDatagram { payload, .. } => {
            assert_eq!(payload.as_ref(), b"default-dest");
        }
        other => panic!("expected udp_datagram, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_replies_to_the_datagram_source() {
    let manager = manager();
    let mut rx = manager.events().subscribe();

    manager
        .create_server("telemetry", loopback_server())
        .await
        .unwrap();
    let addr = match next_event(&mut rx).await {
        SocketEvent::UdpListening { addr, .. } => addr,
        other => panic!("expected udp_listening, got {:?}", other),
    };

    manager
        .create_client("probe", UdpClientConfig::default())
        .await
        .unwrap();
    manager
        .send_message(
            "probe",
            b"hello",
            Some(UdpTarget::new("127.0.0.1", addr.port())),
        )
        .await
        .unwrap();

    let from = match next_event(&mut rx).await {
        SocketEvent::UdpDatagram { from, .. } => from,
        other => panic!("expected udp_datagram, got {:?}", other),
    };

    manager
        .send_from_server(
            "telemetry",
            b"ack",
            UdpTarget::new(from.ip().to_string(), from.port()),
        )
        .await
        .unwrap();

    match next_event(&mut rx).await {
        SocketEvent::UdpClientDatagram {
            name,
            payload,
            from: reply_src,
        } => {
            assert_eq!(name, "probe");
            assert_eq!(payload.as_ref(), b"ack");
            assert_eq!(reply_src.port(), addr.port());
        }
        other => panic!("expected udp_client_datagram, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_names_are_rejected() {
    let manager = manager();

    assert!(matches!(
        manager
            .send_message("ghost", b"x", Some(UdpTarget::new("127.0.0.1", 9)))
            .await,
        Err(Error::ClientNotFound(_))
    ));
    assert!(matches!(
        manager
            .send_from_server("ghost", b"x", UdpTarget::new("127.0.0.1", 9))
            .await,
        Err(Error::ServerNotFound(_))
    ));
    assert!(matches!(
        manager.close_server("ghost").await,
        Err(Error::ServerNotFound(_))
    ));
    assert!(matches!(
        manager.close_client("ghost").await,
        Err(Error::ClientNotFound(_))
    ));
}

#[tokio::test]
async fn test_duplicate_names_are_rejected() {
    let manager = manager();

    manager
        .create_server("telemetry", loopback_server())
        .await
        .unwrap();
    assert!(matches!(
        manager.create_server("telemetry", loopback_server()).await,
        Err(Error::ServerAlreadyExists(_))
    ));

    manager
        .create_client("probe", UdpClientConfig::default())
        .await
        .unwrap();
    assert!(matches!(
        manager
            .create_client("probe", UdpClientConfig::default())
            .await,
        Err(Error::ClientAlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_bind_failure_keeps_no_instance() {
    let manager = manager();
    manager
        .create_server("first", loopback_server())
        .await
        .unwrap();
    let port = manager.server_addr("first").await.unwrap().port();

    let err = manager
        .create_server(
            "second",
            UdpServerConfig {
                host: "127.0.0.1".to_string(),
                port,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Bind { .. }));
    assert!(!manager.has_server("second").await);
}

#[tokio::test]
async fn test_closed_server_stops_receiving() {
    let manager = manager();
    let mut rx = manager.events().subscribe();

    manager
        .create_server("telemetry", loopback_server())
        .await
        .unwrap();
    let addr = match next_event(&mut rx).await {
        SocketEvent::UdpListening { addr, .. } => addr,
        other => panic!("expected udp_listening, got {:?}", other),
    };

    manager.close_server("telemetry").await.unwrap();
    assert!(!manager.has_server("telemetry").await);

    // a datagram fired at the released address produces no event
    let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let _ = raw.send_to(b"late", addr).await;

    assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
}
