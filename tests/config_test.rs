//! Integration tests for configuration loading, validation, and overrides

use std::time::Duration;

use sockhub::tcp::{TcpClientConfig, TcpServerConfig};
use sockhub::udp::UdpClientConfig;
use sockhub::{Config, ConfigManager};

#[test]
fn test_defaults_validate() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    assert_eq!(config.general.max_connections, 1000);
    assert_eq!(config.general.connect_timeout, Duration::from_secs(30));
    assert_eq!(config.general.read_buffer_size, 8192);
    assert!(!config.heartbeat.enabled);
    assert_eq!(config.heartbeat.interval, Duration::from_secs(30));
    assert!(config.tcp.servers.is_empty());
    assert!(config.tcp.clients.is_empty());
    assert!(config.udp.servers.is_empty());
    assert!(config.udp.clients.is_empty());
}

#[test]
fn test_load_from_file_parses_instances_and_durations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[general]
connect_timeout = "10s"
max_connections = 500
read_buffer_size = 4096
event_buffer_size = 64
shutdown_timeout = "5s"
log_level = "debug"

[heartbeat]
enabled = true
interval = "15s"

[tcp.servers.intake]
host = "127.0.0.1"
port = 9100
backlog = 128
keep_alive = true
auto_start = true

[tcp.clients.uplink]
host = "upstream.internal"
port = 9200
connect_timeout = "5s"
reconnect_interval = "2s"
max_reconnect_attempts = 4
auto_connect = true

[udp.servers.telemetry]
host = "127.0.0.1"
port = 9300

[udp.clients.beacon]
host = "127.0.0.1"
port = 9400
auto_connect = true
"#,
    )
    .unwrap();

    let config = ConfigManager::load_from_file(&path).unwrap();

    assert_eq!(config.general.connect_timeout, Duration::from_secs(10));
    assert_eq!(config.general.max_connections, 500);
    assert_eq!(config.general.read_buffer_size, 4096);
    assert_eq!(config.general.event_buffer_size, 64);
    assert_eq!(config.general.shutdown_timeout, Duration::from_secs(5));
    assert_eq!(config.general.log_level, "debug");

    assert!(config.heartbeat.enabled);
    assert_eq!(config.heartbeat.interval, Duration::from_secs(15));

    let intake = &config.tcp.servers["intake"];
    assert_eq!(intake.host, "127.0.0.1");
    assert_eq!(intake.port, 9100);
    assert_eq!(intake.backlog, 128);
    assert!(intake.keep_alive);
    assert!(intake.auto_start);

    let uplink = &config.tcp.clients["uplink"];
    assert_eq!(uplink.host, "upstream.internal");
    assert_eq!(uplink.port, 9200);
    assert_eq!(uplink.connect_timeout, Some(Duration::from_secs(5)));
    assert_eq!(uplink.reconnect_interval, Some(Duration::from_secs(2)));
    assert_eq!(uplink.max_reconnect_attempts, Some(4));
    assert!(uplink.auto_connect);

    assert_eq!(config.udp.servers["telemetry"].port, 9300);
    assert_eq!(config.udp.clients["beacon"].port, 9400);
    assert!(config.udp.clients["beacon"].auto_connect);
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigManager::load_from_file(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.general.max_connections, 1000);
    assert!(config.tcp.servers.is_empty());
}

#[test]
fn test_unparseable_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "this is not toml [").unwrap();

    let err = ConfigManager::load_from_file(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("parse"));
}

#[test]
fn test_validation_rejects_bad_instances() {
    // a server must name a real port
    let mut config = Config::default();
    config
        .tcp
        .servers
        .insert("bad".to_string(), TcpServerConfig::default());
    let err = config.validate().unwrap_err();
    assert!(format!("{:#}", err).contains("non-zero port"));

    // server hosts must be IP addresses
    let mut config = Config::default();
    config.tcp.servers.insert(
        "bad".to_string(),
        TcpServerConfig {
            host: "intake.internal".to_string(),
            port: 9000,
            ..Default::default()
        },
    );
    let err = config.validate().unwrap_err();
    assert!(format!("{:#}", err).contains("IP address"));

    // reconnect settings must come as a pair
    let mut config = Config::default();
    config.tcp.clients.insert(
        "bad".to_string(),
        TcpClientConfig {
            port: 9000,
            reconnect_interval: Some(Duration::from_secs(1)),
            ..Default::default()
        },
    );
    let err = config.validate().unwrap_err();
    assert!(format!("{:#}", err).contains("together"));

    // a UDP client needs a destination port
    let mut config = Config::default();
    config
        .udp
        .clients
        .insert("bad".to_string(), UdpClientConfig::default());
    assert!(config.validate().is_err());

    // client hosts may be resolvable names
    let mut config = Config::default();
    config.tcp.clients.insert(
        "ok".to_string(),
        TcpClientConfig {
            host: "upstream.internal".to_string(),
            port: 9000,
            ..Default::default()
        },
    );
    assert!(config.validate().is_ok());
}

#[test]
fn test_validation_rejects_bad_general_settings() {
    let mut config = Config::default();
    config.general.max_connections = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.general.log_level = "chatty".to_string();
    let err = config.validate().unwrap_err();
    assert!(format!("{:#}", err).contains("log_level"));

    let mut config = Config::default();
    config.general.event_buffer_size = 8;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.heartbeat.interval = Duration::ZERO;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.general.shutdown_timeout = Duration::ZERO;
    assert!(config.validate().is_err());
}

#[test]
fn test_load_from_env_overrides_defaults() {
    std::env::set_var("SOCKHUB_MAX_CONNECTIONS", "not-a-number");
    assert!(ConfigManager::load_from_env().is_err());

    std::env::set_var("SOCKHUB_MAX_CONNECTIONS", "250");
    std::env::set_var("SOCKHUB_CONNECT_TIMEOUT", "5s");
    std::env::set_var("SOCKHUB_HEARTBEAT_ENABLED", "true");

    let config = ConfigManager::load_from_env().unwrap();
    assert_eq!(config.general.max_connections, 250);
    assert_eq!(config.general.connect_timeout, Duration::from_secs(5));
    assert!(config.heartbeat.enabled);

    std::env::remove_var("SOCKHUB_MAX_CONNECTIONS");
    std::env::remove_var("SOCKHUB_CONNECT_TIMEOUT");
    std::env::remove_var("SOCKHUB_HEARTBEAT_ENABLED");
}

#[test]
fn test_merge_with_cli_args_overrides() {
    let mut config = Config::default();
    config.heartbeat.enabled = true;

    config.merge_with_cli_args(Some(10), Some(5), true, true, false);

    assert_eq!(config.general.max_connections, 10);
    assert_eq!(config.general.connect_timeout, Duration::from_secs(5));
    assert!(!config.heartbeat.enabled);
    assert!(config.general.auto_start_all);
    assert!(!config.general.auto_connect_all);
}
