//! SockHub - Multi-Instance Socket Connection Manager
//!
//! Runs any number of named TCP servers, TCP clients, and UDP endpoints from
//! a single configuration, tracks every inbound connection, keeps links alive
//! with heartbeat probes, and reconnects dropped clients automatically.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sockhub::{
    Config, ConfigManager, EventBus, Metrics, ShutdownCoordinator, SocketEvent, TcpManager,
    UdpManager,
};

/// CLI arguments for SockHub
#[derive(Parser, Debug)]
#[command(name = "sockhub")]
#[command(about = "SockHub - Multi-Instance Socket Connection Manager")]
#[command(version)]
#[command(long_about = "
SockHub - Multi-Instance Socket Connection Manager

Runs any number of named TCP servers, TCP clients, and UDP endpoints from a
single configuration file, tracks every inbound connection in a registry,
keeps links alive with heartbeat probes, and reconnects dropped clients
automatically.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  SOCKHUB_CONNECT_TIMEOUT    - Default client connect timeout (e.g., 30s, 1m)
  SOCKHUB_MAX_CONNECTIONS    - Maximum concurrent inbound connections
  SOCKHUB_READ_BUFFER_SIZE   - Read buffer size in bytes
  SOCKHUB_HEARTBEAT_ENABLED  - Enable heartbeat probes (true/false)
  SOCKHUB_HEARTBEAT_INTERVAL - Heartbeat probe interval (e.g., 30s)
  SOCKHUB_LOG_LEVEL          - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Maximum number of concurrent inbound connections
    #[arg(long, help = "Maximum number of concurrent inbound connections")]
    pub max_connections: Option<usize>,

    /// Default client connect timeout in seconds
    #[arg(long, help = "Default client connect timeout in seconds")]
    pub timeout: Option<u64>,

    /// Disable heartbeat probes
    #[arg(long, help = "Disable heartbeat probes")]
    pub no_heartbeat: bool,

    /// Start every configured server regardless of per-instance flags
    #[arg(long, help = "Start every configured server")]
    pub auto_start_all: bool,

    /// Connect every configured client regardless of per-instance flags
    #[arg(long, help = "Connect every configured client")]
    pub auto_connect_all: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing
    init_tracing(&args)?;

    info!(
        "Starting SockHub v{} - Multi-Instance Socket Connection Manager",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    // Apply CLI argument overrides (highest priority)
    config.merge_with_cli_args(
        args.max_connections,
        args.timeout,
        args.no_heartbeat,
        args.auto_start_all,
        args.auto_connect_all,
    );

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;

    // If validate-config flag is set, just validate and exit
    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  TCP servers: {}", config.tcp.servers.len());
        info!("  TCP clients: {}", config.tcp.clients.len());
        info!("  UDP servers: {}", config.udp.servers.len());
        info!("  UDP clients: {}", config.udp.clients.len());
        info!("  Max connections: {}", config.general.max_connections);
        info!("  Connect timeout: {:?}", config.general.connect_timeout);
        info!(
            "  Read buffer size: {} bytes",
            config.general.read_buffer_size
        );
        info!(
            "  Heartbeat: {}",
            if config.heartbeat.enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        return Ok(());
    }

    info!("Configuration loaded successfully");

    // Create shutdown coordinator
    let shutdown_coordinator = ShutdownCoordinator::new(config.general.shutdown_timeout);

    // Event bus and metrics are shared by both managers
    let events = EventBus::new(config.general.event_buffer_size);
    let metrics = Arc::new(Metrics::new());

    let tcp = TcpManager::new(&config.general, events.clone(), Arc::clone(&metrics));
    let udp = UdpManager::new(events.clone(), Arc::clone(&metrics));

    // Log every lifecycle event the managers publish
    let mut event_rx = events.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => log_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Event log lagged, {} events skipped", missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    bootstrap(&config, &tcp, &udp).await;

    // Heartbeat probes across all TCP instances
    if config.heartbeat.enabled {
        let started = tcp.start_heartbeat(config.heartbeat.interval).await;
        info!(
            "Heartbeat enabled: probing {} instances every {:?}",
            started, config.heartbeat.interval
        );
    }

    info!("SockHub started successfully");
    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    // Block until a shutdown signal arrives
    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
    }

    if let Err(e) = shutdown_coordinator.shutdown_managers(&tcp, &udp).await {
        error!("Error during shutdown: {}", e);
    }

    event_log.abort();
    info!("Shutdown complete");

    Ok(())
}

/// Create and start the configured instances. Servers bind only when flagged
/// for auto-start; TCP clients are always registered and dial only when
/// flagged for auto-connect.
async fn bootstrap(config: &Config, tcp: &TcpManager, udp: &UdpManager) {
    let auto_start_all = config.general.auto_start_all;
    let auto_connect_all = config.general.auto_connect_all;

    for (name, server) in &config.tcp.servers {
        if auto_start_all || server.auto_start {
            if let Err(e) = tcp.create_server(name, server.clone()).await {
                error!("Failed to start TCP server '{}': {}", name, e);
            }
        } else {
            debug!("TCP server '{}' configured but not auto-started", name);
        }
    }

    for (name, client) in &config.tcp.clients {
        let auto_connect = auto_connect_all || client.auto_connect;
        if let Err(e) = tcp.create_client(name, client.clone()).await {
            error!("Failed to create TCP client '{}': {}", name, e);
            continue;
        }
        if auto_connect {
            // A failed dial is not fatal: the reconnect policy, when
            // configured, keeps retrying in the background.
            if let Err(e) = tcp.connect_client(name).await {
                warn!("Initial connect for TCP client '{}' failed: {}", name, e);
            }
        }
    }

    for (name, server) in &config.udp.servers {
        if auto_start_all || server.auto_start {
            if let Err(e) = udp.create_server(name, server.clone()).await {
                error!("Failed to start UDP server '{}': {}", name, e);
            }
        } else {
            debug!("UDP server '{}' configured but not auto-started", name);
        }
    }

    for (name, client) in &config.udp.clients {
        if auto_connect_all || client.auto_connect {
            if let Err(e) = udp.create_client(name, client.clone()).await {
                error!("Failed to create UDP client '{}': {}", name, e);
            }
        } else {
            debug!("UDP client '{}' configured but not opened", name);
        }
    }
}

/// Write one log line per lifecycle event
fn log_event(event: &SocketEvent) {
    match event {
        SocketEvent::Listening { server, addr } => {
            info!("[{}] listening on {}", server, addr);
        }
        SocketEvent::Connection { server, id, remote } => {
            info!("[{}] connection {} accepted from {}", server, id, remote);
        }
        SocketEvent::Data {
            server,
            id,
            payload,
        } => {
            debug!("[{}] {} bytes from {}", server, payload.len(), id);
        }
        SocketEvent::ConnectionEnd { server, id } => {
            info!("[{}] connection {} ended", server, id);
        }
        SocketEvent::ConnectionError { server, id, error } => {
            warn!("[{}] connection {} errored: {}", server, id, error);
        }
        SocketEvent::ServerError { server, error } => {
            error!("[{}] server failed: {}", server, error);
        }
        SocketEvent::ClientConnect { client } => {
            info!("[{}] connected", client);
        }
        SocketEvent::ClientData { client, payload } => {
            debug!("[{}] {} bytes received", client, payload.len());
        }
        SocketEvent::ClientEnd { client } => {
            info!("[{}] remote closed the connection", client);
        }
        SocketEvent::ClientError { client, error } => {
            warn!("[{}] client error: {}", client, error);
        }
        SocketEvent::ClientClose { client, had_error } => {
            info!("[{}] closed (had_error: {})", client, had_error);
        }
        SocketEvent::UdpListening { name, addr } => {
            info!("[{}] udp listening on {}", name, addr);
        }
        SocketEvent::UdpDatagram {
            name,
            payload,
            from,
        } => {
            debug!("[{}] {} byte datagram from {}", name, payload.len(), from);
        }
        SocketEvent::UdpClientDatagram {
            name,
            payload,
            from,
        } => {
            debug!("[{}] {} byte datagram from {}", name, payload.len(), from);
        }
        SocketEvent::UdpServerError { name, error } => {
            error!("[{}] udp server failed: {}", name, error);
        }
        SocketEvent::UdpClientError { name, error } => {
            warn!("[{}] udp client error: {}", name, error);
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
