//! Configuration Manager

use super::Config;
use anyhow::{bail, Context, Result};
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        // Override with environment variables if present
        if let Ok(timeout) = std::env::var("SOCKHUB_CONNECT_TIMEOUT") {
            config.general.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid SOCKHUB_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Ok(max_conn) = std::env::var("SOCKHUB_MAX_CONNECTIONS") {
            config.general.max_connections = max_conn
                .parse::<usize>()
                .with_context(|| format!("Invalid SOCKHUB_MAX_CONNECTIONS: {}", max_conn))?;
        }

        if let Ok(buffer_size) = std::env::var("SOCKHUB_READ_BUFFER_SIZE") {
            config.general.read_buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid SOCKHUB_READ_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(enabled) = std::env::var("SOCKHUB_HEARTBEAT_ENABLED") {
            config.heartbeat.enabled = enabled
                .parse::<bool>()
                .with_context(|| format!("Invalid SOCKHUB_HEARTBEAT_ENABLED: {}", enabled))?;
        }

        if let Ok(interval) = std::env::var("SOCKHUB_HEARTBEAT_INTERVAL") {
            config.heartbeat.interval = humantime::parse_duration(&interval)
                .with_context(|| format!("Invalid SOCKHUB_HEARTBEAT_INTERVAL: {}", interval))?;
        }

        if let Ok(log_level) = std::env::var("SOCKHUB_LOG_LEVEL") {
            config.general.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_general_config()
            .with_context(|| "General configuration validation failed")?;

        self.validate_heartbeat_config()
            .with_context(|| "Heartbeat configuration validation failed")?;

        self.validate_tcp_config()
            .with_context(|| "TCP configuration validation failed")?;

        self.validate_udp_config()
            .with_context(|| "UDP configuration validation failed")?;

        Ok(())
    }

    /// Validate manager-wide settings
    fn validate_general_config(&self) -> Result<()> {
        if self.general.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if self.general.max_connections > 100000 {
            bail!("max_connections cannot exceed 100,000 for safety");
        }

        if self.general.connect_timeout.as_millis() == 0 {
            bail!("connect_timeout must be greater than 0");
        }

        if self.general.connect_timeout.as_secs() > 3600 {
            bail!("connect_timeout cannot exceed 1 hour");
        }

        if self.general.read_buffer_size < 1024 {
            bail!("read_buffer_size must be at least 1024 bytes");
        }

        if self.general.read_buffer_size > 1048576 {
            bail!("read_buffer_size cannot exceed 1MB");
        }

        if self.general.event_buffer_size < 16 {
            bail!("event_buffer_size must be at least 16");
        }

        if self.general.shutdown_timeout.as_millis() == 0 {
            bail!("shutdown_timeout must be greater than 0");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            bail!(
                "general.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Validate heartbeat settings
    fn validate_heartbeat_config(&self) -> Result<()> {
        if self.heartbeat.interval.as_millis() == 0 {
            bail!("heartbeat.interval must be greater than 0");
        }

        Ok(())
    }

    /// Validate named TCP instances
    fn validate_tcp_config(&self) -> Result<()> {
        for (name, server) in &self.tcp.servers {
            if name.is_empty() {
                bail!("TCP server names must not be empty");
            }

            if server.port == 0 {
                bail!("TCP server '{}' must set a non-zero port", name);
            }

            if server.host.parse::<std::net::IpAddr>().is_err() {
                bail!(
                    "TCP server '{}' host must be an IP address, got '{}'",
                    name,
                    server.host
                );
            }

            if server.backlog == 0 {
                bail!("TCP server '{}' must set a non-zero backlog", name);
            }
        }

        for (name, client) in &self.tcp.clients {
            if name.is_empty() {
                bail!("TCP client names must not be empty");
            }

            if client.port == 0 {
                bail!("TCP client '{}' must set a non-zero port", name);
            }

            if client.host.is_empty() {
                bail!("TCP client '{}' has an empty host", name);
            }

            if let Some(timeout) = client.connect_timeout {
                if timeout.as_millis() == 0 {
                    bail!("TCP client '{}' connect_timeout must be greater than 0", name);
                }
            }

            match (client.reconnect_interval, client.max_reconnect_attempts) {
                (Some(interval), Some(_)) => {
                    if interval.as_millis() == 0 {
                        bail!(
                            "TCP client '{}' reconnect_interval must be greater than 0",
                            name
                        );
                    }
                }
                (Some(_), None) | (None, Some(_)) => {
                    bail!(
                        "TCP client '{}' must set reconnect_interval and max_reconnect_attempts together",
                        name
                    );
                }
                (None, None) => {}
            }
        }

        Ok(())
    }

    /// Validate named UDP instances
    fn validate_udp_config(&self) -> Result<()> {
        for (name, server) in &self.udp.servers {
            if name.is_empty() {
                bail!("UDP server names must not be empty");
            }

            if server.port == 0 {
                bail!("UDP server '{}' must set a non-zero port", name);
            }

            if server.host.parse::<std::net::IpAddr>().is_err() {
                bail!(
                    "UDP server '{}' host must be an IP address, got '{}'",
                    name,
                    server.host
                );
            }
        }

        for (name, client) in &self.udp.clients {
            if name.is_empty() {
                bail!("UDP client names must not be empty");
            }

            if client.port == 0 {
                bail!("UDP client '{}' must set a non-zero destination port", name);
            }

            if client.host.is_empty() {
                bail!("UDP client '{}' has an empty destination host", name);
            }
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        max_connections: Option<usize>,
        connect_timeout: Option<u64>,
        no_heartbeat: bool,
        auto_start_all: bool,
        auto_connect_all: bool,
    ) {
        // Override max connections if provided
        if let Some(max_conn) = max_connections {
            self.general.max_connections = max_conn;
            tracing::info!("CLI override: max connections set to {}", max_conn);
        }

        // Override connect timeout if provided
        if let Some(timeout_secs) = connect_timeout {
            self.general.connect_timeout = std::time::Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: connect timeout set to {}s", timeout_secs);
        }

        // Disable heartbeat if requested
        if no_heartbeat {
            self.heartbeat.enabled = false;
            tracing::info!("CLI override: heartbeat disabled");
        }

        // Force auto-start / auto-connect if requested
        if auto_start_all {
            self.general.auto_start_all = true;
            tracing::info!("CLI override: auto-starting all configured servers");
        }

        if auto_connect_all {
            self.general.auto_connect_all = true;
            tracing::info!("CLI override: auto-connecting all configured clients");
        }
    }
}
