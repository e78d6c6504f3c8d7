//! Graceful Shutdown Handling
//!
//! This module coordinates shutdown of the socket managers. It supports
//! SIGTERM and SIGINT signals, waits for open connections to drain within a
//! timeout, then force-closes whatever remains.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use crate::tcp::TcpManager;
use crate::udp::UdpManager;
use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Notification for shutdown completion
    shutdown_complete: Arc<Notify>,
    /// Drain timeout before connections are force-closed
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_complete = Arc::new(Notify::new());

        Self {
            shutdown_tx,
            shutdown_complete,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Get a handle to wait for shutdown completion
    pub fn completion_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown_complete)
    }

    /// Start listening for shutdown signals (SIGTERM, SIGINT)
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        // Send shutdown signal to all components
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }

        Ok(())
    }

    /// Perform graceful shutdown of the socket managers: stop heartbeating,
    /// wait for connections to drain, then force-close everything left.
    pub async fn shutdown_managers(&self, tcp: &TcpManager, udp: &UdpManager) -> Result<()> {
        info!("Initiating graceful shutdown of socket managers");
        let start_time = Instant::now();

        tcp.stop_heartbeat().await;

        // Wait for active connections to finish
        let mut last_count = tcp.connection_count().await;
        info!(
            "Waiting for {} active connections to close (timeout: {:?})",
            last_count, self.timeout
        );

        while last_count > 0 && start_time.elapsed() < self.timeout {
            tokio::time::sleep(Duration::from_millis(500)).await;

            let current_count = tcp.connection_count().await;
            if current_count != last_count {
                debug!("Active connections: {} -> {}", last_count, current_count);
                last_count = current_count;
            }
        }

        let remaining = tcp.connection_count().await;
        if remaining > 0 {
            warn!(
                "Drain timeout reached after {:?} with {} connections still active, forcing close",
                start_time.elapsed(),
                remaining
            );
        }

        tcp.close_all().await;
        udp.close_all().await;

        info!("Socket managers shut down in {:?}", start_time.elapsed());

        // Notify that shutdown is complete
        self.shutdown_complete.notify_waiters();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneralConfig;
    use crate::events::EventBus;
    use crate::metrics::Metrics;
    use crate::tcp::TcpServerConfig;

    #[tokio::test]
    async fn test_shutdown_coordinator_creation() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let _receiver = coordinator.subscribe();
        let _completion = coordinator.completion_handle();
    }

    #[tokio::test]
    async fn test_shutdown_signal_broadcast() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let mut receiver = coordinator.subscribe();

        coordinator.shutdown_tx.send(()).unwrap();

        assert!(receiver.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_managers_closes_everything() {
        let events = EventBus::default();
        let metrics = Arc::new(Metrics::new());
        let tcp = TcpManager::new(&GeneralConfig::default(), events.clone(), Arc::clone(&metrics));
        let udp = UdpManager::new(events, metrics);

        tcp.create_server("edge", TcpServerConfig::default())
            .await
            .unwrap();
        udp.create_client("beacon", crate::udp::UdpClientConfig::default())
            .await
            .unwrap();

        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));
        coordinator.shutdown_managers(&tcp, &udp).await.unwrap();

        assert!(!tcp.has_server("edge").await);
        assert!(!udp.has_client("beacon").await);
        assert_eq!(tcp.connection_count().await, 0);
    }
}
