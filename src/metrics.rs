//! Metrics Collection
//!
//! Prometheus counters for connection churn, traffic volume, and keep-alive
//! activity across every managed instance.

use prometheus::{Counter, Gauge, Histogram, Registry, TextEncoder};
use std::time::Duration;
use tracing::error;

/// Collects and exports metrics
pub struct Metrics {
    prometheus_registry: Registry,

    connections_total: Counter,
    active_connections: Gauge,
    connection_duration: Histogram,
    bytes_received_total: Counter,
    bytes_sent_total: Counter,
    client_connects_total: Counter,
    client_disconnects_total: Counter,
    client_reconnects_total: Counter,
    heartbeats_total: Counter,
    send_failures_total: Counter,
    udp_datagrams_received_total: Counter,
    udp_datagrams_sent_total: Counter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let prometheus_registry = Registry::new();

        let connections_total = Counter::new(
            "sockhub_connections_total",
            "Total number of accepted inbound connections",
        )
        .expect("Failed to create connections_total counter");

        let active_connections = Gauge::new(
            "sockhub_active_connections",
            "Number of currently open inbound connections",
        )
        .expect("Failed to create active_connections gauge");

        let connection_duration = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "sockhub_connection_duration_seconds",
                "Lifetime of inbound connections in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]),
        )
        .expect("Failed to create connection_duration histogram");

        let bytes_received_total = Counter::new(
            "sockhub_bytes_received_total",
            "Total payload bytes received on TCP sockets",
        )
        .expect("Failed to create bytes_received_total counter");

        let bytes_sent_total = Counter::new(
            "sockhub_bytes_sent_total",
            "Total payload bytes written to TCP sockets",
        )
        .expect("Failed to create bytes_sent_total counter");

        let client_connects_total = Counter::new(
            "sockhub_client_connects_total",
            "Total successful client connects",
        )
        .expect("Failed to create client_connects_total counter");

        let client_disconnects_total = Counter::new(
            "sockhub_client_disconnects_total",
            "Total client disconnects, clean or errored",
        )
        .expect("Failed to create client_disconnects_total counter");

        let client_reconnects_total = Counter::new(
            "sockhub_client_reconnects_total",
            "Total automatic reconnect attempts",
        )
        .expect("Failed to create client_reconnects_total counter");

        let heartbeats_total = Counter::new(
            "sockhub_heartbeats_total",
            "Total heartbeat probes written",
        )
        .expect("Failed to create heartbeats_total counter");

        let send_failures_total = Counter::new(
            "sockhub_send_failures_total",
            "Total failed socket writes",
        )
        .expect("Failed to create send_failures_total counter");

        let udp_datagrams_received_total = Counter::new(
            "sockhub_udp_datagrams_received_total",
            "Total datagrams received on UDP sockets",
        )
        .expect("Failed to create udp_datagrams_received_total counter");

        let udp_datagrams_sent_total = Counter::new(
            "sockhub_udp_datagrams_sent_total",
            "Total datagrams sent from UDP sockets",
        )
        .expect("Failed to create udp_datagrams_sent_total counter");

        prometheus_registry
            .register(Box::new(connections_total.clone()))
            .expect("Failed to register connections_total");
        prometheus_registry
            .register(Box::new(active_connections.clone()))
            .expect("Failed to register active_connections");
        prometheus_registry
            .register(Box::new(connection_duration.clone()))
            .expect("Failed to register connection_duration");
        prometheus_registry
            .register(Box::new(bytes_received_total.clone()))
            .expect("Failed to register bytes_received_total");
        prometheus_registry
            .register(Box::new(bytes_sent_total.clone()))
            .expect("Failed to register bytes_sent_total");
        prometheus_registry
            .register(Box::new(client_connects_total.clone()))
            .expect("Failed to register client_connects_total");
        prometheus_registry
            .register(Box::new(client_disconnects_total.clone()))
            .expect("Failed to register client_disconnects_total");
        prometheus_registry
            .register(Box::new(client_reconnects_total.clone()))
            .expect("Failed to register client_reconnects_total");
        prometheus_registry
            .register(Box::new(heartbeats_total.clone()))
            .expect("Failed to register heartbeats_total");
        prometheus_registry
            .register(Box::new(send_failures_total.clone()))
            .expect("Failed to register send_failures_total");
        prometheus_registry
            .register(Box::new(udp_datagrams_received_total.clone()))
            .expect("Failed to register udp_datagrams_received_total");
        prometheus_registry
            .register(Box::new(udp_datagrams_sent_total.clone()))
            .expect("Failed to register udp_datagrams_sent_total");

        Self {
            prometheus_registry,
            connections_total,
            active_connections,
            connection_duration,
            bytes_received_total,
            bytes_sent_total,
            client_connects_total,
            client_disconnects_total,
            client_reconnects_total,
            heartbeats_total,
            send_failures_total,
            udp_datagrams_received_total,
            udp_datagrams_sent_total,
        }
    }

    /// Record an accepted inbound connection
    pub fn connection_opened(&self) {
        self.connections_total.inc();
        self.active_connections.inc();
    }

    /// Record an inbound connection ending after `duration`
    pub fn connection_closed(&self, duration: Duration) {
        self.active_connections.dec();
        self.connection_duration.observe(duration.as_secs_f64());
    }

    /// Record a successful client connect
    pub fn client_connected(&self) {
        self.client_connects_total.inc();
    }

    /// Record a client disconnect
    pub fn client_disconnected(&self) {
        self.client_disconnects_total.inc();
    }

    /// Record one automatic reconnect attempt
    pub fn reconnect_attempted(&self) {
        self.client_reconnects_total.inc();
    }

    /// Record one heartbeat probe written
    pub fn heartbeat_sent(&self) {
        self.heartbeats_total.inc();
    }

    /// Record a failed socket write
    pub fn send_failed(&self) {
        self.send_failures_total.inc();
    }

    /// Record inbound TCP payload bytes
    pub fn bytes_received(&self, count: u64) {
        self.bytes_received_total.inc_by(count as f64);
    }

    /// Record outbound TCP payload bytes
    pub fn bytes_sent(&self, count: u64) {
        self.bytes_sent_total.inc_by(count as f64);
    }

    /// Record one received datagram
    pub fn datagram_received(&self) {
        self.udp_datagrams_received_total.inc();
    }

    /// Record one sent datagram
    pub fn datagram_sent(&self) {
        self.udp_datagrams_sent_total.inc();
    }

    /// Get number of active connections
    pub fn get_active_connections(&self) -> usize {
        self.active_connections.get() as usize
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus_registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
