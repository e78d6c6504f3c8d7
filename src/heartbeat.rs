//! Heartbeat Keep-Alive
//!
//! Bookkeeping for the per-instance probe timers. The TCP manager owns the
//! probe logic; this scheduler only tracks and cancels the timer tasks so that
//! stopping clears each timer exactly once.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Fixed probe payload written on every tick
pub const PROBE: &[u8] = b"ping";

/// Heartbeat configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(30),
        }
    }
}

/// Instance a probe timer is attached to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ProbeTarget {
    Server(String),
    Client(String),
}

impl ProbeTarget {
    fn describe(&self) -> String {
        match self {
            ProbeTarget::Server(name) => format!("server '{}'", name),
            ProbeTarget::Client(name) => format!("client '{}'", name),
        }
    }
}

/// Tracks one timer task per probed instance
pub struct HeartbeatScheduler {
    timers: Mutex<HashMap<ProbeTarget, JoinHandle<()>>>,
}

impl HeartbeatScheduler {
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Store a timer for a target, cancelling any timer it replaces
    pub(crate) async fn insert(&self, target: ProbeTarget, handle: JoinHandle<()>) {
        let mut timers = self.timers.lock().await;
        if let Some(old) = timers.insert(target.clone(), handle) {
            old.abort();
            debug!("replaced heartbeat timer for {}", target.describe());
        }
    }

    /// Cancel the timer for one target, if any
    pub(crate) async fn cancel(&self, target: &ProbeTarget) {
        let mut timers = self.timers.lock().await;
        if let Some(handle) = timers.remove(target) {
            handle.abort();
            debug!("cancelled heartbeat timer for {}", target.describe());
        }
    }

    /// Cancel every timer; returns how many were cleared
    pub async fn stop_all(&self) -> usize {
        let mut timers = self.timers.lock().await;
        let cleared = timers.len();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        cleared
    }

    /// Number of timers currently tracked
    pub async fn active_timers(&self) -> usize {
        self.timers.lock().await.len()
    }
}

impl Default for HeartbeatScheduler {
    fn default() -> Self {
        Self::new()
    }
}
