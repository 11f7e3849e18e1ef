use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Command counters, shared between the command handlers and the
/// liveness server.
#[derive(Debug)]
pub struct Metrics {
    started: Instant,
    items_generated: AtomicU64,
    items_added: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`Metrics`] served at `/metrics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_sec: u64,
    pub items_generated: u64,
    pub items_added: u64,
    pub rejected: u64,
    pub failed: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            items_generated: AtomicU64::new(0),
            items_added: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// An item was handed to a user
    pub fn record_generated(&self) {
        self.items_generated.fetch_add(1, Ordering::Relaxed);
    }

    /// `count` items were added to stock
    pub fn record_added(&self, count: u64) {
        self.items_added.fetch_add(count, Ordering::Relaxed);
    }

    /// A request failed validation (cooldown, empty stock, bad input)
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A request hit an unexpected error
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_sec: self.started.elapsed().as_secs(),
            items_generated: self.items_generated.load(Ordering::Relaxed),
            items_added: self.items_added.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
