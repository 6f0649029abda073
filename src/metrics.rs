//! Lock-free counters describing relay throughput.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing relay activity.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    merged: AtomicU64,
}

impl RelayMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a record accepted into the queue.
    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a record the inner sink accepted (merged duplicates count once).
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a record dropped because the queue stayed full.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record duplicates folded into a preceding record.
    pub fn record_merged(&self, count: u64) {
        self.merged.fetch_add(count, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            merged: self.merged.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of relay counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Records accepted into the queue since construction.
    pub enqueued: u64,
    /// Records the inner sink accepted.
    pub delivered: u64,
    /// Records dropped on a full queue.
    pub dropped: u64,
    /// Duplicate records folded into an earlier record.
    pub merged: u64,
}
