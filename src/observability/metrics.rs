//! Counters for the log engine, lease manager and scheduler
//!
//! - Counters only, monotonic increase
//! - Reset only on process start
//! - Relaxed atomics; values are exact once writers quiesce

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters shared by every component of one process.
#[derive(Debug, Default)]
pub struct LogMetrics {
    messages_appended: AtomicU64,
    records_written: AtomicU64,
    bytes_committed: AtomicU64,
    flushes: AtomicU64,
    version_conflicts: AtomicU64,
    records_read: AtomicU64,
    polls: AtomicU64,
    leases_acquired: AtomicU64,
    leases_lost: AtomicU64,
    store_retries: AtomicU64,
}

/// Point-in-time copy of [`LogMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_appended: u64,
    pub records_written: u64,
    pub bytes_committed: u64,
    pub flushes: u64,
    pub version_conflicts: u64,
    pub records_read: u64,
    pub polls: u64,
    pub leases_acquired: u64,
    pub leases_lost: u64,
    pub store_retries: u64,
}

impl LogMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Writer

    pub fn add_messages_appended(&self, count: u64) {
        self.messages_appended.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_records_written(&self, count: u64) {
        self.records_written.fetch_add(count, Ordering::Relaxed);
    }

    /// Records one successful page commit of `bytes` logical bytes
    pub fn record_flush(&self, bytes: u64) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.bytes_committed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_version_conflicts(&self) {
        self.version_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    // Reader

    pub fn add_records_read(&self, count: u64) {
        self.records_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_polls(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    // Leadership

    pub fn increment_leases_acquired(&self) {
        self.leases_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_leases_lost(&self) {
        self.leases_lost.fetch_add(1, Ordering::Relaxed);
    }

    // Store

    pub fn increment_store_retries(&self) {
        self.store_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_appended: self.messages_appended.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            bytes_committed: self.bytes_committed.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            version_conflicts: self.version_conflicts.load(Ordering::Relaxed),
            records_read: self.records_read.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            leases_acquired: self.leases_acquired.load(Ordering::Relaxed),
            leases_lost: self.leases_lost.load(Ordering::Relaxed),
            store_retries: self.store_retries.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_is_zero() {
        let metrics = LogMetrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.flushes, 0);
        assert_eq!(snapshot.bytes_committed, 0);
        assert_eq!(snapshot.leases_acquired, 0);
    }

    #[test]
    fn test_flush_counts_bytes_and_flushes() {
        let metrics = LogMetrics::new();
        metrics.record_flush(27);
        metrics.record_flush(100);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.flushes, 2);
        assert_eq!(snapshot.bytes_committed, 127);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = LogMetrics::new();
        metrics.increment_leases_lost();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["leases_lost"], 1);
    }
}
