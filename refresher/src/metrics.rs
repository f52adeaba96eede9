//! Metrics collection for refresh monitoring.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Refresher metrics.
pub struct RefreshMetrics {
    /// Cycles started.
    pub cycles_total: AtomicU64,
    /// Cycles that claimed nothing.
    pub cycles_empty: AtomicU64,
    /// Cycles abandoned because the claim failed.
    pub claim_errors: AtomicU64,
    /// Requests claimed.
    pub records_claimed: AtomicU64,
    /// Requests marked completed.
    pub records_completed: AtomicU64,
    /// Requests marked failed, or left in processing after a failed write.
    pub records_failed: AtomicU64,
    /// Provider calls that returned an error.
    pub gateway_errors: AtomicU64,
    /// Per-base tasks that panicked.
    pub tasks_panicked: AtomicU64,
    /// Stale processing requests returned to pending.
    pub requeued_stale: AtomicU64,
}

impl RefreshMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            cycles_empty: AtomicU64::new(0),
            claim_errors: AtomicU64::new(0),
            records_claimed: AtomicU64::new(0),
            records_completed: AtomicU64::new(0),
            records_failed: AtomicU64::new(0),
            gateway_errors: AtomicU64::new(0),
            tasks_panicked: AtomicU64::new(0),
            requeued_stale: AtomicU64::new(0),
        }
    }

    pub fn cycle_started(&self) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycle_empty(&self) {
        self.cycles_empty.fetch_add(1, Ordering::Relaxed);
    }

    pub fn claim_error(&self) {
        self.claim_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn claimed(&self, count: usize) {
        self.records_claimed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn completed(&self, count: usize) {
        self.records_completed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn failed(&self, count: usize) {
        self.records_failed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn gateway_error(&self) {
        self.gateway_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_panicked(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requeued(&self, count: u64) {
        self.requeued_stale.fetch_add(count, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> RefreshMetricsSnapshot {
        RefreshMetricsSnapshot {
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycles_empty: self.cycles_empty.load(Ordering::Relaxed),
            claim_errors: self.claim_errors.load(Ordering::Relaxed),
            records_claimed: self.records_claimed.load(Ordering::Relaxed),
            records_completed: self.records_completed.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            gateway_errors: self.gateway_errors.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            requeued_stale: self.requeued_stale.load(Ordering::Relaxed),
        }
    }
}

impl Default for RefreshMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshMetricsSnapshot {
    pub cycles_total: u64,
    pub cycles_empty: u64,
    pub claim_errors: u64,
    pub records_claimed: u64,
    pub records_completed: u64,
    pub records_failed: u64,
    pub gateway_errors: u64,
    pub tasks_panicked: u64,
    pub requeued_stale: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<RefreshMetrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = RefreshMetrics::new();

        metrics.cycle_started();
        metrics.cycle_started();
        metrics.cycle_empty();
        metrics.claimed(5);
        metrics.completed(3);
        metrics.failed(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles_total, 2);
        assert_eq!(snapshot.cycles_empty, 1);
        assert_eq!(snapshot.records_claimed, 5);
        assert_eq!(snapshot.records_completed, 3);
        assert_eq!(snapshot.records_failed, 2);
        assert_eq!(snapshot.tasks_panicked, 0);
    }
}
