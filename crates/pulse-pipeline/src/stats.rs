//! Process-lifetime processing counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters shared by all workers.
///
/// Counters only ever increase; a snapshot taken mid-flight may be slightly
/// inconsistent across fields and that is fine for monitoring.
#[derive(Debug, Default)]
pub struct ProcessingStats {
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`ProcessingStats`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    /// Tasks that completed successfully.
    pub processed: u64,
    /// Tasks dropped after exhausting their retry budget.
    pub failed: u64,
    /// Re-enqueue attempts across all tasks.
    pub retried: u64,
}
