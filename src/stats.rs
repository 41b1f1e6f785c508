//! Atomic counters backing [`PoolStats`] snapshots.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Point-in-time snapshot of a pool's counters. Cheap to serialize and hand
/// off to a caller's own metrics pipeline; the pool does not export these
/// anywhere itself.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub hit: u64,
    pub miss: u64,
    pub switches: u64,
    pub ooe: u64,
    pub refreshes: u64,
    pub averted_refreshes: u64,
    pub avg_refresh_nanos: u64,
    pub brick_count: usize,
    pub brick_size: usize,
    pub mem_used: usize,
    pub available_mem: usize,
}

/// Internal, lock-free counters. One per pool. `PoolStats` is taken as a
/// relaxed snapshot of these — the pool does not try to make statistics
/// consistent with each other, only individually accurate.
#[derive(Default)]
pub(crate) struct Counters {
    pub hit: AtomicU64,
    pub miss: AtomicU64,
    pub switches: AtomicU64,
    pub ooe: AtomicU64,
    pub refreshes: AtomicU64,
    pub averted_refreshes: AtomicU64,
    pub refresh_nanos_total: AtomicU64,
    pub mem_used: AtomicUsize,
}

impl PoolStats {
    /// Convenience for callers that want to ship a snapshot somewhere
    /// without pulling in their own metrics crate.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Counters {
    pub fn record_refresh(&self, elapsed_nanos: u64) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        self.refresh_nanos_total
            .fetch_add(elapsed_nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self, brick_count: usize, brick_size: usize, available_mem: usize) -> PoolStats {
        let refreshes = self.refreshes.load(Ordering::Relaxed);
        let avg_refresh_nanos = if refreshes == 0 {
            0
        } else {
            self.refresh_nanos_total.load(Ordering::Relaxed) / refreshes
        };
        PoolStats {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            switches: self.switches.load(Ordering::Relaxed),
            ooe: self.ooe.load(Ordering::Relaxed),
            refreshes,
            averted_refreshes: self.averted_refreshes.load(Ordering::Relaxed),
            avg_refresh_nanos,
            brick_count,
            brick_size,
            mem_used: self.mem_used.load(Ordering::Relaxed),
            available_mem,
        }
    }
}
