//! Observer hook for the pool's internal events.
//!
//! Deliberately narrow: this is not a metrics-aggregation system. Callers
//! who want counters exported to Prometheus or similar wire it up themselves
//! by implementing [`Monitor`] over their own registry.

use crate::stats::PoolStats;

/// Receives notifications from a [`crate::pool::WindowPool`]. All methods
/// have no-op default bodies so implementors only override what they need.
pub trait Monitor: Send + Sync {
    /// Called at the end of a refresh pass with the current snapshot.
    fn record_statistics(&self, store_name: &str, stats: &PoolStats) {
        let _ = (store_name, stats);
    }

    /// Called after `expand_bricks` with the brick array's current shape
    /// plus the pool's standing memory budget and the backing channel's
    /// current length.
    fn record_status(
        &self,
        store_name: &str,
        brick_count: usize,
        brick_size: usize,
        available_mem: usize,
        file_size: u64,
    ) {
        let _ = (store_name, brick_count, brick_size, available_mem, file_size);
    }

    /// Called when `allocate_new_window` fails for a reason other than
    /// brick contention (mmap failure, OOM).
    fn allocation_error(&self, store_name: &str, description: &str) {
        let _ = (store_name, description);
    }

    /// Called once at setup if the configured memory budget is too small
    /// to map even a single brick, before mapping is disabled for the
    /// pool's lifetime.
    fn insufficient_memory_for_mapping(&self, available: usize, required: usize) {
        let _ = (available, required);
    }
}

/// The default [`Monitor`]: observes nothing.
pub struct NoopMonitor;

impl Monitor for NoopMonitor {}
