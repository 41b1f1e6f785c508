use std::sync::Arc;

use crate::brick::{BrickFactory, DefaultBrickFactory};
use crate::monitor::{Monitor, NoopMonitor};
use crate::row_map::ActiveRowMap;

/// Construction parameters for a [`crate::pool::WindowPool`].
///
/// A plain struct with a `Default` impl, not a parsed-file
/// configuration — parsing remains out of scope.
#[derive(Clone)]
pub struct PoolConfig {
    /// Name used in monitor callbacks and log lines; purely diagnostic.
    pub store_name: String,
    /// `R`: fixed size in bytes of one record.
    pub page_size: usize,
    /// `M`: bytes the pool is allowed to keep mapped at once. `0` disables
    /// mapping outright.
    pub mapped_mem: usize,
    /// When `false`, bricks are backed by `PlainPersistenceWindow` (heap
    /// buffers) instead of real `mmap` regions.
    pub use_memory_mapped: bool,
    /// Opens mapped windows read-only and refuses `release` writes.
    pub read_only: bool,
    /// Observer for statistics, status, and allocation failures.
    pub monitor: Arc<dyn Monitor>,
    /// The active row map this pool uses for its single-record fallback
    /// path. Defaults to a fresh, unshared map; callers that want several
    /// pools to share row state (or to instrument it) pass in their own.
    pub active_row_windows: ActiveRowMap,
    /// Constructs each `BrickElement` the pool's brick array holds.
    /// Defaults to `DefaultBrickFactory`; callers inject their own to wrap
    /// bricks with extra instrumentation.
    pub brick_factory: Arc<dyn BrickFactory>,
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("store_name", &self.store_name)
            .field("page_size", &self.page_size)
            .field("mapped_mem", &self.mapped_mem)
            .field("use_memory_mapped", &self.use_memory_mapped)
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            store_name: "window-pool".to_string(),
            page_size: 4096,
            mapped_mem: 0,
            use_memory_mapped: true,
            read_only: false,
            monitor: Arc::new(NoopMonitor),
            active_row_windows: ActiveRowMap::new(),
            brick_factory: Arc::new(DefaultBrickFactory),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.page_size == 0 {
            return Err(crate::error::PoolError::InvalidConfig(
                "page_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
