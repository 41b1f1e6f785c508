//! Brick elements: the fixed-size slots a pool's address space is carved
//! into, each optionally backed by a resident window.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::window::Window;

/// One slot of the brick array. `window` and `hit` are read without
/// locking on the hot acquire path — benign races there are acceptable, as
/// the only thing that must never race is *installing or evicting* a
/// window, which goes through `install_monitor`.
pub struct BrickElement {
    pub index: usize,
    window: RwLock<Option<Arc<Window>>>,
    /// Serializes `allocate_new_window` and eviction for this brick so the
    /// "does it have a window" check and "install/remove a window" action
    /// happen as one atomic decision.
    install_monitor: Mutex<()>,
    hit: AtomicU64,
    hit_snapshot: AtomicU64,
    lock_count: AtomicUsize,
}

impl BrickElement {
    pub fn new(index: usize) -> Self {
        BrickElement {
            index,
            window: RwLock::new(None),
            install_monitor: Mutex::new(()),
            hit: AtomicU64::new(0),
            hit_snapshot: AtomicU64::new(0),
            lock_count: AtomicUsize::new(0),
        }
    }

    pub fn record_hit(&self) {
        self.hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit(&self) -> u64 {
        self.hit.load(Ordering::Relaxed)
    }

    /// Reads the current hit count and resets it to zero, storing the
    /// prior value as this brick's snapshot for the refresh pass that is
    /// in progress.
    pub fn snapshot_and_reset_hit(&self) -> u64 {
        let prior = self.hit.swap(0, Ordering::AcqRel);
        self.hit_snapshot.store(prior, Ordering::Relaxed);
        prior
    }

    pub fn hit_snapshot(&self) -> u64 {
        self.hit_snapshot.load(Ordering::Relaxed)
    }

    pub fn lock_count(&self) -> usize {
        self.lock_count.load(Ordering::Acquire)
    }

    pub fn window(&self) -> Option<Arc<Window>> {
        self.window.read().clone()
    }

    pub fn has_window(&self) -> bool {
        self.window.read().is_some()
    }

    /// Returns the brick's resident window, if any, bumping `lock_count` so
    /// `with_install_lock` won't evict it out from under the caller.
    /// Concurrent callers may all receive the same window; arbitrating
    /// shared reads against exclusive writes is the window's own operation
    /// lock's job (taken afterwards by `WindowGuard::new`), not this
    /// method's. The `lock_count` bump happens while still holding the read
    /// guard on `self.window`, so an eviction attempt racing this call
    /// either completes before it and is seen, or blocks behind it and sees
    /// the bumped count once it proceeds.
    pub fn get_and_mark_window(&self) -> Option<Arc<Window>> {
        let guard = self.window.read();
        let window = guard.as_ref()?;
        self.lock_count.fetch_add(1, Ordering::AcqRel);
        Some(Arc::clone(window))
    }

    pub fn release_lock(&self) {
        self.lock_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Runs `f` while holding this brick's install monitor, the only
    /// correct place to install, replace, or evict its window.
    pub fn with_install_lock<R>(&self, f: impl FnOnce(&RwLock<Option<Arc<Window>>>) -> R) -> R {
        let _guard = self.install_monitor.lock();
        f(&self.window)
    }

    pub fn set_window(&self, window: Option<Arc<Window>>) {
        *self.window.write() = window;
    }
}

/// Caller-supplied constructor for `BrickElement`s, injected into
/// [`crate::config::PoolConfig`] so instrumentation (e.g. a subclass that
/// wraps `hit`/`lock_count` with extra bookkeeping for tests) doesn't
/// require forking the pool itself.
pub trait BrickFactory: Send + Sync {
    fn create(&self, index: usize) -> BrickElement;
}

/// The factory every pool uses unless the caller supplies its own.
pub struct DefaultBrickFactory;

impl BrickFactory for DefaultBrickFactory {
    fn create(&self, index: usize) -> BrickElement {
        BrickElement::new(index)
    }
}
