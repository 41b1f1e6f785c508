//! Multi-module scenarios from the pool's acceptance criteria: a window
//! pool backed by a real on-disk file, exercised through the public API
//! only.

use std::sync::Arc;

use winpool::channel::{Channel, FileChannel};
use winpool::config::PoolConfig;
use winpool::monitor::NoopMonitor;
use winpool::pool::WindowPool;
use winpool::window::{AccessMode, WindowKind};

fn open_pool(page_size: usize, mapped_mem: usize) -> (WindowPool, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backing.bin");
    let channel: Arc<dyn Channel> = Arc::new(FileChannel::open(&path, false).unwrap());
    let config = PoolConfig {
        store_name: "pool-integration".to_string(),
        page_size,
        mapped_mem,
        use_memory_mapped: true,
        read_only: false,
        monitor: Arc::new(NoopMonitor),
        ..Default::default()
    };
    (WindowPool::open(config, channel).unwrap(), dir)
}

#[test]
fn single_threaded_write_then_read_round_trip() {
    let (pool, _dir) = open_pool(128, 128 * 1000);

    for i in 0..50u64 {
        let mut guard = pool.acquire(i, AccessMode::Write).unwrap();
        let mut record = vec![0u8; 128];
        record[0] = (i % 256) as u8;
        guard.bytes_mut().copy_from_slice(&record);
        pool.release(guard);
    }

    for i in 0..50u64 {
        let guard = pool.acquire(i, AccessMode::Read).unwrap();
        assert_eq!(guard.bytes()[0], (i % 256) as u8);
        pool.release(guard);
    }

    let stats = pool.stats();
    assert!(stats.hit + stats.miss >= 100);
}

#[test]
fn row_write_is_durable_after_release_even_without_a_resident_window() {
    // No memory budget: every access takes the row fallback path.
    let (pool, _dir) = open_pool(64, 0);
    assert!(!pool.mapping_enabled());

    let mut guard = pool.acquire(9, AccessMode::Write).unwrap();
    guard.bytes_mut().copy_from_slice(&[0xAB; 64]);
    assert_eq!(guard.kind(), WindowKind::Row);
    pool.release(guard);

    let guard = pool.acquire(9, AccessMode::Read).unwrap();
    assert_eq!(guard.bytes(), &[0xAB; 64][..]);
    pool.release(guard);
}

#[test]
fn brick_array_expands_as_positions_grow_past_initial_sizing() {
    let (pool, _dir) = open_pool(64, 64 * 1000);
    let initial_bricks = pool.stats().brick_count;

    let guard = pool.acquire(50_000, AccessMode::Read).unwrap();
    pool.release(guard);

    assert!(pool.stats().brick_count > initial_bricks);
    assert!(pool.stats().brick_count * pool.brick_size() / 64 > 50_000);
}

#[test]
fn flush_all_persists_dirty_mapped_windows_to_the_channel() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flush.bin");
    let channel: Arc<dyn Channel> = Arc::new(FileChannel::open(&path, false).unwrap());
    let config = PoolConfig {
        store_name: "flush-test".to_string(),
        page_size: 64,
        mapped_mem: 64 * 1000,
        use_memory_mapped: true,
        read_only: false,
        monitor: Arc::new(NoopMonitor),
        ..Default::default()
    };
    let pool = WindowPool::open(config, Arc::clone(&channel)).unwrap();

    let mut guard = pool.acquire(0, AccessMode::Write).unwrap();
    guard.bytes_mut().copy_from_slice(&[0x42; 64]);
    pool.release(guard);

    pool.flush_all().unwrap();

    let mut check = [0u8; 64];
    channel.read_at(0, &mut check).unwrap();
    assert_eq!(check, [0x42; 64]);
}

#[test]
fn closed_pool_rejects_further_acquires() {
    let (pool, _dir) = open_pool(64, 64 * 1000);
    pool.close().unwrap();
    assert!(pool.acquire(0, AccessMode::Read).is_err());
}

#[test]
fn stats_snapshot_serializes_to_json() {
    let _ = tracing_subscriber::fmt::try_init();
    let (pool, _dir) = open_pool(64, 64 * 1000);

    let guard = pool.acquire(0, AccessMode::Read).unwrap();
    pool.release(guard);

    let json = pool.stats().to_json().unwrap();
    assert!(json.contains("\"hit\""));
}
