//! Shared types and small numeric helpers used across the pool.

/// A record index. All public pool operations address positions, never byte
/// offsets directly.
pub type Position = u64;

/// `N <= MAX_BRICK_COUNT`.
pub const MAX_BRICK_COUNT: usize = 100_000;

/// Cumulative brick-miss threshold that triggers a refresh pass.
pub const REFRESH_BRICK_COUNT: u64 = 50_000;

/// Retries `allocate_new_window` performs against a brick still in use
/// before giving up.
pub const MAX_ALLOC_ATTEMPTS: u32 = 5;

/// Rounds `value` down to the nearest multiple of `unit`, never below `unit`.
pub(crate) fn round_down_to_multiple(value: u64, unit: u64) -> u64 {
    debug_assert!(unit > 0);
    let rounded = (value / unit) * unit;
    rounded.max(unit)
}
