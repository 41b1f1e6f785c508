//! Memory-mapped window pool: record-granular, locked access over a
//! fixed-record-size backing file, with demand-adaptive mapping of the
//! hottest bricks and single-record row fallbacks for the rest.

pub mod brick;
pub mod channel;
pub mod common;
pub mod config;
pub mod error;
pub mod monitor;
pub mod pool;
pub mod row_map;
pub mod stats;
pub mod window;

pub use brick::{BrickElement, BrickFactory, DefaultBrickFactory};
pub use common::Position;
pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use monitor::{Monitor, NoopMonitor};
pub use pool::WindowPool;
pub use row_map::ActiveRowMap;
pub use stats::PoolStats;
pub use window::{AccessMode, WindowGuard, WindowKind};
