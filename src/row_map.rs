//! The active row map: `position -> PersistenceRow`, with a
//! compare-and-remove primitive so a release never drops a row a racing
//! acquirer just claimed.
//!
//! Uses `DashMap::remove_if` for value-aware removal instead of a
//! read-then-remove pair that can race.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::common::Position;
use crate::window::Window;

/// `position -> PersistenceRow` map. Cloning an `ActiveRowMap` clones the
/// `Arc` around the underlying table, not the table itself. A caller can
/// construct one and hand clones of it to several
/// [`crate::config::PoolConfig`]s that are meant to share row state.
#[derive(Clone)]
pub struct ActiveRowMap {
    map: Arc<DashMap<Position, Arc<Window>>>,
}

impl Default for ActiveRowMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveRowMap {
    pub fn new() -> Self {
        ActiveRowMap { map: Arc::new(DashMap::new()) }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Looks up the row at `position` and, if present, attempts to claim
    /// it. Returns `None` both when no row exists and when one exists but
    /// is already claimed by someone else.
    pub fn get_and_mark(&self, position: Position) -> Option<Arc<Window>> {
        let row = self.map.get(&position).map(|entry| Arc::clone(entry.value()))?;
        if row.mark_in_use() {
            Some(row)
        } else {
            None
        }
    }

    /// Inserts `row` at `position` unless one is already there, in which
    /// case the existing row is returned so the caller can drop the one it
    /// just built and retry against the winner instead.
    pub fn insert_if_absent(&self, position: Position, row: Arc<Window>) -> Result<(), Arc<Window>> {
        match self.map.entry(position) {
            Entry::Occupied(existing) => Err(Arc::clone(existing.get())),
            Entry::Vacant(slot) => {
                slot.insert(row);
                Ok(())
            }
        }
    }

    /// Removes the mapping at `position` only if it still points at
    /// `expected` — the compare-and-remove that keeps a racing acquirer's
    /// claim from being silently dropped by a stale release.
    pub fn remove_if_same(&self, position: Position, expected: &Arc<Window>) -> bool {
        self.map
            .remove_if(&position, |_, v| Arc::ptr_eq(v, expected))
            .is_some()
    }

    pub fn iter_positions(&self) -> Vec<Position> {
        self.map.iter().map(|entry| *entry.key()).collect()
    }

    /// Snapshot of every currently active row, for `flush_all`. Does not
    /// mark rows in use; callers that need exclusivity must coordinate
    /// that themselves (`flush_all` assumes quiescence).
    pub fn snapshot_rows(&self) -> Vec<Arc<Window>> {
        self.map.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn clear(&self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, FileChannel};

    fn row(position: Position) -> Arc<Window> {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileChannel::open(dir.path().join("r.bin"), false).unwrap();
        channel.set_len(64).unwrap();
        Window::new_row(position, 64, &channel).unwrap()
    }

    #[test]
    fn insert_if_absent_rejects_second_writer() {
        let map = ActiveRowMap::new();
        let a = row(5);
        let b = row(5);
        assert!(map.insert_if_absent(5, Arc::clone(&a)).is_ok());
        let conflict = map.insert_if_absent(5, b);
        assert!(conflict.is_err());
    }

    #[test]
    fn remove_if_same_rejects_stale_caller() {
        let map = ActiveRowMap::new();
        let a = row(5);
        map.insert_if_absent(5, Arc::clone(&a)).unwrap();
        let stale = row(5);
        assert!(!map.remove_if_same(5, &stale));
        assert!(map.remove_if_same(5, &a));
    }
}
