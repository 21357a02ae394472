//! # Mutable PK Index
//!
//! The appendable block's index. Two maps, one invariant:
//!
//! - **active**: key -> row offset of the live (possibly uncommitted) row
//! - **tombstones**: key -> (last row, last delete timestamp)
//!
//! A key never appears as live and deleted at once: `delete` moves it from
//! the active map into the tombstone map, and a later reinsert of the same
//! key puts it back in the active map while the tombstone keeps recording
//! the latest delete timestamp for write-write checks.
//!
//! Timestamps strictly increase per key; `delete` rejects a timestamp at or
//! below the key's recorded one.

use hashbrown::HashMap;
use parking_lot::RwLock;
use roaring::RoaringBitmap;

use crate::error::{BlockError, Result};

/// Record of the most recent delete of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstone {
    /// Row offset the key mapped to when it was deleted.
    pub row: u32,
    /// Commit timestamp of the delete.
    pub ts: u64,
}

#[derive(Default)]
struct State {
    active: HashMap<Box<[u8]>, u32>,
    tombstones: HashMap<Box<[u8]>, Tombstone>,
    max_delete_ts: u64,
}

#[derive(Default)]
pub struct MutableIndex {
    state: RwLock<State>,
}

impl MutableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `keys[i] -> start_row + i` for all i, replacing any existing
    /// active mapping. Used by append and by index rebuild on replay.
    pub fn batch_upsert(&self, keys: &[Box<[u8]>], start_row: u32) {
        let mut state = self.state.write();
        for (i, key) in keys.iter().enumerate() {
            state.active.insert(key.clone(), start_row + i as u32);
        }
    }

    pub fn get_active_row(&self, key: &[u8]) -> Option<u32> {
        self.state.read().active.get(key).copied()
    }

    /// Drops `key` from the active map if it still maps to `row`. Used when
    /// an append aborts.
    pub fn remove_active(&self, key: &[u8], row: u32) {
        let mut state = self.state.write();
        if state.active.get(key) == Some(&row) {
            state.active.remove(key);
        }
    }

    /// Moves `key` into the tombstone map at delete timestamp `ts`.
    pub fn delete(&self, key: &[u8], ts: u64) -> Result<()> {
        let mut state = self.state.write();
        if let Some(prior) = state.tombstones.get(key) {
            if ts <= prior.ts {
                return Err(BlockError::internal(format!(
                    "delete ts {ts} not after prior delete ts {} for key",
                    prior.ts
                )));
            }
        }
        let row = state.active.remove(key);
        let row = match (row, state.tombstones.get(key)) {
            (Some(row), _) => row,
            (None, Some(prior)) => prior.row,
            (None, None) => {
                return Err(BlockError::NotFound);
            }
        };
        state.tombstones.insert(key.into(), Tombstone { row, ts });
        state.max_delete_ts = state.max_delete_ts.max(ts);
        Ok(())
    }

    /// Returns `(existed, deleted)`: whether the key has a tombstone at
    /// all, and whether that tombstone is visible at `ts`.
    pub fn is_key_deleted(&self, key: &[u8], ts: u64) -> (bool, bool) {
        let state = self.state.read();
        match state.tombstones.get(key) {
            Some(t) => (true, t.ts <= ts),
            None => (false, false),
        }
    }

    /// The tombstone for `key`, if any.
    pub fn tombstone(&self, key: &[u8]) -> Option<Tombstone> {
        self.state.read().tombstones.get(key).copied()
    }

    /// True if `key` was deleted after `ts`, i.e. by a transaction whose
    /// commit is not visible at `ts`.
    pub fn has_delete_after(&self, key: &[u8], ts: u64) -> bool {
        self.state
            .read()
            .tombstones
            .get(key)
            .is_some_and(|t| t.ts > ts)
    }

    pub fn max_delete_ts(&self) -> u64 {
        self.state.read().max_delete_ts
    }

    /// Checks `keys` against the active map; positions listed in `skip` are
    /// ignored. Any active hit fails with `Duplicate`; the returned bitmap
    /// selects positions whose key has a tombstone and therefore still
    /// needs a delete-visibility check.
    pub fn batch_dedup(
        &self,
        keys: &[Box<[u8]>],
        skip: Option<&RoaringBitmap>,
    ) -> Result<RoaringBitmap> {
        let state = self.state.read();
        let mut keyselects = RoaringBitmap::new();
        for (i, key) in keys.iter().enumerate() {
            if skip.is_some_and(|m| m.contains(i as u32)) {
                continue;
            }
            if state.active.contains_key(key.as_ref()) {
                return Err(BlockError::Duplicate);
            }
            if state.tombstones.contains_key(key.as_ref()) {
                keyselects.insert(i as u32);
            }
        }
        Ok(keyselects)
    }

    pub fn active_count(&self) -> usize {
        self.state.read().active.len()
    }

    pub fn destroy(&self) {
        let mut state = self.state.write();
        state.active.clear();
        state.tombstones.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Box<[u8]> {
        s.as_bytes().into()
    }

    #[test]
    fn upsert_then_lookup() {
        let idx = MutableIndex::new();
        idx.batch_upsert(&[key("a"), key("b")], 0);
        assert_eq!(idx.get_active_row(b"a"), Some(0));
        assert_eq!(idx.get_active_row(b"b"), Some(1));
        assert_eq!(idx.get_active_row(b"c"), None);
    }

    #[test]
    fn delete_moves_key_to_tombstones() {
        let idx = MutableIndex::new();
        idx.batch_upsert(&[key("a")], 0);
        idx.delete(b"a", 100).unwrap();
        assert_eq!(idx.get_active_row(b"a"), None);
        assert_eq!(idx.is_key_deleted(b"a", 100), (true, true));
        assert_eq!(idx.is_key_deleted(b"a", 99), (true, false));
        assert_eq!(idx.tombstone(b"a"), Some(Tombstone { row: 0, ts: 100 }));
        assert_eq!(idx.max_delete_ts(), 100);
    }

    #[test]
    fn delete_of_absent_key_fails() {
        let idx = MutableIndex::new();
        assert!(matches!(idx.delete(b"a", 10), Err(BlockError::NotFound)));
    }

    #[test]
    fn delete_timestamps_strictly_increase() {
        let idx = MutableIndex::new();
        idx.batch_upsert(&[key("a")], 0);
        idx.delete(b"a", 100).unwrap();
        idx.batch_upsert(&[key("a")], 5);
        assert!(idx.delete(b"a", 100).is_err());
        idx.delete(b"a", 150).unwrap();
        assert_eq!(idx.tombstone(b"a").unwrap().ts, 150);
    }

    #[test]
    fn reinsert_after_delete_keeps_tombstone() {
        let idx = MutableIndex::new();
        idx.batch_upsert(&[key("a")], 0);
        idx.delete(b"a", 100).unwrap();
        idx.batch_upsert(&[key("a")], 3);
        assert_eq!(idx.get_active_row(b"a"), Some(3));
        assert!(idx.has_delete_after(b"a", 50));
        assert!(!idx.has_delete_after(b"a", 100));
    }

    #[test]
    fn batch_dedup_flags_active_and_selects_tombstoned() {
        let idx = MutableIndex::new();
        idx.batch_upsert(&[key("a"), key("b")], 0);
        idx.delete(b"b", 10).unwrap();

        assert!(matches!(
            idx.batch_dedup(&[key("a")], None),
            Err(BlockError::Duplicate)
        ));

        let selects = idx.batch_dedup(&[key("x"), key("b")], None).unwrap();
        assert!(!selects.contains(0));
        assert!(selects.contains(1));
    }

    #[test]
    fn batch_dedup_skips_masked_positions() {
        let idx = MutableIndex::new();
        idx.batch_upsert(&[key("a")], 0);
        let mut skip = RoaringBitmap::new();
        skip.insert(0);
        assert!(idx.batch_dedup(&[key("a")], Some(&skip)).is_ok());
    }

    #[test]
    fn remove_active_only_when_row_matches() {
        let idx = MutableIndex::new();
        idx.batch_upsert(&[key("a")], 0);
        idx.remove_active(b"a", 5);
        assert_eq!(idx.get_active_row(b"a"), Some(0));
        idx.remove_active(b"a", 0);
        assert_eq!(idx.get_active_row(b"a"), None);
    }
}
