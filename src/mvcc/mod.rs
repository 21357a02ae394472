//! # MVCC Handle
//!
//! Per-block container of the append-node list, the per-column update
//! chains, and the delete chain, enforcing the block's visibility and
//! write-write conflict rules.
//!
//! ## Structure
//!
//! ```text
//! MvccHandle
//! ├── core: RwLock<MvccCore>        append list + delete chain + holes
//! ├── columns: [ColumnChain; N]     one chain (own lock) per column
//! ├── max_visible: AtomicU64        read-visibility watermark
//! └── next_node_id: AtomicU64       id source shared by all chains
//! ```
//!
//! ## Locking Rules
//!
//! - Append installation and deletes take the **core write lock**.
//! - Column updates default to the fine-grained path: **core read lock plus
//!   the chain's write lock**. The coarse path under the core write lock is
//!   equivalent and also available.
//! - Visibility queries take the core read lock.
//! - Lock order is always core before chain, never the reverse.
//!
//! ## Node Handles
//!
//! Mutations return plain handles carrying chain and node ids rather than
//! references, so transactions never own chain memory; the block applies
//! commit and abort by transaction identity.
//!
//! ## Aborted Appends
//!
//! An aborted append at the buffer tail is truncated away. An aborted
//! append with later surviving appends leaves a hole: its rows are recorded
//! in a dead-rows mask that reads and views treat exactly like committed
//! deletes.

pub mod column;
pub mod delete;
pub mod node;

pub use column::{ColumnChain, UpdateNode};
pub use delete::{DeleteChain, DeleteNode};
pub use node::AppendNode;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use smallvec::SmallVec;

use crate::error::{BlockError, Result};
use crate::mvcc::node::NodeTxn;
use crate::txn::Txn;
use crate::types::Value;
use crate::wal::LogIndex;

/// Handle to an installed append node.
#[derive(Debug, Clone, Copy)]
pub struct AppendHandle {
    pub node_id: u64,
    pub start_row: u32,
    pub row_count: u32,
}

/// Handle to an installed update node.
#[derive(Debug, Clone, Copy)]
pub struct UpdateHandle {
    pub node_id: u64,
    pub col_idx: u16,
}

/// Handle to an installed delete node.
#[derive(Debug, Clone, Copy)]
pub struct DeleteHandle {
    pub node_id: u64,
}

/// What a commit application changed, for the block's listeners.
#[derive(Debug, Default)]
pub struct CommitOutcome {
    /// Rows whose deletes committed, if any.
    pub committed_deletes: Option<RoaringBitmap>,
    /// Row ranges whose appends committed.
    pub committed_appends: SmallVec<[(u32, u32); 1]>,
}

/// What an abort unlinked, for index maintenance and buffer truncation.
#[derive(Debug, Default)]
pub struct AbortOutcome {
    /// Row ranges of the aborted appends.
    pub aborted_appends: SmallVec<[(u32, u32); 1]>,
    /// Physical row count after tail truncation.
    pub rows_after: u32,
}

/// Snapshot of all change overlays at one timestamp.
#[derive(Debug, Default)]
pub struct SnapshotChanges {
    pub updates: Vec<(u16, RoaringBitmap, HashMap<u32, Value>)>,
    pub delete_mask: Option<RoaringBitmap>,
    pub visible_rows: u32,
}

/// Committed changes within a timestamp range, with their log indexes.
#[derive(Debug, Default)]
pub struct RangeChanges {
    pub updates: Vec<(u16, RoaringBitmap, HashMap<u32, Value>)>,
    pub col_log_indexes: Vec<(u16, Vec<LogIndex>)>,
    pub delete_mask: Option<RoaringBitmap>,
    pub delete_log_indexes: Vec<LogIndex>,
}

#[derive(Default)]
struct MvccCore {
    appends: Vec<AppendNode>,
    deletes: DeleteChain,
    /// Rows orphaned by aborted non-tail appends; treated as deleted.
    dead_rows: RoaringBitmap,
}

impl MvccCore {
    fn total_rows(&self) -> u32 {
        self.appends.iter().map(|n| n.end_row()).max().unwrap_or(0)
    }

    fn visible_rows(&self, ts: u64, reader: Option<&Txn>) -> (u32, bool) {
        let mut max_row = 0u32;
        let mut visible = false;
        for node in &self.appends {
            if node.state.visible_at(ts, reader) {
                visible = true;
                max_row = max_row.max(node.end_row());
            }
        }
        (max_row, visible)
    }

    fn is_deleted(&self, row: u32, ts: u64, reader: Option<&Txn>) -> bool {
        self.dead_rows.contains(row) || self.deletes.is_deleted(row, ts, reader)
    }

    fn collect_deletes(&self, ts: u64, reader: Option<&Txn>) -> Option<RoaringBitmap> {
        let mut mask = self.deletes.collect_deletes(ts, reader).unwrap_or_default();
        mask |= &self.dead_rows;
        if mask.is_empty() {
            None
        } else {
            Some(mask)
        }
    }
}

pub struct MvccHandle {
    core: RwLock<MvccCore>,
    columns: Box<[ColumnChain]>,
    max_visible: AtomicU64,
    next_node_id: AtomicU64,
}

impl MvccHandle {
    pub fn new(col_count: usize) -> Self {
        let columns = (0..col_count)
            .map(|i| ColumnChain::new(i as u16))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            core: RwLock::new(MvccCore::default()),
            columns,
            max_visible: AtomicU64::new(0),
            next_node_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_node_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn chain(&self, col_idx: u16) -> Result<&ColumnChain> {
        self.columns
            .get(col_idx as usize)
            .ok_or_else(|| BlockError::internal(format!("no chain for column {col_idx}")))
    }

    /// Commit timestamp watermark used for read visibility.
    pub fn max_visible(&self) -> u64 {
        self.max_visible.load(Ordering::Acquire)
    }

    pub fn advance_max_visible(&self, ts: u64) {
        self.max_visible.fetch_max(ts, Ordering::AcqRel);
    }

    // ------------------------------------------------------------------
    // Appends
    // ------------------------------------------------------------------

    /// Installs an append node of `row_count` rows at the buffer tail.
    pub fn create_append(
        &self,
        txn: &Arc<Txn>,
        row_count: u32,
        block_max_rows: u32,
    ) -> Result<AppendHandle> {
        let mut core = self.core.write();
        let start_row = core.total_rows();
        if start_row + row_count > block_max_rows {
            return Err(BlockError::Full);
        }
        let node_id = self.next_id();
        core.appends.push(AppendNode {
            id: node_id,
            start_row,
            row_count,
            state: NodeTxn::uncommitted(Arc::clone(txn)),
            log_index: None,
        });
        Ok(AppendHandle {
            node_id,
            start_row,
            row_count,
        })
    }

    /// Physical row count including uncommitted appends.
    pub fn total_rows(&self) -> u32 {
        self.core.read().total_rows()
    }

    /// Highest row bound visible at `ts`, and whether any append is visible.
    pub fn visible_rows(&self, ts: u64, reader: Option<&Txn>) -> (u32, bool) {
        self.core.read().visible_rows(ts, reader)
    }

    /// Whether `row` belongs to an append visible at `ts` and is not dead.
    pub fn is_row_visible(&self, row: u32, ts: u64, reader: Option<&Txn>) -> bool {
        let core = self.core.read();
        if core.dead_rows.contains(row) {
            return false;
        }
        core.appends
            .iter()
            .any(|n| row >= n.start_row && row < n.end_row() && n.state.visible_at(ts, reader))
    }

    // ------------------------------------------------------------------
    // Deletes
    // ------------------------------------------------------------------

    /// Installs a delete node covering `[start, end]` after running the
    /// write-write checks. A range already deleted at the writer's snapshot
    /// is a conflict for a deleter.
    pub fn range_delete(&self, txn: &Arc<Txn>, start: u32, end: u32) -> Result<DeleteHandle> {
        let ts = txn.start_ts();
        let mut core = self.core.write();
        match core.deletes.check_not_deleted(start, end, ts, txn) {
            Ok(()) => {}
            Err(BlockError::NotFound) => return Err(BlockError::WWConflict),
            Err(err) => return Err(err),
        }
        if core.dead_rows.range_cardinality(start..=end) > 0 {
            return Err(BlockError::WWConflict);
        }
        for chain in self.columns.iter() {
            chain.check_not_updated(start, end, ts, txn)?;
        }
        let node_id = self.next_id();
        core.deletes.add_node(node_id, txn);
        core.deletes.range_delete(node_id, start, end)?;
        Ok(DeleteHandle { node_id })
    }

    /// Whether `row` is deleted at `ts` (including dead append holes).
    pub fn is_deleted(&self, row: u32, ts: u64, reader: Option<&Txn>) -> bool {
        self.core.read().is_deleted(row, ts, reader)
    }

    /// Merged delete mask visible at `ts`.
    pub fn collect_deletes(&self, ts: u64, reader: Option<&Txn>) -> Option<RoaringBitmap> {
        self.core.read().collect_deletes(ts, reader)
    }

    // ------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------

    /// Fine-grained update: core read lock plus the chain's write lock.
    pub fn update_fine(
        &self,
        txn: &Arc<Txn>,
        col_idx: u16,
        row: u32,
        value: Value,
    ) -> Result<UpdateHandle> {
        let core = self.core.read();
        self.check_update_target(&core, txn, row)?;
        let node_id = self.next_id();
        self.chain(col_idx)?.apply_update(node_id, txn, row, value)?;
        Ok(UpdateHandle { node_id, col_idx })
    }

    /// Coarse-grained update under the core write lock; semantically
    /// equivalent to [`update_fine`](Self::update_fine).
    pub fn update_coarse(
        &self,
        txn: &Arc<Txn>,
        col_idx: u16,
        row: u32,
        value: Value,
    ) -> Result<UpdateHandle> {
        let core = self.core.write();
        self.check_update_target(&core, txn, row)?;
        self.chain(col_idx)?
            .check_not_updated(row, row, txn.start_ts(), txn)?;
        let node_id = self.next_id();
        self.chain(col_idx)?.apply_update(node_id, txn, row, value)?;
        Ok(UpdateHandle { node_id, col_idx })
    }

    fn check_update_target(&self, core: &MvccCore, txn: &Txn, row: u32) -> Result<()> {
        // A row deleted at the updater's snapshot reads as absent.
        if core.dead_rows.contains(row) {
            return Err(BlockError::NotFound);
        }
        core.deletes.check_not_deleted(row, row, txn.start_ts(), txn)
    }

    /// The latest update of (`row`, `col`) visible to `txn`, `Ok(None)` when
    /// the base column holds the visible version, `NotFound` when the row is
    /// deleted at the transaction's snapshot.
    pub fn get_visible_update(&self, txn: &Txn, row: u32, col_idx: u16) -> Result<Option<Value>> {
        let ts = txn.start_ts();
        let core = self.core.read();
        if core.is_deleted(row, ts, Some(txn)) {
            return Err(BlockError::NotFound);
        }
        Ok(self.chain(col_idx)?.get_value(row, ts, Some(txn)))
    }

    /// Folds one column's chain at `ts`.
    pub fn collect_column_updates(
        &self,
        col_idx: u16,
        ts: u64,
        reader: Option<&Txn>,
    ) -> Result<Option<(RoaringBitmap, HashMap<u32, Value>)>> {
        Ok(self.chain(col_idx)?.collect_updates(ts, reader))
    }

    // ------------------------------------------------------------------
    // Aggregate views
    // ------------------------------------------------------------------

    /// Per-column overlays, delete mask, and visible row bound at `ts`,
    /// gathered under one core read section.
    pub fn collect_snapshot(&self, ts: u64, reader: Option<&Txn>) -> SnapshotChanges {
        let core = self.core.read();
        let mut out = SnapshotChanges {
            visible_rows: core.visible_rows(ts, reader).0,
            delete_mask: core.collect_deletes(ts, reader),
            ..Default::default()
        };
        for chain in self.columns.iter() {
            if let Some((mask, values)) = chain.collect_updates(ts, reader) {
                out.updates.push((chain.col_idx(), mask, values));
            }
        }
        out
    }

    /// Committed changes in `[start_ts, end_ts]` for replication and
    /// compaction.
    pub fn collect_changes_in_range(&self, start_ts: u64, end_ts: u64) -> RangeChanges {
        let core = self.core.read();
        let mut out = RangeChanges::default();
        for chain in self.columns.iter() {
            if let Some((mask, values, indexes)) =
                chain.collect_committed_in_range(start_ts, end_ts)
            {
                out.updates.push((chain.col_idx(), mask, values));
                out.col_log_indexes.push((chain.col_idx(), indexes));
            }
        }
        let (mask, indexes) = core.deletes.collect_in_range(start_ts, end_ts);
        out.delete_mask = mask;
        out.delete_log_indexes = indexes;
        out
    }

    /// Log indexes of appends committed in `[start_ts, end_ts]`.
    pub fn collect_append_log_indexes(&self, start_ts: u64, end_ts: u64) -> Vec<LogIndex> {
        let core = self.core.read();
        core.appends
            .iter()
            .filter(|n| {
                n.state
                    .commit_ts()
                    .is_some_and(|cts| cts >= start_ts && cts <= end_ts)
            })
            .filter_map(|n| n.log_index)
            .collect()
    }

    // ------------------------------------------------------------------
    // Scoring inputs
    // ------------------------------------------------------------------

    /// Non-aborted change nodes across all chains (updates + deletes).
    pub fn change_node_count(&self) -> usize {
        let deletes = self.core.read().deletes.node_count();
        deletes
            + self
                .columns
                .iter()
                .map(|c| c.node_count())
                .sum::<usize>()
    }

    /// Distinct rows with a committed update in `col_idx`.
    pub fn column_update_count(&self, col_idx: u16) -> u64 {
        self.chain(col_idx).map_or(0, |c| c.update_count())
    }

    /// Committed deleted rows.
    pub fn delete_count(&self) -> u64 {
        self.core.read().deletes.delete_count()
    }

    // ------------------------------------------------------------------
    // Commit / abort application
    // ------------------------------------------------------------------

    /// Stamps `commit_ts` into every node owned by `txn` and advances the
    /// visibility watermark. The caller feeds the outcome to the block's
    /// delete listener.
    pub fn commit_txn(
        &self,
        txn: &Txn,
        commit_ts: u64,
        log_index: Option<LogIndex>,
    ) -> CommitOutcome {
        let mut outcome = CommitOutcome::default();
        {
            let mut core = self.core.write();
            for node in &mut core.appends {
                if node.state.apply_commit(txn.id(), commit_ts) {
                    node.log_index = log_index;
                    outcome
                        .committed_appends
                        .push((node.start_row, node.row_count));
                }
            }
            outcome.committed_deletes = core.deletes.commit_for(txn.id(), commit_ts, log_index);
            for chain in self.columns.iter() {
                chain.commit_for(txn.id(), commit_ts, log_index);
            }
        }
        self.advance_max_visible(commit_ts);
        outcome
    }

    /// Unlinks every node owned by `txn`. Aborted tail appends shrink the
    /// physical row count; aborted non-tail appends become dead rows.
    pub fn abort_txn(&self, txn: &Txn) -> AbortOutcome {
        let mut outcome = AbortOutcome::default();
        let mut core = self.core.write();
        let mut removed: SmallVec<[(u32, u32); 1]> = SmallVec::new();
        core.appends.retain(|n| {
            if n.state.owned_by(txn.id()) {
                removed.push((n.start_row, n.row_count));
                false
            } else {
                true
            }
        });
        let rows_after = core.total_rows();
        for (start, count) in &removed {
            if start + count <= rows_after {
                core.dead_rows.insert_range(*start..start + count);
            }
        }
        outcome.aborted_appends = removed;
        outcome.rows_after = rows_after;
        core.deletes.abort_for(txn.id());
        for chain in self.columns.iter() {
            chain.abort_for(txn.id());
        }
        outcome
    }

    // ------------------------------------------------------------------
    // Replay
    // ------------------------------------------------------------------

    /// Reinstates one committed append node covering `[0, rows)`.
    pub fn on_replay_append(&self, rows: u32, ckp_ts: u64) {
        let mut core = self.core.write();
        let node_id = self.next_id();
        core.appends.push(AppendNode {
            id: node_id,
            start_row: 0,
            row_count: rows,
            state: NodeTxn::committed(ckp_ts),
            log_index: None,
        });
    }

    /// Reinstates one committed column update node.
    pub fn on_replay_update(
        &self,
        col_idx: u16,
        mask: RoaringBitmap,
        values: HashMap<u32, Value>,
        ckp_ts: u64,
    ) -> Result<()> {
        let node_id = self.next_id();
        self.chain(col_idx)?.on_replay_node(node_id, mask, values, ckp_ts);
        Ok(())
    }

    /// Reinstates the merged committed delete node, returning its rows for
    /// the block's delete listener.
    pub fn on_replay_delete(&self, mask: RoaringBitmap, ckp_ts: u64) -> RoaringBitmap {
        let mut core = self.core.write();
        let node_id = self.next_id();
        core.deletes.on_replay_node(node_id, mask.clone(), ckp_ts);
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> MvccHandle {
        MvccHandle::new(2)
    }

    #[test]
    fn appends_are_contiguous_and_capped() {
        let h = handle();
        let t1 = Arc::new(Txn::new(1, 10));
        let a1 = h.create_append(&t1, 2, 4).unwrap();
        assert_eq!(a1.start_row, 0);
        let a2 = h.create_append(&t1, 2, 4).unwrap();
        assert_eq!(a2.start_row, 2);
        assert!(matches!(
            h.create_append(&t1, 1, 4),
            Err(BlockError::Full)
        ));
        assert_eq!(h.total_rows(), 4);
    }

    #[test]
    fn visible_rows_follow_commit() {
        let h = handle();
        let t1 = Arc::new(Txn::new(1, 10));
        h.create_append(&t1, 2, 8).unwrap();
        assert_eq!(h.visible_rows(100, None), (0, false));
        assert_eq!(h.visible_rows(100, Some(t1.as_ref())), (2, true));
        t1.apply_commit(20).unwrap();
        h.commit_txn(&t1, 20, None);
        assert_eq!(h.visible_rows(20, None), (2, true));
        assert_eq!(h.visible_rows(19, None), (0, false));
        assert_eq!(h.max_visible(), 20);
    }

    #[test]
    fn delete_then_update_is_not_found() {
        let h = handle();
        let t1 = Arc::new(Txn::new(1, 10));
        h.create_append(&t1, 2, 8).unwrap();
        t1.apply_commit(20).unwrap();
        h.commit_txn(&t1, 20, None);

        let t2 = Arc::new(Txn::new(2, 30));
        h.range_delete(&t2, 0, 0).unwrap();
        t2.apply_commit(40).unwrap();
        h.commit_txn(&t2, 40, None);

        let t3 = Arc::new(Txn::new(3, 50));
        assert!(matches!(
            h.update_fine(&t3, 0, 0, Value::Int64(9)),
            Err(BlockError::NotFound)
        ));
        // Row 1 is untouched.
        assert!(h.update_fine(&t3, 0, 1, Value::Int64(9)).is_ok());
    }

    #[test]
    fn double_delete_is_ww_conflict() {
        let h = handle();
        let t1 = Arc::new(Txn::new(1, 10));
        h.create_append(&t1, 2, 8).unwrap();
        t1.apply_commit(20).unwrap();
        h.commit_txn(&t1, 20, None);

        let t2 = Arc::new(Txn::new(2, 30));
        h.range_delete(&t2, 0, 1).unwrap();
        t2.apply_commit(40).unwrap();
        h.commit_txn(&t2, 40, None);

        let t3 = Arc::new(Txn::new(3, 50));
        assert!(matches!(
            h.range_delete(&t3, 1, 1),
            Err(BlockError::WWConflict)
        ));
    }

    #[test]
    fn delete_conflicts_with_in_flight_update() {
        let h = handle();
        let t1 = Arc::new(Txn::new(1, 10));
        h.create_append(&t1, 2, 8).unwrap();
        t1.apply_commit(20).unwrap();
        h.commit_txn(&t1, 20, None);

        let t2 = Arc::new(Txn::new(2, 30));
        h.update_fine(&t2, 1, 0, Value::Int64(5)).unwrap();
        let t3 = Arc::new(Txn::new(3, 30));
        assert!(matches!(
            h.range_delete(&t3, 0, 1),
            Err(BlockError::WWConflict)
        ));
    }

    #[test]
    fn coarse_and_fine_updates_agree() {
        let h = handle();
        let t1 = Arc::new(Txn::new(1, 10));
        h.create_append(&t1, 2, 8).unwrap();
        t1.apply_commit(20).unwrap();
        h.commit_txn(&t1, 20, None);

        let t2 = Arc::new(Txn::new(2, 30));
        h.update_coarse(&t2, 0, 0, Value::Int64(7)).unwrap();
        let t3 = Arc::new(Txn::new(3, 30));
        assert!(matches!(
            h.update_fine(&t3, 0, 0, Value::Int64(8)),
            Err(BlockError::WWConflict)
        ));
        assert!(matches!(
            h.update_coarse(&t3, 0, 0, Value::Int64(8)),
            Err(BlockError::WWConflict)
        ));
    }

    #[test]
    fn get_visible_update_respects_deletes() {
        let h = handle();
        let t1 = Arc::new(Txn::new(1, 10));
        h.create_append(&t1, 1, 8).unwrap();
        t1.apply_commit(20).unwrap();
        h.commit_txn(&t1, 20, None);

        let t2 = Arc::new(Txn::new(2, 30));
        h.update_fine(&t2, 0, 0, Value::Int64(11)).unwrap();
        t2.apply_commit(40).unwrap();
        h.commit_txn(&t2, 40, None);

        let reader = Txn::new(3, 50);
        assert_eq!(
            h.get_visible_update(&reader, 0, 0).unwrap(),
            Some(Value::Int64(11))
        );

        let t4 = Arc::new(Txn::new(4, 60));
        h.range_delete(&t4, 0, 0).unwrap();
        t4.apply_commit(70).unwrap();
        h.commit_txn(&t4, 70, None);
        let late = Txn::new(5, 80);
        assert!(matches!(
            h.get_visible_update(&late, 0, 0),
            Err(BlockError::NotFound)
        ));
        // An old snapshot still sees the update.
        let old = Txn::new(6, 50);
        assert_eq!(
            h.get_visible_update(&old, 0, 0).unwrap(),
            Some(Value::Int64(11))
        );
    }

    #[test]
    fn abort_truncates_tail_and_marks_holes() {
        let h = handle();
        let t1 = Arc::new(Txn::new(1, 10));
        h.create_append(&t1, 2, 8).unwrap();
        t1.apply_commit(20).unwrap();
        h.commit_txn(&t1, 20, None);

        // Tail abort: rows shrink back.
        let t2 = Arc::new(Txn::new(2, 30));
        h.create_append(&t2, 2, 8).unwrap();
        t2.apply_abort();
        let outcome = h.abort_txn(&t2);
        assert_eq!(outcome.rows_after, 2);
        assert_eq!(h.total_rows(), 2);

        // Hole abort: a later committed append keeps the tail, the aborted
        // range turns into dead rows.
        let t3 = Arc::new(Txn::new(3, 40));
        let t4 = Arc::new(Txn::new(4, 40));
        h.create_append(&t3, 2, 8).unwrap();
        h.create_append(&t4, 2, 8).unwrap();
        t4.apply_commit(50).unwrap();
        h.commit_txn(&t4, 50, None);
        t3.apply_abort();
        let outcome = h.abort_txn(&t3);
        assert_eq!(outcome.rows_after, 6);
        assert!(h.is_deleted(2, 100, None));
        assert!(h.is_deleted(3, 100, None));
        assert!(!h.is_row_visible(2, 100, None));
    }

    #[test]
    fn snapshot_collects_updates_and_deletes() {
        let h = handle();
        let t1 = Arc::new(Txn::new(1, 10));
        h.create_append(&t1, 3, 8).unwrap();
        t1.apply_commit(20).unwrap();
        h.commit_txn(&t1, 20, None);

        let t2 = Arc::new(Txn::new(2, 30));
        h.update_fine(&t2, 0, 1, Value::Int64(42)).unwrap();
        h.range_delete(&t2, 2, 2).unwrap();
        t2.apply_commit(40).unwrap();
        h.commit_txn(&t2, 40, None);

        let snap = h.collect_snapshot(40, None);
        assert_eq!(snap.visible_rows, 3);
        assert_eq!(snap.updates.len(), 1);
        assert_eq!(snap.updates[0].0, 0);
        assert!(snap.delete_mask.as_ref().unwrap().contains(2));

        let earlier = h.collect_snapshot(30, None);
        assert!(earlier.updates.is_empty());
        assert!(earlier.delete_mask.is_none());
    }

    #[test]
    fn range_changes_carry_log_indexes() {
        let h = handle();
        let t1 = Arc::new(Txn::new(1, 10));
        h.create_append(&t1, 2, 8).unwrap();
        t1.apply_commit(20).unwrap();
        h.commit_txn(&t1, 20, Some(LogIndex::new(5)));

        let t2 = Arc::new(Txn::new(2, 30));
        h.update_fine(&t2, 0, 0, Value::Int64(1)).unwrap();
        h.range_delete(&t2, 1, 1).unwrap();
        t2.apply_commit(40).unwrap();
        h.commit_txn(&t2, 40, Some(LogIndex::new(6)));

        let appends = h.collect_append_log_indexes(0, 100);
        assert_eq!(appends, vec![LogIndex::new(5)]);

        let changes = h.collect_changes_in_range(30, 50);
        assert_eq!(changes.updates.len(), 1);
        assert_eq!(changes.delete_log_indexes, vec![LogIndex::new(6)]);
        assert!(changes.delete_mask.unwrap().contains(1));
    }

    #[test]
    fn replay_reinstates_committed_state() {
        let h = handle();
        h.on_replay_append(4, 100);
        let mut mask = RoaringBitmap::new();
        mask.insert(1);
        let mut values = HashMap::new();
        values.insert(1u32, Value::Int64(7));
        h.on_replay_update(0, mask, values, 100).unwrap();
        let mut del = RoaringBitmap::new();
        del.insert(3);
        h.on_replay_delete(del, 100);
        h.advance_max_visible(100);

        assert_eq!(h.visible_rows(100, None), (4, true));
        let reader = Txn::new(1, 100);
        assert_eq!(
            h.get_visible_update(&reader, 1, 0).unwrap(),
            Some(Value::Int64(7))
        );
        assert!(matches!(
            h.get_visible_update(&reader, 3, 0),
            Err(BlockError::NotFound)
        ));
        assert_eq!(h.change_node_count(), 2);
        assert_eq!(h.column_update_count(0), 1);
        assert_eq!(h.delete_count(), 1);
    }
}
