//! # Column Update Chains
//!
//! One chain per column, holding the update nodes written against that
//! column. Each node carries a row mask and the parallel new values for one
//! transaction's writes.
//!
//! ## Ordering
//!
//! Nodes sit in the chain in insertion order, which is not commit order:
//! two transactions may commit in the opposite order they wrote. Every fold
//! therefore sorts visible nodes by commit timestamp before applying them,
//! so the invariant "for any row, the update with the greatest commit
//! timestamp `<= T` wins" holds regardless of interleaving. A reader's own
//! uncommitted node sorts after everything committed: a transaction always
//! sees its own latest write.
//!
//! ## Locking
//!
//! The chain has its own reader-writer lock. The fine-grained update path
//! takes the handle read lock plus this chain's write lock; the coarse path
//! holds the handle write lock instead. Both end up here with the chain
//! lock held, so the conflict rules live in one place.

use hashbrown::HashMap;
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use std::sync::Arc;

use crate::error::{BlockError, Result};
use crate::mvcc::node::NodeTxn;
use crate::txn::{Txn, TxnId};
use crate::types::Value;
use crate::wal::LogIndex;

/// One transaction's updates to one column.
#[derive(Debug)]
pub struct UpdateNode {
    id: u64,
    mask: RoaringBitmap,
    values: HashMap<u32, Value>,
    state: NodeTxn,
    log_index: Option<LogIndex>,
}

impl UpdateNode {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn commit_ts(&self) -> Option<u64> {
        self.state.commit_ts()
    }

    pub fn row_count(&self) -> u64 {
        self.mask.len()
    }
}

#[derive(Default)]
struct ChainInner {
    nodes: Vec<UpdateNode>,
}

pub struct ColumnChain {
    col_idx: u16,
    inner: RwLock<ChainInner>,
}

impl ColumnChain {
    pub fn new(col_idx: u16) -> Self {
        Self {
            col_idx,
            inner: RwLock::new(ChainInner::default()),
        }
    }

    pub fn col_idx(&self) -> u16 {
        self.col_idx
    }

    /// Appends a node for `txn`, applies one cell update into it, and
    /// unlinks the node again if the update conflicts. This is the
    /// `add node + try update` sequence under one chain write lock.
    pub fn apply_update(
        &self,
        node_id: u64,
        txn: &Arc<Txn>,
        row: u32,
        value: Value,
    ) -> Result<u64> {
        let mut inner = self.inner.write();
        if let Err(err) = Self::check_row_conflict(&inner, row, txn) {
            return Err(err);
        }
        inner.nodes.push(UpdateNode {
            id: node_id,
            mask: RoaringBitmap::new(),
            values: HashMap::new(),
            state: NodeTxn::uncommitted(Arc::clone(txn)),
            log_index: None,
        });
        let node = inner.nodes.last_mut().expect("just pushed");
        node.mask.insert(row);
        node.values.insert(row, value);
        Ok(node_id)
    }

    fn check_row_conflict(inner: &ChainInner, row: u32, txn: &Txn) -> Result<()> {
        for node in &inner.nodes {
            if node.state.is_aborted() || !node.mask.contains(row) {
                continue;
            }
            if node.state.owned_by(txn.id()) {
                continue;
            }
            match node.state.commit_ts() {
                Some(cts) if cts <= txn.start_ts() => continue,
                _ => return Err(BlockError::WWConflict),
            }
        }
        Ok(())
    }

    /// Write-write check for a row range, used by the coarse update path and
    /// by range deletes. Updates committed at or before `ts` do not
    /// conflict; anything in flight or committed later does.
    pub fn check_not_updated(&self, start: u32, end: u32, ts: u64, writer: &Txn) -> Result<()> {
        let inner = self.inner.read();
        for node in &inner.nodes {
            if node.state.is_aborted() || node.state.owned_by(writer.id()) {
                continue;
            }
            if node.mask.range_cardinality(start..=end) == 0 {
                continue;
            }
            match node.state.commit_ts() {
                Some(cts) if cts <= ts => continue,
                _ => return Err(BlockError::WWConflict),
            }
        }
        Ok(())
    }

    /// Latest visible value of `row` at `ts`, or `None` when the base
    /// column holds the visible version.
    pub fn get_value(&self, row: u32, ts: u64, reader: Option<&Txn>) -> Option<Value> {
        let inner = self.inner.read();
        let mut best: Option<(u64, u64, &UpdateNode)> = None;
        for node in &inner.nodes {
            if !node.mask.contains(row) || !node.state.visible_at(ts, reader) {
                continue;
            }
            let sort_ts = Self::fold_ts(node, reader);
            if best.map_or(true, |(b_ts, b_id, _)| (sort_ts, node.id) > (b_ts, b_id)) {
                best = Some((sort_ts, node.id, node));
            }
        }
        best.and_then(|(_, _, node)| node.values.get(&row).cloned())
    }

    fn fold_ts(node: &UpdateNode, reader: Option<&Txn>) -> u64 {
        match node.state.commit_ts() {
            Some(cts) => cts,
            // Visible yet uncommitted means it is the reader's own write,
            // which supersedes every committed version.
            None => {
                debug_assert!(reader.is_some());
                u64::MAX
            }
        }
    }

    /// Folds the chain at `ts`: last writer wins by commit timestamp.
    pub fn collect_updates(
        &self,
        ts: u64,
        reader: Option<&Txn>,
    ) -> Option<(RoaringBitmap, HashMap<u32, Value>)> {
        let inner = self.inner.read();
        let mut visible: Vec<&UpdateNode> = inner
            .nodes
            .iter()
            .filter(|n| n.state.visible_at(ts, reader))
            .collect();
        if visible.is_empty() {
            return None;
        }
        visible.sort_by_key(|n| (Self::fold_ts(n, reader), n.id));
        let mut mask = RoaringBitmap::new();
        let mut values = HashMap::new();
        for node in visible {
            for row in &node.mask {
                mask.insert(row);
                if let Some(v) = node.values.get(&row) {
                    values.insert(row, v.clone());
                }
            }
        }
        Some((mask, values))
    }

    /// Folds updates committed within `[start_ts, end_ts]`, returning the
    /// mask, values, and the log indexes of the contributing nodes.
    pub fn collect_committed_in_range(
        &self,
        start_ts: u64,
        end_ts: u64,
    ) -> Option<(RoaringBitmap, HashMap<u32, Value>, Vec<LogIndex>)> {
        let inner = self.inner.read();
        let mut committed: Vec<(&UpdateNode, u64)> = inner
            .nodes
            .iter()
            .filter_map(|n| {
                n.state
                    .commit_ts()
                    .filter(|cts| *cts >= start_ts && *cts <= end_ts)
                    .map(|cts| (n, cts))
            })
            .collect();
        if committed.is_empty() {
            return None;
        }
        committed.sort_by_key(|(n, cts)| (*cts, n.id));
        let mut mask = RoaringBitmap::new();
        let mut values = HashMap::new();
        let mut indexes = Vec::new();
        for (node, _) in committed {
            for row in &node.mask {
                mask.insert(row);
                if let Some(v) = node.values.get(&row) {
                    values.insert(row, v.clone());
                }
            }
            if let Some(idx) = node.log_index {
                indexes.push(idx);
            }
        }
        Some((mask, values, indexes))
    }

    /// Number of distinct rows with a committed update, feeding the
    /// compaction score.
    pub fn update_count(&self) -> u64 {
        let inner = self.inner.read();
        let mut mask = RoaringBitmap::new();
        for node in &inner.nodes {
            if node.state.is_committed() {
                mask |= &node.mask;
            }
        }
        mask.len()
    }

    /// Non-aborted nodes in the chain.
    pub fn node_count(&self) -> usize {
        self.inner
            .read()
            .nodes
            .iter()
            .filter(|n| !n.state.is_aborted())
            .count()
    }

    /// Stamps `commit_ts` into this chain's nodes owned by `txn_id`.
    pub fn commit_for(&self, txn_id: TxnId, commit_ts: u64, log_index: Option<LogIndex>) -> bool {
        let mut inner = self.inner.write();
        let mut changed = false;
        for node in &mut inner.nodes {
            if node.state.apply_commit(txn_id, commit_ts) {
                node.log_index = log_index;
                changed = true;
            }
        }
        changed
    }

    /// Unlinks all nodes owned by `txn_id`.
    pub fn abort_for(&self, txn_id: TxnId) -> usize {
        let mut inner = self.inner.write();
        let before = inner.nodes.len();
        inner.nodes.retain(|n| !n.state.owned_by(txn_id));
        before - inner.nodes.len()
    }

    /// Reinstates a committed node during replay, bypassing conflict checks.
    pub fn on_replay_node(
        &self,
        node_id: u64,
        mask: RoaringBitmap,
        values: HashMap<u32, Value>,
        commit_ts: u64,
    ) {
        let mut inner = self.inner.write();
        inner.nodes.push(UpdateNode {
            id: node_id,
            mask,
            values,
            state: NodeTxn::committed(commit_ts),
            log_index: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed_txn(id: TxnId, start: u64, commit: u64) -> Arc<Txn> {
        let txn = Arc::new(Txn::new(id, start));
        txn.apply_commit(commit).unwrap();
        txn
    }

    #[test]
    fn last_writer_wins_by_commit_ts() {
        let chain = ColumnChain::new(0);
        // Written in one order, committed in the other.
        let t1 = Arc::new(Txn::new(1, 10));
        let t2 = Arc::new(Txn::new(2, 11));
        chain.apply_update(1, &t1, 0, Value::Int64(100)).unwrap();
        t1.apply_commit(50).unwrap();
        chain.commit_for(1, 50, None);
        chain.apply_update(2, &t2, 1, Value::Int64(200)).unwrap();
        t2.apply_commit(40).unwrap();
        chain.commit_for(2, 40, None);

        assert_eq!(chain.get_value(0, 60, None), Some(Value::Int64(100)));
        assert_eq!(chain.get_value(1, 60, None), Some(Value::Int64(200)));
        assert_eq!(chain.get_value(0, 45, None), None);
    }

    #[test]
    fn in_flight_update_conflicts() {
        let chain = ColumnChain::new(0);
        let t1 = Arc::new(Txn::new(1, 10));
        let t2 = Arc::new(Txn::new(2, 11));
        chain.apply_update(1, &t1, 0, Value::Int64(1)).unwrap();
        assert!(matches!(
            chain.apply_update(2, &t2, 0, Value::Int64(2)),
            Err(BlockError::WWConflict)
        ));
        // The rejected node must not linger in the chain.
        assert_eq!(chain.node_count(), 1);
    }

    #[test]
    fn aborted_writer_does_not_conflict() {
        let chain = ColumnChain::new(0);
        let t1 = Arc::new(Txn::new(1, 10));
        let t2 = Arc::new(Txn::new(2, 11));
        chain.apply_update(1, &t1, 0, Value::Int64(1)).unwrap();
        t1.apply_abort();
        chain.apply_update(2, &t2, 0, Value::Int64(2)).unwrap();
        assert_eq!(chain.get_value(0, 100, Some(t2.as_ref())), Some(Value::Int64(2)));
    }

    #[test]
    fn committed_after_start_conflicts() {
        let chain = ColumnChain::new(0);
        let t1 = committed_txn(1, 10, 50);
        chain.apply_update(1, &t1, 0, Value::Int64(1)).unwrap();
        chain.commit_for(1, 50, None);
        let late = Arc::new(Txn::new(2, 40));
        assert!(matches!(
            chain.apply_update(2, &late, 0, Value::Int64(2)),
            Err(BlockError::WWConflict)
        ));
        let fresh = Arc::new(Txn::new(3, 60));
        assert!(chain.apply_update(3, &fresh, 0, Value::Int64(3)).is_ok());
    }

    #[test]
    fn own_uncommitted_write_wins_for_reader() {
        let chain = ColumnChain::new(0);
        let t1 = committed_txn(1, 10, 50);
        chain.apply_update(1, &t1, 0, Value::Int64(1)).unwrap();
        chain.commit_for(1, 50, None);
        let t2 = Arc::new(Txn::new(2, 60));
        chain.apply_update(2, &t2, 0, Value::Int64(2)).unwrap();
        assert_eq!(chain.get_value(0, 60, Some(t2.as_ref())), Some(Value::Int64(2)));
        let other = Txn::new(3, 60);
        assert_eq!(chain.get_value(0, 60, Some(&other)), Some(Value::Int64(1)));
    }

    #[test]
    fn collect_updates_folds_at_ts() {
        let chain = ColumnChain::new(0);
        let t1 = Arc::new(Txn::new(1, 10));
        chain.apply_update(1, &t1, 0, Value::Int64(1)).unwrap();
        chain.apply_update(2, &t1, 1, Value::Int64(2)).unwrap();
        t1.apply_commit(50).unwrap();
        chain.commit_for(1, 50, None);
        chain.commit_for(2, 50, None);

        let (mask, values) = chain.collect_updates(50, None).unwrap();
        assert_eq!(mask.len(), 2);
        assert_eq!(values[&0], Value::Int64(1));
        assert!(chain.collect_updates(49, None).is_none());
    }

    #[test]
    fn collect_committed_in_range_bounds() {
        let chain = ColumnChain::new(0);
        for (id, commit) in [(1u64, 20u64), (2, 40), (3, 60)] {
            let txn = Arc::new(Txn::new(id, 10));
            chain
                .apply_update(id, &txn, id as u32, Value::Int64(id as i64))
                .unwrap();
            txn.apply_commit(commit).unwrap();
            chain.commit_for(id, commit, Some(LogIndex::new(id)));
        }
        let (mask, _, indexes) = chain.collect_committed_in_range(30, 60).unwrap();
        assert_eq!(mask.len(), 2);
        assert_eq!(indexes.len(), 2);
        assert!(chain.collect_committed_in_range(70, 90).is_none());
    }

    #[test]
    fn abort_unlinks_nodes() {
        let chain = ColumnChain::new(0);
        let t1 = Arc::new(Txn::new(1, 10));
        chain.apply_update(1, &t1, 0, Value::Int64(1)).unwrap();
        assert_eq!(chain.abort_for(1), 1);
        assert_eq!(chain.node_count(), 0);
    }

    #[test]
    fn update_count_only_counts_committed_rows() {
        let chain = ColumnChain::new(0);
        let t1 = Arc::new(Txn::new(1, 10));
        let t2 = Arc::new(Txn::new(2, 10));
        chain.apply_update(1, &t1, 0, Value::Int64(1)).unwrap();
        chain.apply_update(2, &t2, 1, Value::Int64(2)).unwrap();
        t1.apply_commit(50).unwrap();
        chain.commit_for(1, 50, None);
        assert_eq!(chain.update_count(), 1);
    }
}
