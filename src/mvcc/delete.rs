//! # Delete Chain
//!
//! One chain per block holding delete nodes. Each node owns a row set
//! written by one transaction (or merged from disk during replay). The
//! chain lives inside the MVCC handle's core and is always accessed under
//! the handle lock, so it carries no lock of its own.
//!
//! A row is deleted at `T` iff some visible delete node covers it at `T`.

use roaring::RoaringBitmap;
use std::sync::Arc;

use crate::error::{BlockError, Result};
use crate::mvcc::node::NodeTxn;
use crate::txn::{Txn, TxnId};
use crate::wal::LogIndex;

/// One transaction's deletes, or one merged replayed node.
#[derive(Debug)]
pub struct DeleteNode {
    id: u64,
    mask: RoaringBitmap,
    state: NodeTxn,
    log_index: Option<LogIndex>,
}

impl DeleteNode {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mask(&self) -> &RoaringBitmap {
        &self.mask
    }

    pub fn commit_ts(&self) -> Option<u64> {
        self.state.commit_ts()
    }
}

#[derive(Default)]
pub struct DeleteChain {
    nodes: Vec<DeleteNode>,
}

impl DeleteChain {
    /// Appends an uncommitted node owned by `txn`.
    pub fn add_node(&mut self, node_id: u64, txn: &Arc<Txn>) -> u64 {
        self.nodes.push(DeleteNode {
            id: node_id,
            mask: RoaringBitmap::new(),
            state: NodeTxn::uncommitted(Arc::clone(txn)),
            log_index: None,
        });
        node_id
    }

    /// Records `[start, end]` into the node created by `add_node`.
    pub fn range_delete(&mut self, node_id: u64, start: u32, end: u32) -> Result<()> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| BlockError::internal(format!("delete node {node_id} not found")))?;
        node.mask.insert_range(start..=end);
        Ok(())
    }

    /// Write-write check: fails with `NotFound` when the range is already
    /// deleted as of `ts`, with `WWConflict` when an in-flight or
    /// later-committed transaction covers it. Callers that are themselves
    /// deleting map `NotFound` to `WWConflict`.
    pub fn check_not_deleted(&self, start: u32, end: u32, ts: u64, writer: &Txn) -> Result<()> {
        for node in &self.nodes {
            if node.state.is_aborted() || node.state.owned_by(writer.id()) {
                continue;
            }
            if node.mask.range_cardinality(start..=end) == 0 {
                continue;
            }
            match node.state.commit_ts() {
                Some(cts) if cts <= ts => return Err(BlockError::NotFound),
                _ => return Err(BlockError::WWConflict),
            }
        }
        Ok(())
    }

    /// Whether `row` is deleted at `ts` from `reader`'s point of view.
    pub fn is_deleted(&self, row: u32, ts: u64, reader: Option<&Txn>) -> bool {
        self.nodes
            .iter()
            .any(|n| n.mask.contains(row) && n.state.visible_at(ts, reader))
    }

    /// Merged delete mask visible at `ts`. With `reader` set, the reader's
    /// own uncommitted deletes are included.
    pub fn collect_deletes(&self, ts: u64, reader: Option<&Txn>) -> Option<RoaringBitmap> {
        let mut mask = RoaringBitmap::new();
        for node in &self.nodes {
            if node.state.visible_at(ts, reader) {
                mask |= &node.mask;
            }
        }
        if mask.is_empty() {
            None
        } else {
            Some(mask)
        }
    }

    /// Deletes committed within `[start_ts, end_ts]` plus their log indexes.
    pub fn collect_in_range(
        &self,
        start_ts: u64,
        end_ts: u64,
    ) -> (Option<RoaringBitmap>, Vec<LogIndex>) {
        let mut mask = RoaringBitmap::new();
        let mut indexes = Vec::new();
        for node in &self.nodes {
            let Some(cts) = node.state.commit_ts() else {
                continue;
            };
            if cts < start_ts || cts > end_ts {
                continue;
            }
            mask |= &node.mask;
            if let Some(idx) = node.log_index {
                indexes.push(idx);
            }
        }
        if mask.is_empty() {
            (None, indexes)
        } else {
            (Some(mask), indexes)
        }
    }

    /// Number of committed deleted rows, feeding the compaction score.
    pub fn delete_count(&self) -> u64 {
        let mut mask = RoaringBitmap::new();
        for node in &self.nodes {
            if node.state.is_committed() {
                mask |= &node.mask;
            }
        }
        mask.len()
    }

    /// Non-aborted nodes in the chain.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.state.is_aborted()).count()
    }

    /// Stamps `commit_ts` into nodes owned by `txn_id` and returns the rows
    /// they delete, for the block's delete listener.
    pub fn commit_for(
        &mut self,
        txn_id: TxnId,
        commit_ts: u64,
        log_index: Option<LogIndex>,
    ) -> Option<RoaringBitmap> {
        let mut rows = RoaringBitmap::new();
        for node in &mut self.nodes {
            if node.state.apply_commit(txn_id, commit_ts) {
                node.log_index = log_index;
                rows |= &node.mask;
            }
        }
        if rows.is_empty() {
            None
        } else {
            Some(rows)
        }
    }

    /// Unlinks all nodes owned by `txn_id`.
    pub fn abort_for(&mut self, txn_id: TxnId) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|n| !n.state.owned_by(txn_id));
        before - self.nodes.len()
    }

    /// Reinstates one merged committed node during replay.
    pub fn on_replay_node(&mut self, node_id: u64, mask: RoaringBitmap, commit_ts: u64) {
        self.nodes.push(DeleteNode {
            id: node_id,
            mask,
            state: NodeTxn::committed(commit_ts),
            log_index: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_delete_marks_rows() {
        let mut chain = DeleteChain::default();
        let txn = Arc::new(Txn::new(1, 10));
        chain.add_node(1, &txn);
        chain.range_delete(1, 2, 4).unwrap();
        assert!(chain.is_deleted(3, 100, Some(txn.as_ref())));
        // Invisible to others until commit.
        assert!(!chain.is_deleted(3, 100, None));
        txn.apply_commit(50).unwrap();
        assert!(chain.is_deleted(3, 50, None));
        assert!(!chain.is_deleted(3, 49, None));
    }

    #[test]
    fn check_not_deleted_distinguishes_visible_and_conflicting() {
        let mut chain = DeleteChain::default();
        let t1 = Arc::new(Txn::new(1, 10));
        chain.add_node(1, &t1);
        chain.range_delete(1, 0, 0).unwrap();

        // In-flight from another txn: conflict.
        let t2 = Txn::new(2, 20);
        assert!(matches!(
            chain.check_not_deleted(0, 0, 20, &t2),
            Err(BlockError::WWConflict)
        ));

        t1.apply_commit(30).unwrap();
        // Committed after my snapshot: conflict.
        let t3 = Txn::new(3, 25);
        assert!(matches!(
            chain.check_not_deleted(0, 0, 25, &t3),
            Err(BlockError::WWConflict)
        ));
        // Committed before my snapshot: the row is just gone.
        let t4 = Txn::new(4, 40);
        assert!(matches!(
            chain.check_not_deleted(0, 0, 40, &t4),
            Err(BlockError::NotFound)
        ));
        // Disjoint range passes.
        assert!(chain.check_not_deleted(5, 9, 40, &t4).is_ok());
    }

    #[test]
    fn collect_deletes_merges_visible_nodes() {
        let mut chain = DeleteChain::default();
        let t1 = Arc::new(Txn::new(1, 10));
        chain.add_node(1, &t1);
        chain.range_delete(1, 0, 1).unwrap();
        t1.apply_commit(20).unwrap();
        chain.commit_for(1, 20, None);

        let t2 = Arc::new(Txn::new(2, 30));
        chain.add_node(2, &t2);
        chain.range_delete(2, 5, 5).unwrap();

        let mask = chain.collect_deletes(30, None).unwrap();
        assert_eq!(mask.len(), 2);
        let with_own = chain.collect_deletes(30, Some(t2.as_ref())).unwrap();
        assert_eq!(with_own.len(), 3);
        assert!(chain.collect_deletes(19, None).is_none());
    }

    #[test]
    fn commit_for_returns_deleted_rows() {
        let mut chain = DeleteChain::default();
        let txn = Arc::new(Txn::new(1, 10));
        chain.add_node(1, &txn);
        chain.range_delete(1, 3, 4).unwrap();
        txn.apply_commit(20).unwrap();
        let rows = chain.commit_for(1, 20, Some(LogIndex::new(9))).unwrap();
        assert!(rows.contains(3) && rows.contains(4));
        assert_eq!(chain.delete_count(), 2);
        let (mask, indexes) = chain.collect_in_range(20, 20);
        assert_eq!(mask.unwrap().len(), 2);
        assert_eq!(indexes.len(), 1);
    }

    #[test]
    fn abort_unlinks_nodes() {
        let mut chain = DeleteChain::default();
        let txn = Arc::new(Txn::new(1, 10));
        chain.add_node(1, &txn);
        chain.range_delete(1, 0, 9).unwrap();
        assert_eq!(chain.abort_for(1), 1);
        assert_eq!(chain.node_count(), 0);
        assert!(!chain.is_deleted(5, 100, None));
    }
}
