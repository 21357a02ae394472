//! # Node Ownership and Visibility
//!
//! Every MVCC node (append, update, delete) is owned by its chain and
//! carries a [`NodeTxn`]: either a back-reference to the still-active
//! transaction that wrote it, or the commit timestamp once commit has been
//! applied. Visibility and conflict decisions read through this one type so
//! the three chain kinds agree on the rules:
//!
//! - an aborted writer's node is never visible and never conflicts
//! - a node is visible to its own transaction before commit
//! - otherwise a node is visible at `ts` iff its commit timestamp is known
//!   and `<= ts`

use std::sync::Arc;

use crate::txn::{Txn, TxnId};
use crate::wal::LogIndex;

#[derive(Debug, Clone)]
pub(crate) struct NodeTxn {
    txn: Option<Arc<Txn>>,
    commit_ts: u64,
}

impl NodeTxn {
    pub fn uncommitted(txn: Arc<Txn>) -> Self {
        Self {
            txn: Some(txn),
            commit_ts: 0,
        }
    }

    /// A node already known committed, e.g. reinstated during replay.
    pub fn committed(commit_ts: u64) -> Self {
        Self {
            txn: None,
            commit_ts,
        }
    }

    /// Commit timestamp if the writer has committed, observed either from
    /// applied state or through the live transaction.
    pub fn commit_ts(&self) -> Option<u64> {
        if self.commit_ts > 0 {
            return Some(self.commit_ts);
        }
        match &self.txn {
            Some(txn) if txn.is_committed() => Some(txn.commit_ts()),
            _ => None,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.commit_ts().is_some()
    }

    pub fn is_aborted(&self) -> bool {
        self.txn.as_ref().is_some_and(|t| t.is_aborted())
    }

    pub fn owner(&self) -> Option<TxnId> {
        self.txn.as_ref().map(|t| t.id())
    }

    pub fn owned_by(&self, txn_id: TxnId) -> bool {
        self.owner() == Some(txn_id)
    }

    /// In-flight from the point of view of another transaction: not
    /// committed and not aborted.
    pub fn is_in_flight(&self) -> bool {
        !self.is_aborted() && !self.is_committed()
    }

    pub fn visible_at(&self, ts: u64, reader: Option<&Txn>) -> bool {
        if self.is_aborted() {
            return false;
        }
        if let Some(reader) = reader {
            if self.owned_by(reader.id()) {
                return true;
            }
        }
        self.commit_ts().is_some_and(|cts| cts <= ts)
    }

    /// Stamps the commit timestamp and drops the transaction back-reference
    /// if this node belongs to `txn_id`. Returns whether it did.
    pub fn apply_commit(&mut self, txn_id: TxnId, commit_ts: u64) -> bool {
        if !self.owned_by(txn_id) {
            return false;
        }
        self.commit_ts = commit_ts;
        self.txn = None;
        true
    }
}

/// One logical batch of rows appended by a single transaction.
#[derive(Debug)]
pub struct AppendNode {
    pub(crate) id: u64,
    pub(crate) start_row: u32,
    pub(crate) row_count: u32,
    pub(crate) state: NodeTxn,
    pub(crate) log_index: Option<LogIndex>,
}

impl AppendNode {
    pub fn start_row(&self) -> u32 {
        self.start_row
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// One past the last row of this batch.
    pub fn end_row(&self) -> u32 {
        self.start_row + self.row_count
    }

    pub fn commit_ts(&self) -> Option<u64> {
        self.state.commit_ts()
    }

    pub fn log_index(&self) -> Option<LogIndex> {
        self.log_index
    }
}
