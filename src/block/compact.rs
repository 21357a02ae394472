//! # Compaction Scoring and Task Factory
//!
//! An external scheduler polls every block for a score and enqueues the
//! returned task factory when a block wins. The score is a heuristic over
//! the block's mutation state:
//!
//! - a **full appendable** block scores 100: a definitive flush candidate
//! - a block with **no update or delete nodes** scores 0; there is nothing
//!   to fold, and partial appendable buffers wait for fullness
//! - otherwise the per-column update ratios pass through a piecewise
//!   amplifier (low ratios weigh 10x, mid 20x, high 40x) and the delete
//!   ratio adds with weight 50; the scaled factor is floored at 1 so blocks
//!   with tiny change ratios still get scheduled eventually
//!
//! A `nice` age adder increments on every calibration tick with a non-zero
//! raw score and resets once the raw score returns to 0, pushing
//! long-standing low-activity blocks up the queue.

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use crate::block::Block;
use crate::catalog::{BlockId, BlockMeta};
use crate::config::{
    SCORE_COL_MULT_HIGH, SCORE_COL_MULT_LOW, SCORE_COL_MULT_MID, SCORE_COL_RATIO_HIGH,
    SCORE_COL_RATIO_LOW, SCORE_DELETE_WEIGHT, SCORE_FULL, SCORE_SCALE,
};
use crate::txn::Txn;

/// Which compaction variant a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionKind {
    /// Rewrite a sealed block, folding its deltas into new base columns.
    CompactBlock,
    /// Flush an appendable block's in-memory buffer into a sealed block.
    CompactABlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    DataCompaction,
}

/// A concrete compaction job description handed to the scheduler's worker.
#[derive(Debug, Clone)]
pub struct CompactionTask {
    pub kind: CompactionKind,
    pub block: BlockId,
    pub txn_id: u64,
}

/// Deferred constructor for a compaction job. The external scheduler runs
/// it with the transaction that will install the replacement block.
pub struct CompactionTaskFactory {
    kind: CompactionKind,
    meta: Arc<BlockMeta>,
}

impl CompactionTaskFactory {
    pub fn kind(&self) -> CompactionKind {
        self.kind
    }

    pub fn build(&self, txn: &Arc<Txn>) -> CompactionTask {
        CompactionTask {
            kind: self.kind,
            block: self.meta.id(),
            txn_id: txn.id(),
        }
    }
}

fn piecewise(ratio: f64) -> f64 {
    // Checked in order: a ratio exactly at the low threshold takes the
    // first branch.
    if ratio < SCORE_COL_RATIO_LOW {
        ratio * SCORE_COL_MULT_LOW
    } else if ratio < SCORE_COL_RATIO_HIGH {
        ratio * SCORE_COL_MULT_MID
    } else {
        ratio * SCORE_COL_MULT_HIGH
    }
}

impl Block {
    /// Raw mutation score; see the module docs for the shape.
    pub fn estimate_raw_score(&self) -> usize {
        let rows = self.rows(None, true);
        let appendable = self.meta().is_appendable();
        if appendable && rows == self.meta().block_max_rows() {
            return SCORE_FULL;
        }
        // No update/delete nodes means nothing to fold, for sealed blocks
        // and for appendable blocks alike; partial appendable buffers wait
        // for fullness rather than being scheduled at score 1.
        if self.total_changes() == 0 {
            return 0;
        }
        let rows = rows.max(1) as f64;
        let cols = self.meta().schema().column_count();
        let mut factor = 0.0;
        for i in 0..cols {
            let cnt = self.mvcc().column_update_count(i as u16) as f64;
            factor += piecewise(cnt / rows);
        }
        factor /= cols as f64;
        factor += self.mvcc().delete_count() as f64 / rows * SCORE_DELETE_WEIGHT;
        let score = (factor * SCORE_SCALE) as usize;
        score.max(1)
    }

    /// Calibration tick: age blocks that keep a non-zero raw score.
    pub fn run_calibration(&self) {
        if self.estimate_raw_score() == 0 {
            return;
        }
        self.bump_nice();
    }

    /// Effective score: raw score plus the `nice` age adder.
    pub fn estimate_score(&self) -> usize {
        let appendable = self.meta().is_appendable();
        if appendable && self.rows(None, true) == self.meta().block_max_rows() {
            if self.meta().is_dropped_committed() || self.meta().is_dropped_uncommitted() {
                return 0;
            }
            return SCORE_FULL;
        }
        let score = self.estimate_raw_score();
        if score == 0 {
            self.reset_nice();
            return 0;
        }
        score + self.nice() as usize
    }

    /// Chooses the compaction variant and returns the factory plus its
    /// scope. Refuses (returns `None`) when the block is dropped or a DDL
    /// transaction is active on it.
    pub fn build_compaction_task_factory(
        &self,
    ) -> Option<(CompactionTaskFactory, TaskKind, SmallVec<[BlockId; 1]>)> {
        let dropped = self.meta().is_dropped_committed();
        let in_txn = self.meta().has_active_txn();
        if dropped || in_txn {
            return None;
        }
        let kind = if self.meta().is_appendable() {
            CompactionKind::CompactABlock
        } else {
            CompactionKind::CompactBlock
        };
        let factory = CompactionTaskFactory {
            kind,
            meta: Arc::clone(self.meta()),
        };
        let scopes = smallvec![self.meta().id()];
        Some((factory, TaskKind::DataCompaction, scopes))
    }
}
