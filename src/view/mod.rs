//! # Column and Block Views
//!
//! A view materialises the logical content of a column (or a whole block)
//! at one timestamp by layering three inputs:
//!
//! 1. the **base vector** (buffer window or loaded column file)
//! 2. the **update overlay**: row mask plus parallel new values
//! 3. the **delete mask**
//!
//! `eval` applies the overlay onto the base; the delete mask stays separate
//! so callers like dedup can probe "exists and not deleted" without paying
//! for row compaction. `materialize` additionally drops deleted rows,
//! yielding the final vector a scan consumes.

use hashbrown::HashMap;
use roaring::RoaringBitmap;

use crate::error::{BlockError, Result};
use crate::types::{Batch, ColumnVector, Value};
use crate::wal::LogIndex;

/// One column at one timestamp.
#[derive(Debug)]
pub struct ColumnView {
    pub ts: u64,
    pub col_idx: u16,
    pub raw: Option<ColumnVector>,
    pub update_mask: Option<RoaringBitmap>,
    pub update_vals: Option<HashMap<u32, Value>>,
    pub delete_mask: Option<RoaringBitmap>,
    pub applied: Option<ColumnVector>,
}

impl ColumnView {
    pub fn new(ts: u64, col_idx: u16) -> Self {
        Self {
            ts,
            col_idx,
            raw: None,
            update_mask: None,
            update_vals: None,
            delete_mask: None,
            applied: None,
        }
    }

    pub fn set_updates(&mut self, mask: RoaringBitmap, vals: HashMap<u32, Value>) {
        self.update_mask = Some(mask);
        self.update_vals = Some(vals);
    }

    /// Applies the update overlay onto the base vector. With `apply` false
    /// the base is passed through untouched (callers that only need the
    /// delete mask skip the copy work).
    pub fn eval(&mut self, apply: bool) -> Result<()> {
        let Some(raw) = &self.raw else {
            return Err(BlockError::internal("eval without a base vector"));
        };
        if !apply {
            self.applied = Some(raw.clone());
            return Ok(());
        }
        let mut applied = raw.clone();
        if let (Some(mask), Some(vals)) = (&self.update_mask, &self.update_vals) {
            for row in mask {
                if (row as usize) < applied.len() {
                    let value = vals
                        .get(&row)
                        .cloned()
                        .ok_or_else(|| BlockError::internal("update mask without value"))?;
                    applied.set(row as usize, value)?;
                }
            }
        }
        self.applied = Some(applied);
        Ok(())
    }

    /// The evaluated vector with deleted rows removed.
    pub fn materialize(&self) -> Result<ColumnVector> {
        let applied = self
            .applied
            .as_ref()
            .ok_or_else(|| BlockError::internal("materialize before eval"))?;
        Ok(match &self.delete_mask {
            Some(mask) => applied.filter_deleted(mask),
            None => applied.clone(),
        })
    }

    /// Cell at `row` after the overlay, `NotFound` if deleted or absent.
    pub fn value(&self, row: u32) -> Result<Value> {
        if self
            .delete_mask
            .as_ref()
            .is_some_and(|m| m.contains(row))
        {
            return Err(BlockError::NotFound);
        }
        if let Some(vals) = &self.update_vals {
            if let Some(v) = vals.get(&row) {
                return Ok(v.clone());
            }
        }
        self.raw
            .as_ref()
            .and_then(|r| r.get(row as usize))
            .ok_or(BlockError::NotFound)
    }

    pub fn row_count(&self) -> usize {
        self.raw.as_ref().map_or(0, |r| r.len())
    }
}

/// All columns of a block at one timestamp, plus the log indexes gathered
/// from each chain for range-change queries.
#[derive(Debug)]
pub struct BlockView {
    pub ts: u64,
    pub raw: Option<Batch>,
    pub update_masks: HashMap<u16, RoaringBitmap>,
    pub update_vals: HashMap<u16, HashMap<u32, Value>>,
    pub delete_mask: Option<RoaringBitmap>,
    pub col_log_indexes: HashMap<u16, Vec<LogIndex>>,
    pub delete_log_indexes: Vec<LogIndex>,
}

impl BlockView {
    pub fn new(ts: u64) -> Self {
        Self {
            ts,
            raw: None,
            update_masks: HashMap::new(),
            update_vals: HashMap::new(),
            delete_mask: None,
            col_log_indexes: HashMap::new(),
            delete_log_indexes: Vec::new(),
        }
    }

    pub fn set_column_updates(
        &mut self,
        col_idx: u16,
        mask: RoaringBitmap,
        vals: HashMap<u32, Value>,
    ) {
        self.update_masks.insert(col_idx, mask);
        self.update_vals.insert(col_idx, vals);
    }

    /// Evaluated view of one column, built from the shared raw batch.
    pub fn column_view(&self, col_idx: u16) -> Result<ColumnView> {
        let mut view = ColumnView::new(self.ts, col_idx);
        view.raw = self
            .raw
            .as_ref()
            .and_then(|b| b.column(col_idx as usize))
            .cloned();
        if let (Some(mask), Some(vals)) = (
            self.update_masks.get(&col_idx),
            self.update_vals.get(&col_idx),
        ) {
            view.set_updates(mask.clone(), vals.clone());
        }
        view.delete_mask = self.delete_mask.clone();
        if view.raw.is_some() {
            view.eval(true)?;
        }
        Ok(view)
    }
}
