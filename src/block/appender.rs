//! # Block Appender
//!
//! The writer handle the external appender drives. Appends are serialized
//! per block: the appender takes the block's append lock, writes the rows
//! into the buffer at the tail, installs the append node, and upserts the
//! new keys into the PK index in one critical section, so the buffer offset
//! and the node's row range always agree.
//!
//! When the schema carries a hidden-key column the appender fills it: each
//! row's cell packs segment, block, and its final row offset.

use std::sync::Arc;

use crate::block::Block;
use crate::error::{BlockError, Result};
use crate::mvcc::AppendHandle;
use crate::schema::encode_hidden_key;
use crate::txn::Txn;
use crate::types::{Batch, Value};

pub struct BlockAppender<'a> {
    block: &'a Block,
}

impl<'a> BlockAppender<'a> {
    pub(crate) fn new(block: &'a Block) -> Self {
        Self { block }
    }

    /// Rows still available before the block is full.
    pub fn left_space(&self) -> u32 {
        let max = self.block.meta().block_max_rows();
        max.saturating_sub(self.block.rows(None, true))
    }

    pub fn is_full(&self) -> bool {
        self.left_space() == 0
    }

    /// Appends `batch` for `txn`. The returned handle's commit timestamp is
    /// filled when the transaction commits.
    pub fn append(&self, txn: &Arc<Txn>, batch: &Batch) -> Result<AppendHandle> {
        let block = self.block;
        let schema = block.meta().schema();
        if batch.column_count() != schema.column_count() {
            return Err(BlockError::internal(format!(
                "append batch has {} columns, schema has {}",
                batch.column_count(),
                schema.column_count()
            )));
        }
        if batch.row_count() == 0 {
            return Err(BlockError::internal("append of empty batch"));
        }

        let node = block.appendable_node()?;
        let _serial = block.append_lock().lock();
        node.do_with_pin(|| {
            let batch = self.fill_hidden_key(batch)?;
            let start = node.append(&batch)?;
            let handle = match block.mvcc().create_append(
                txn,
                batch.row_count() as u32,
                block.meta().block_max_rows(),
            ) {
                Ok(handle) => handle,
                Err(err) => {
                    // The buffer write must not outlive a rejected node.
                    node.truncate(start);
                    return Err(err);
                }
            };
            if handle.start_row != start {
                node.truncate(start);
                return Err(BlockError::internal(format!(
                    "append offset drift: buffer {start}, mvcc {}",
                    handle.start_row
                )));
            }
            self.upsert_index(&batch, start)?;
            Ok(handle)
        })
    }

    /// Overwrites the hidden-key column (if any) with packed
    /// segment/block/row cells.
    fn fill_hidden_key(&self, batch: &Batch) -> Result<Batch> {
        let schema = self.block.meta().schema();
        let Some(hidden_idx) = schema.hidden_key_idx() else {
            return Ok(batch.clone());
        };
        let id = self.block.meta().id();
        let start = self.block.rows(None, true);
        let mut filled = batch.clone();
        let col = filled
            .column_mut(hidden_idx)
            .ok_or_else(|| BlockError::internal("hidden key column missing from batch"))?;
        for i in 0..batch.row_count() {
            col.set(
                i,
                Value::UInt64(encode_hidden_key(id.segment, id.block, start + i as u32)),
            )?;
        }
        Ok(filled)
    }

    fn upsert_index(&self, batch: &Batch, start: u32) -> Result<()> {
        let schema = self.block.meta().schema();
        if !schema.has_sort_key() {
            return Ok(());
        }
        let mut sort_cols = Vec::with_capacity(schema.sort_key_idxs().len());
        for idx in schema.sort_key_idxs() {
            sort_cols.push(
                batch
                    .column(*idx)
                    .ok_or_else(|| BlockError::internal("sort key column missing from batch"))?
                    .clone(),
            );
        }
        let mut keys = Vec::with_capacity(batch.row_count());
        for row in 0..batch.row_count() as u32 {
            keys.push(Block::row_key(&sort_cols, row)?);
        }
        self.block.index_batch_upsert(&keys, start)
    }
}
