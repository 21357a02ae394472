//! # Appendable Node
//!
//! The in-memory row buffer of an active block. Rows land here at append
//! time, before their transactions commit; the buffer is the base-column
//! source for every read on an appendable block.
//!
//! ## Residency
//!
//! The node registers with the buffer manager and may only be touched while
//! pinned (`do_with_pin`). Under memory pressure the manager unloads it:
//! the buffer is flushed through the column file set (all physical rows,
//! with `read_ts` set to the visibility watermark) and dropped; the next
//! pin reloads it from the same files.
//!
//! ## Flush Contract
//!
//! `on_unload` persists the full physical buffer. Rows of transactions that
//! were still in flight at flush time are covered by the external WAL; the
//! recovery row count is therefore `max(file rows, mvcc rows)` as surfaced
//! by the block's `rows_on_replay`.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::buffer::{BufferManager, PinnableNode};
use crate::error::{BlockError, Result};
use crate::file::BlockFile;
use crate::mvcc::MvccHandle;
use crate::schema::Schema;
use crate::txn::Txn;
use crate::types::{Batch, ColumnVector, Value};

struct NodeState {
    data: Option<Batch>,
    rows: u32,
    dirty: bool,
}

pub struct AppendableNode {
    key: u64,
    schema: Arc<Schema>,
    file: Arc<BlockFile>,
    mvcc: Arc<MvccHandle>,
    buffer: Arc<BufferManager>,
    state: RwLock<NodeState>,
}

impl AppendableNode {
    pub fn new(
        key: u64,
        schema: Arc<Schema>,
        file: Arc<BlockFile>,
        mvcc: Arc<MvccHandle>,
        buffer: Arc<BufferManager>,
    ) -> Arc<Self> {
        let node = Arc::new(Self {
            key,
            schema,
            file,
            mvcc,
            buffer,
            state: RwLock::new(NodeState {
                data: None,
                rows: 0,
                dirty: false,
            }),
        });
        node.buffer
            .register(Arc::clone(&node) as Arc<dyn PinnableNode>);
        node
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    /// Physical rows with `coarse`, rows visible to `txn` otherwise.
    pub fn rows(&self, txn: Option<&Txn>, coarse: bool) -> u32 {
        if coarse {
            return self.state.read().rows;
        }
        let ts = txn.map_or(self.mvcc.max_visible(), |t| t.start_ts());
        self.mvcc.visible_rows(ts, txn).0
    }

    /// Runs `f` with the buffer guaranteed resident.
    pub fn do_with_pin<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let _pin = self.buffer.pin(self.key)?;
        f()
    }

    /// Appends `batch` at the buffer tail, returning the start row. Caller
    /// holds a pin and the block's append serialization.
    pub fn append(&self, batch: &Batch) -> Result<u32> {
        for (idx, col) in batch.columns().iter().enumerate() {
            let expected = self
                .schema
                .data_type(idx)
                .ok_or_else(|| BlockError::internal(format!("batch column {idx} beyond schema")))?;
            if col.data_type() != expected {
                return Err(BlockError::internal(format!(
                    "batch column {idx} is {:?}, schema says {expected:?}",
                    col.data_type()
                )));
            }
        }
        let mut state = self.state.write();
        let start = state.rows;
        let count = batch.row_count() as u32;
        if start + count > self.schema.block_max_rows() {
            return Err(BlockError::Full);
        }
        state
            .data
            .as_mut()
            .ok_or_else(|| BlockError::internal("append on unloaded node"))?
            .extend_from(batch)?;
        state.rows = start + count;
        state.dirty = true;
        Ok(start)
    }

    /// Shrinks the buffer after a tail append abort.
    pub fn truncate(&self, rows: u32) {
        let mut state = self.state.write();
        if rows >= state.rows {
            return;
        }
        if let Some(data) = state.data.as_mut() {
            data.truncate(rows as usize);
        }
        state.rows = rows;
        state.dirty = true;
    }

    /// Runs `f` against the column's resident vector; only the first
    /// `up_to` rows are meaningful to the caller. Caller holds a pin.
    pub fn with_vector_view<R>(
        &self,
        up_to: u32,
        col_idx: usize,
        f: impl FnOnce(&ColumnVector, usize) -> R,
    ) -> Result<R> {
        let state = self.state.read();
        let data = state
            .data
            .as_ref()
            .ok_or_else(|| BlockError::internal("vector view on unloaded node"))?;
        let col = data
            .column(col_idx)
            .ok_or_else(|| BlockError::internal(format!("no column {col_idx}")))?;
        Ok(f(col, (up_to as usize).min(col.len())))
    }

    /// Owned copy of the first `up_to` rows of a column. Caller holds a pin.
    pub fn get_vector_copy(&self, up_to: u32, col_idx: usize) -> Result<ColumnVector> {
        self.with_vector_view(up_to, col_idx, |col, rows| col.window(0, rows))
    }

    /// Single cell read. Caller holds a pin.
    pub fn value_at(&self, row: u32, col_idx: usize) -> Result<Value> {
        let state = self.state.read();
        let data = state
            .data
            .as_ref()
            .ok_or_else(|| BlockError::internal("cell read on unloaded node"))?;
        data.value(row as usize, col_idx).ok_or(BlockError::NotFound)
    }

    /// Flushes the buffer through the column file set if dirty.
    pub fn on_unload(&self) -> Result<()> {
        let mut state = self.state.write();
        if !state.dirty {
            return Ok(());
        }
        let data = state
            .data
            .as_ref()
            .ok_or_else(|| BlockError::internal("flush of unloaded node"))?;
        let ts = self.mvcc.max_visible();
        self.file.flush(data, state.rows as u64, ts)?;
        state.dirty = false;
        debug!(key = self.key, ts, "flushed appendable node");
        Ok(())
    }

    /// Flush (if dirty) without releasing the buffer; used on destroy.
    pub fn close(&self) -> Result<()> {
        self.on_unload()
    }
}

impl PinnableNode for AppendableNode {
    fn node_key(&self) -> u64 {
        self.key
    }

    fn mem_size(&self) -> usize {
        self.state
            .read()
            .data
            .as_ref()
            .map_or(0, |d| d.mem_size())
    }

    fn is_loaded(&self) -> bool {
        self.state.read().data.is_some()
    }

    fn load(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.data.is_some() {
            return Ok(());
        }
        let types = self.schema.types();
        let batch = if self.file.read_rows() > 0 {
            self.file.load_batch(&types)?
        } else {
            Batch::empty(&types)
        };
        state.rows = batch.row_count() as u32;
        state.data = Some(batch);
        state.dirty = false;
        Ok(())
    }

    fn unload(&self) -> Result<()> {
        self.on_unload()?;
        let mut state = self.state.write();
        state.data = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::SegmentFile;
    use crate::schema::ColDef;
    use crate::types::DataType;
    use tempfile::tempdir;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(
                "t",
                vec![
                    ColDef {
                        name: "pk".into(),
                        data_type: DataType::Int64,
                        idx: 0,
                    },
                    ColDef {
                        name: "v".into(),
                        data_type: DataType::Int64,
                        idx: 1,
                    },
                ],
                &[0],
                None,
                4,
            )
            .unwrap(),
        )
    }

    fn int_col(vals: &[i64]) -> ColumnVector {
        let mut c = ColumnVector::new(DataType::Int64);
        for v in vals {
            c.push(Value::Int64(*v)).unwrap();
        }
        c
    }

    fn setup() -> (tempfile::TempDir, Arc<AppendableNode>, Arc<MvccHandle>) {
        let dir = tempdir().unwrap();
        let seg = SegmentFile::open(dir.path(), 1).unwrap();
        let file = seg.open_block(1, 2).unwrap();
        let mvcc = Arc::new(MvccHandle::new(2));
        let buffer = Arc::new(BufferManager::with_default_budget());
        let node = AppendableNode::new(1, schema(), file, Arc::clone(&mvcc), buffer);
        (dir, node, mvcc)
    }

    #[test]
    fn append_under_pin_grows_rows() {
        let (_dir, node, _mvcc) = setup();
        let batch = Batch::new(vec![int_col(&[1, 2]), int_col(&[10, 20])]).unwrap();
        let start = node.do_with_pin(|| node.append(&batch)).unwrap();
        assert_eq!(start, 0);
        assert_eq!(node.rows(None, true), 2);
        let v = node
            .do_with_pin(|| node.value_at(1, 1))
            .unwrap();
        assert_eq!(v, Value::Int64(20));
    }

    #[test]
    fn append_beyond_capacity_is_full() {
        let (_dir, node, _mvcc) = setup();
        let batch = Batch::new(vec![int_col(&[1, 2, 3]), int_col(&[1, 2, 3])]).unwrap();
        node.do_with_pin(|| node.append(&batch)).unwrap();
        assert!(matches!(
            node.do_with_pin(|| node.append(&batch)),
            Err(BlockError::Full)
        ));
    }

    #[test]
    fn unload_flushes_and_reload_restores() {
        let (_dir, node, mvcc) = setup();
        let batch = Batch::new(vec![int_col(&[1, 2]), int_col(&[10, 20])]).unwrap();
        node.do_with_pin(|| node.append(&batch)).unwrap();
        mvcc.advance_max_visible(5);

        node.unload().unwrap();
        assert!(!node.is_loaded());

        let v = node
            .do_with_pin(|| node.value_at(0, 0))
            .unwrap();
        assert_eq!(v, Value::Int64(1));
        assert_eq!(node.rows(None, true), 2);
    }

    #[test]
    fn truncate_discards_tail_rows() {
        let (_dir, node, _mvcc) = setup();
        let batch = Batch::new(vec![int_col(&[1, 2, 3]), int_col(&[1, 2, 3])]).unwrap();
        node.do_with_pin(|| node.append(&batch)).unwrap();
        node.truncate(1);
        assert_eq!(node.rows(None, true), 1);
        assert!(matches!(
            node.do_with_pin(|| node.value_at(2, 0)),
            Err(BlockError::NotFound)
        ));
    }

    #[test]
    fn vector_copy_windows_rows() {
        let (_dir, node, _mvcc) = setup();
        let batch = Batch::new(vec![int_col(&[1, 2, 3]), int_col(&[10, 20, 30])]).unwrap();
        node.do_with_pin(|| node.append(&batch)).unwrap();
        let copy = node
            .do_with_pin(|| node.get_vector_copy(2, 1))
            .unwrap();
        assert_eq!(copy.len(), 2);
        assert_eq!(copy.get(1), Some(Value::Int64(20)));
    }
}
