//! # Block Object
//!
//! Composes the column file set, the appendable node, the PK index, and the
//! MVCC handle behind one contract. All transactional traffic enters here:
//! appends (through [`BlockAppender`]), range deletes, column updates, point
//! reads, PK lookups and dedup, view materialisation, and the commit/abort
//! application that stamps timestamps into the chains and maintains the
//! index.
//!
//! ## State Machine
//!
//! ```text
//! Fresh ──open──> Opened ──replay──> Running ──destroy──> Closing ──> Destroyed
//! ```
//!
//! `Closing` rejects new operations; `destroy` is idempotent through a
//! [`ClosedState`] latch, so only the first caller runs the teardown.
//!
//! ## Lock Hierarchy
//!
//! Catalog meta lock → `ClosedState` → MVCC handle lock → per-column chain
//! lock → PK index lock, always acquired top-down. Buffer bytes are touched
//! only under a pin.

pub mod appender;
pub mod compact;
pub mod node;

pub use appender::BlockAppender;
pub use compact::{CompactionKind, CompactionTask, CompactionTaskFactory, TaskKind};
pub use node::AppendableNode;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use roaring::RoaringBitmap;
use tracing::{info, warn};

use crate::buffer::BufferManager;
use crate::catalog::BlockMeta;
use crate::encoding::encode_compound_key;
use crate::error::{BlockError, Result};
use crate::file::{BlockFile, SegmentFile};
use crate::index::{DedupResult, ImmutableIndex, MutableIndex};
use crate::mvcc::{DeleteHandle, MvccHandle, UpdateHandle};
use crate::schema::decode_hidden_key;
use crate::txn::Txn;
use crate::types::{ColumnVector, Value};
use crate::view::{BlockView, ColumnView};
use crate::wal::LogIndex;

/// Latch making close/destroy first-caller-wins.
#[derive(Debug, Default)]
pub struct ClosedState {
    closed: AtomicBool,
}

impl ClosedState {
    /// Returns true exactly once.
    pub fn try_close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum BlockState {
    Opened = 1,
    Running = 2,
    Closing = 3,
    Destroyed = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
}

/// Point-lookup filter. Only PK (or hidden-key) equality is supported.
#[derive(Debug, Clone)]
pub struct Filter {
    pub op: FilterOp,
    pub val: Value,
}

impl Filter {
    pub fn eq(val: Value) -> Self {
        Self {
            op: FilterOp::Eq,
            val,
        }
    }
}

enum BlockIndex {
    Mutable(MutableIndex),
    Immutable(ImmutableIndex),
    None,
}

pub struct Block {
    meta: Arc<BlockMeta>,
    file: Arc<BlockFile>,
    segment: Arc<SegmentFile>,
    node: Option<Arc<AppendableNode>>,
    index: BlockIndex,
    mvcc: Arc<MvccHandle>,
    buffer: Arc<BufferManager>,
    append_lock: Mutex<()>,
    ckp_ts: AtomicU64,
    nice: AtomicU32,
    state: AtomicU8,
    closed: ClosedState,
}

impl Block {
    /// Opens the block: wires the file set, node, index, and MVCC handle,
    /// then replays on-disk state if the file carries a non-zero `read_ts`.
    pub fn open(
        meta: Arc<BlockMeta>,
        segment: Arc<SegmentFile>,
        buffer: Arc<BufferManager>,
    ) -> Result<Arc<Self>> {
        let schema = Arc::clone(meta.schema());
        let file = segment.open_block(meta.id().block, schema.column_count())?;
        let mvcc = Arc::new(MvccHandle::new(schema.column_count()));

        let node = if meta.is_appendable() {
            Some(AppendableNode::new(
                node_key(&meta),
                Arc::clone(&schema),
                Arc::clone(&file),
                Arc::clone(&mvcc),
                Arc::clone(&buffer),
            ))
        } else {
            None
        };
        let index = if meta.is_appendable() {
            if schema.has_sort_key() {
                BlockIndex::Mutable(MutableIndex::new())
            } else {
                BlockIndex::None
            }
        } else {
            BlockIndex::Immutable(ImmutableIndex::new())
        };

        let ts = file.read_ts();
        mvcc.advance_max_visible(ts);
        let block = Arc::new(Self {
            meta,
            file,
            segment,
            node,
            index,
            mvcc,
            buffer,
            append_lock: Mutex::new(()),
            ckp_ts: AtomicU64::new(ts),
            nice: AtomicU32::new(0),
            state: AtomicU8::new(BlockState::Opened as u8),
            closed: ClosedState::default(),
        });
        if ts > 0 {
            info!(
                block = %block.meta.id(),
                ts,
                rows = block.file.read_rows(),
                "replaying block"
            );
            block.replay()?;
        }
        block
            .state
            .store(BlockState::Running as u8, Ordering::Release);
        Ok(block)
    }

    pub fn meta(&self) -> &Arc<BlockMeta> {
        &self.meta
    }

    pub fn mvcc(&self) -> &Arc<MvccHandle> {
        &self.mvcc
    }

    pub(crate) fn appendable_node(&self) -> Result<&Arc<AppendableNode>> {
        self.node.as_ref().ok_or(BlockError::NotAppendable)
    }

    pub(crate) fn append_lock(&self) -> &Mutex<()> {
        &self.append_lock
    }

    fn check_running(&self) -> Result<()> {
        if self.state.load(Ordering::Acquire) != BlockState::Running as u8 {
            return Err(BlockError::Closed);
        }
        if self.meta.is_dropped_committed() {
            return Err(BlockError::Dropped);
        }
        Ok(())
    }

    pub fn max_visible_ts(&self) -> u64 {
        self.mvcc.max_visible()
    }

    pub fn max_checkpoint_ts(&self) -> u64 {
        self.ckp_ts.load(Ordering::Acquire)
    }

    pub fn set_max_checkpoint_ts(&self, ts: u64) {
        self.ckp_ts.fetch_max(ts, Ordering::AcqRel);
    }

    pub(crate) fn nice(&self) -> u32 {
        self.nice.load(Ordering::Acquire)
    }

    pub(crate) fn bump_nice(&self) {
        self.nice.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn reset_nice(&self) {
        self.nice.store(0, Ordering::Release);
    }

    /// Physical rows with `coarse`, rows visible to `txn` otherwise.
    pub fn rows(&self, txn: Option<&Txn>, coarse: bool) -> u32 {
        match &self.node {
            Some(node) => node.rows(txn, coarse),
            None => self.file.read_rows() as u32,
        }
    }

    /// Recovery row count: the larger of mvcc rows and file rows.
    pub fn rows_on_replay(&self) -> u64 {
        (self.mvcc.total_rows() as u64).max(self.file.read_rows())
    }

    /// Appendable and not yet full.
    pub fn is_appendable(&self) -> bool {
        self.meta.is_appendable() && self.rows(None, true) < self.meta.block_max_rows()
    }

    pub fn total_changes(&self) -> usize {
        self.mvcc.change_node_count()
    }

    /// Human-readable change summary.
    pub fn mutation_info(&self) -> String {
        let rows = self.rows(None, true);
        let total = self.mvcc.change_node_count();
        let mut s = format!(
            "block {} mutations: changes={total}/{rows}",
            self.meta.id()
        );
        if total == 0 {
            return s;
        }
        for i in 0..self.meta.schema().column_count() {
            let cnt = self.mvcc.column_update_count(i as u16);
            if cnt > 0 {
                s.push_str(&format!(", col[{i}]:{cnt}/{rows}"));
            }
        }
        let deletes = self.mvcc.delete_count();
        if deletes > 0 {
            s.push_str(&format!(", del:{deletes}/{rows}"));
        }
        s
    }

    // ------------------------------------------------------------------
    // Key helpers
    // ------------------------------------------------------------------

    /// Index key for a probe value: single sort keys encode the value; a
    /// compound probe supplies the pre-encoded composite as a blob.
    pub(crate) fn probe_key(&self, val: &Value) -> Result<Box<[u8]>> {
        let schema = self.meta.schema();
        if !schema.has_sort_key() {
            return Err(BlockError::internal("pk probe without a sort key"));
        }
        if schema.is_single_sort_key() {
            let expected = schema
                .data_type(schema.single_sort_key_idx())
                .expect("sort key column exists");
            if val.data_type() != expected {
                return Err(BlockError::internal(format!(
                    "pk probe is {:?}, sort key is {expected:?}",
                    val.data_type()
                )));
            }
            Ok(encode_compound_key(std::slice::from_ref(val)))
        } else {
            match val {
                Value::Blob(bytes) => Ok(bytes.clone().into_boxed_slice()),
                other => Err(BlockError::internal(format!(
                    "compound pk probe must be an encoded blob, got {:?}",
                    other.data_type()
                ))),
            }
        }
    }

    /// Index key of one row given its sort-key column vectors.
    pub(crate) fn row_key(cols: &[ColumnVector], row: u32) -> Result<Box<[u8]>> {
        let mut vals = Vec::with_capacity(cols.len());
        for col in cols {
            vals.push(col.get(row as usize).ok_or(BlockError::NotFound)?);
        }
        Ok(encode_compound_key(&vals))
    }

    /// Copies the sort-key columns of the buffer up to `rows`. Caller holds
    /// a pin.
    fn sort_columns(&self, rows: u32) -> Result<Vec<ColumnVector>> {
        let node = self.appendable_node()?;
        let schema = self.meta.schema();
        let mut cols = Vec::with_capacity(schema.sort_key_idxs().len());
        for idx in schema.sort_key_idxs() {
            cols.push(node.get_vector_copy(rows, *idx)?);
        }
        Ok(cols)
    }

    pub(crate) fn index_batch_upsert(&self, keys: &[Box<[u8]>], start: u32) -> Result<()> {
        match &self.index {
            BlockIndex::Mutable(index) => {
                index.batch_upsert(keys, start);
                Ok(())
            }
            _ => Err(BlockError::internal("batch upsert without a mutable index")),
        }
    }

    fn mutable_index(&self) -> Result<&MutableIndex> {
        match &self.index {
            BlockIndex::Mutable(idx) => Ok(idx),
            _ => Err(BlockError::internal("block has no mutable index")),
        }
    }

    fn immutable_index(&self) -> Result<&ImmutableIndex> {
        match &self.index {
            BlockIndex::Immutable(idx) => Ok(idx),
            _ => Err(BlockError::internal("block has no immutable index")),
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Returns a writer for the external appender to drive.
    pub fn make_appender(&self) -> Result<BlockAppender<'_>> {
        self.check_running()?;
        if !self.meta.is_appendable() {
            return Err(BlockError::NotAppendable);
        }
        Ok(BlockAppender::new(self))
    }

    /// Installs a delete node over `[start, end]` after the write-write
    /// checks; the node commits with its transaction.
    pub fn range_delete(&self, txn: &Arc<Txn>, start: u32, end: u32) -> Result<DeleteHandle> {
        self.check_running()?;
        if start > end {
            return Err(BlockError::internal(format!(
                "range delete [{start}, {end}] is inverted"
            )));
        }
        let rows = match &self.node {
            Some(_) => self.mvcc.visible_rows(txn.start_ts(), Some(txn)).0,
            None => self.file.read_rows() as u32,
        };
        if end >= rows {
            return Err(BlockError::NotFound);
        }
        self.mvcc.range_delete(txn, start, end)
    }

    /// Updates one cell through the fine-grained lock path. The hidden-key
    /// column refuses updates.
    pub fn update(
        &self,
        txn: &Arc<Txn>,
        row: u32,
        col_idx: u16,
        value: Value,
    ) -> Result<UpdateHandle> {
        self.check_running()?;
        self.check_update_args(row, col_idx, &value, txn)?;
        self.mvcc.update_fine(txn, col_idx, row, value)
    }

    /// Coarse-grained variant of [`update`](Self::update), equivalent in
    /// semantics.
    pub fn update_with_coarse_lock(
        &self,
        txn: &Arc<Txn>,
        row: u32,
        col_idx: u16,
        value: Value,
    ) -> Result<UpdateHandle> {
        self.check_running()?;
        self.check_update_args(row, col_idx, &value, txn)?;
        self.mvcc.update_coarse(txn, col_idx, row, value)
    }

    fn check_update_args(&self, row: u32, col_idx: u16, value: &Value, txn: &Txn) -> Result<()> {
        let schema = self.meta.schema();
        if schema.hidden_key_idx() == Some(col_idx as usize) {
            return Err(BlockError::UpdateHiddenKey);
        }
        let expected = schema
            .data_type(col_idx as usize)
            .ok_or_else(|| BlockError::internal(format!("no column {col_idx}")))?;
        if value.data_type() != expected {
            return Err(BlockError::internal(format!(
                "update value is {:?}, column {col_idx} is {expected:?}",
                value.data_type()
            )));
        }
        let rows = match &self.node {
            Some(_) => self.mvcc.visible_rows(txn.start_ts(), Some(txn)).0,
            None => self.file.read_rows() as u32,
        };
        if row >= rows {
            return Err(BlockError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Commit / abort application
    // ------------------------------------------------------------------

    /// Applies a commit: stamps `commit_ts` into the transaction's nodes,
    /// advances visibility, and maintains the PK index for deletes.
    pub fn commit_txn(
        &self,
        txn: &Arc<Txn>,
        commit_ts: u64,
        log_index: Option<LogIndex>,
    ) -> Result<()> {
        txn.apply_commit(commit_ts)?;
        let outcome = self.mvcc.commit_txn(txn, commit_ts, log_index);
        if let Some(deleted) = outcome.committed_deletes {
            self.apply_delete(&deleted, commit_ts)?;
        }
        Ok(())
    }

    /// Applies an abort: unlinks the transaction's nodes, removes its
    /// appended keys from the index, and truncates the buffer tail.
    pub fn abort_txn(&self, txn: &Arc<Txn>) -> Result<()> {
        txn.apply_abort();
        let outcome = self.mvcc.abort_txn(txn);
        if outcome.aborted_appends.is_empty() {
            return Ok(());
        }
        let node = match &self.node {
            Some(node) => node,
            None => return Ok(()),
        };
        if self.meta.schema().has_sort_key() {
            let index = self.mutable_index()?;
            node.do_with_pin(|| {
                for (start, count) in &outcome.aborted_appends {
                    let cols = self.sort_columns(start + count)?;
                    for row in *start..start + count {
                        let key = Self::row_key(&cols, row)?;
                        index.remove_active(&key, row);
                    }
                }
                Ok(())
            })?;
        }
        node.truncate(outcome.rows_after);
        Ok(())
    }

    /// Delete listener: moves deleted keys into the tombstone map. Sealed
    /// blocks and schemas without a sort key have nothing to maintain.
    fn apply_delete(&self, rows: &RoaringBitmap, ts: u64) -> Result<()> {
        if !self.meta.is_appendable() || !self.meta.schema().has_sort_key() {
            return Ok(());
        }
        let node = self.appendable_node()?;
        let index = self.mutable_index()?;
        node.do_with_pin(|| {
            let physical = node.rows(None, true);
            let cols = self.sort_columns(physical)?;
            for row in rows {
                let key = Self::row_key(&cols, row)?;
                match index.get_active_row(&key) {
                    Some(active) if active == row => index.delete(&key, ts)?,
                    Some(_) => {}
                    None => {
                        if index.tombstone(&key).is_some_and(|t| t.ts < ts) {
                            index.delete(&key, ts)?;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Point read of one cell at the transaction's snapshot.
    pub fn get_value(&self, txn: &Arc<Txn>, row: u32, col_idx: u16) -> Result<Value> {
        self.check_running()?;
        if let Some(v) = self.mvcc.get_visible_update(txn, row, col_idx)? {
            return Ok(v);
        }
        match &self.node {
            Some(node) => {
                if !self.mvcc.is_row_visible(row, txn.start_ts(), Some(txn.as_ref())) {
                    return Err(BlockError::NotFound);
                }
                node.do_with_pin(|| node.value_at(row, col_idx as usize))
            }
            None => {
                if row as u64 >= self.file.read_rows() {
                    return Err(BlockError::NotFound);
                }
                let expected = self
                    .meta
                    .schema()
                    .data_type(col_idx as usize)
                    .ok_or_else(|| BlockError::internal(format!("no column {col_idx}")))?;
                let col = self.file.load_column(col_idx as usize, expected)?;
                col.get(row as usize).ok_or(BlockError::NotFound)
            }
        }
    }

    /// PK (or hidden-key) equality lookup.
    pub fn get_by_filter(&self, txn: &Arc<Txn>, filter: &Filter) -> Result<u32> {
        self.check_running()?;
        debug_assert!(matches!(filter.op, FilterOp::Eq));
        let schema = self.meta.schema();
        if !schema.has_sort_key() {
            let (_, _, row) = decode_hidden_key(filter.val.as_u64()?);
            return Ok(row);
        }
        let key = self.probe_key(&filter.val)?;
        if self.meta.is_appendable() {
            self.ablk_get_by_filter(txn, &key)
        } else {
            self.blk_get_by_filter(txn, &key)
        }
    }

    fn ablk_get_by_filter(&self, txn: &Arc<Txn>, key: &[u8]) -> Result<u32> {
        let ts = txn.start_ts();
        let index = self.mutable_index()?;
        if let Some(offset) = index.get_active_row(key) {
            if self.mvcc.is_row_visible(offset, ts, Some(txn.as_ref())) {
                if self.mvcc.is_deleted(offset, ts, Some(txn.as_ref())) {
                    return Err(BlockError::NotFound);
                }
                return Ok(offset);
            }
        }
        // Not in the active map (or not visible): the key may have been
        // deleted after our snapshot, in which case the old row still reads.
        match index.tombstone(key) {
            Some(t) if t.ts > ts => Ok(t.row),
            _ => Err(BlockError::NotFound),
        }
    }

    fn blk_get_by_filter(&self, txn: &Arc<Txn>, key: &[u8]) -> Result<u32> {
        let index = self.immutable_index()?;
        if index.dedup(key) == DedupResult::Absent {
            return Err(BlockError::NotFound);
        }
        let ts = txn.start_ts();
        let offset = self.search_sorted_pk(key)?.ok_or(BlockError::NotFound)?;
        if self.mvcc.is_deleted(offset, ts, Some(txn.as_ref())) {
            return Err(BlockError::NotFound);
        }
        Ok(offset)
    }

    /// Binary search over the sorted on-disk PK column(s) by encoded key.
    fn search_sorted_pk(&self, key: &[u8]) -> Result<Option<u32>> {
        let schema = self.meta.schema();
        let mut cols = Vec::with_capacity(schema.sort_key_idxs().len());
        for idx in schema.sort_key_idxs() {
            let expected = schema.data_type(*idx).expect("sort key column exists");
            cols.push(self.file.load_column(*idx, expected)?);
        }
        let rows = cols.first().map_or(0, |c| c.len()) as u32;
        let (mut lo, mut hi) = (0u32, rows);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let mid_key = Self::row_key(&cols, mid)?;
            match mid_key.as_ref().cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Some(mid)),
            }
        }
        Ok(None)
    }

    /// PK uniqueness check for a batch about to be inserted elsewhere.
    /// Positions listed in `rowmask` are skipped.
    pub fn batch_dedup(
        &self,
        txn: &Arc<Txn>,
        pks: &[Value],
        rowmask: Option<&RoaringBitmap>,
    ) -> Result<()> {
        self.check_running()?;
        let mut keys = Vec::with_capacity(pks.len());
        for pk in pks {
            keys.push(self.probe_key(pk)?);
        }
        if self.meta.is_appendable() {
            let index = self.mutable_index()?;
            let ts = txn.start_ts();
            let keyselects = index.batch_dedup(&keys, rowmask)?;
            // All tombstones at or before our snapshot are visible deletes:
            // reinsertion is fine and the scan can be skipped wholesale.
            if ts > index.max_delete_ts() {
                return Ok(());
            }
            for pos in keyselects {
                if index.has_delete_after(&keys[pos as usize], ts) {
                    return Err(BlockError::WWConflict);
                }
            }
            return Ok(());
        }
        let index = self.immutable_index()?;
        let mut deletes: Option<Option<RoaringBitmap>> = None;
        for (i, key) in keys.iter().enumerate() {
            if rowmask.is_some_and(|m| m.contains(i as u32)) {
                continue;
            }
            if index.dedup(key) == DedupResult::Absent {
                continue;
            }
            let deletes = deletes
                .get_or_insert_with(|| self.mvcc.collect_deletes(txn.start_ts(), Some(txn.as_ref())));
            if let Some(offset) = self.search_sorted_pk(key)? {
                if deletes.as_ref().map_or(true, |m| !m.contains(offset)) {
                    return Err(BlockError::Duplicate);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Logical view of one column at the transaction's snapshot.
    pub fn get_column_data(&self, txn: &Arc<Txn>, col_idx: u16) -> Result<ColumnView> {
        self.check_running()?;
        let ts = txn.start_ts();
        let mut view = ColumnView::new(ts, col_idx);
        match &self.node {
            Some(node) => {
                let (rows, visible) = self.mvcc.visible_rows(ts, Some(txn.as_ref()));
                if !visible {
                    view.raw = Some(ColumnVector::new(
                        self.meta
                            .schema()
                            .data_type(col_idx as usize)
                            .ok_or_else(|| {
                                BlockError::internal(format!("no column {col_idx}"))
                            })?,
                    ));
                    view.eval(true)?;
                    return Ok(view);
                }
                view.raw =
                    Some(node.do_with_pin(|| node.get_vector_copy(rows, col_idx as usize))?);
            }
            None => {
                let expected = self
                    .meta
                    .schema()
                    .data_type(col_idx as usize)
                    .ok_or_else(|| BlockError::internal(format!("no column {col_idx}")))?;
                view.raw = Some(self.file.load_column(col_idx as usize, expected)?);
            }
        }
        if let Some((mask, vals)) = self.mvcc.collect_column_updates(col_idx, ts, Some(txn.as_ref()))? {
            view.set_updates(mask, vals);
        }
        view.delete_mask = self.mvcc.collect_deletes(ts, Some(txn.as_ref()));
        view.eval(true)?;
        Ok(view)
    }

    /// Name-based variant of [`get_column_data`](Self::get_column_data).
    pub fn get_column_data_by_name(&self, txn: &Arc<Txn>, attr: &str) -> Result<ColumnView> {
        let col_idx = self
            .meta
            .schema()
            .col_idx(attr)
            .ok_or(BlockError::NotFound)?;
        self.get_column_data(txn, col_idx as u16)
    }

    /// Base PK column plus delete mask at `ts`; serves immutable dedup.
    pub fn get_pk_column_data(&self, ts: u64) -> Result<ColumnView> {
        let schema = self.meta.schema();
        if !schema.is_single_sort_key() {
            return Err(BlockError::internal(
                "pk column view requires a single sort key",
            ));
        }
        let sort_idx = schema.single_sort_key_idx();
        let expected = schema.data_type(sort_idx).expect("sort key column exists");
        let mut view = ColumnView::new(ts, sort_idx as u16);
        view.raw = Some(self.file.load_column(sort_idx, expected)?);
        view.delete_mask = self.mvcc.collect_deletes(ts, None);
        view.eval(false)?;
        Ok(view)
    }

    /// Full-block view at the visibility watermark.
    pub fn make_block_view(&self) -> Result<BlockView> {
        self.check_running()?;
        let ts = self.mvcc.max_visible();
        let snap = self.mvcc.collect_snapshot(ts, None);
        let mut view = BlockView::new(ts);
        for (col_idx, mask, vals) in snap.updates {
            view.set_column_updates(col_idx, mask, vals);
        }
        view.delete_mask = snap.delete_mask;
        view.raw = Some(match &self.node {
            Some(node) => node.do_with_pin(|| {
                let mut cols = Vec::with_capacity(self.meta.schema().column_count());
                for idx in 0..self.meta.schema().column_count() {
                    cols.push(node.get_vector_copy(snap.visible_rows, idx)?);
                }
                crate::types::Batch::new(cols)
            })?,
            None => self.file.load_batch(&self.meta.schema().types())?,
        });
        Ok(view)
    }

    /// Committed changes in `[start_ts, end_ts]` for the external log and
    /// replication.
    pub fn collect_changes_in_range(&self, start_ts: u64, end_ts: u64) -> Result<BlockView> {
        self.check_running()?;
        let changes = self.mvcc.collect_changes_in_range(start_ts, end_ts);
        let mut view = BlockView::new(end_ts);
        for (col_idx, mask, vals) in changes.updates {
            view.set_column_updates(col_idx, mask, vals);
        }
        for (col_idx, indexes) in changes.col_log_indexes {
            view.col_log_indexes.insert(col_idx, indexes);
        }
        view.delete_mask = changes.delete_mask;
        view.delete_log_indexes = changes.delete_log_indexes;
        Ok(view)
    }

    pub fn collect_append_log_indexes(&self, start_ts: u64, end_ts: u64) -> Result<Vec<LogIndex>> {
        self.check_running()?;
        Ok(self.mvcc.collect_append_log_indexes(start_ts, end_ts))
    }

    // ------------------------------------------------------------------
    // Replay
    // ------------------------------------------------------------------

    fn replay(&self) -> Result<()> {
        self.replay_index()?;
        self.replay_delta()
    }

    fn replay_index(&self) -> Result<()> {
        let schema = self.meta.schema();
        if !schema.has_sort_key() {
            return Ok(());
        }
        match &self.index {
            BlockIndex::Mutable(index) => {
                let node = self.appendable_node()?;
                node.do_with_pin(|| {
                    let rows = node.rows(None, true);
                    if rows == 0 {
                        return Ok(());
                    }
                    let cols = self.sort_columns(rows)?;
                    let mut keys = Vec::with_capacity(rows as usize);
                    for row in 0..rows {
                        keys.push(Self::row_key(&cols, row)?);
                    }
                    index.batch_upsert(&keys, 0);
                    Ok(())
                })
            }
            BlockIndex::Immutable(index) => {
                let mut cols = Vec::with_capacity(schema.sort_key_idxs().len());
                for idx in schema.sort_key_idxs() {
                    let expected = schema.data_type(*idx).expect("sort key column exists");
                    cols.push(self.file.load_column(*idx, expected)?);
                }
                let rows = cols.first().map_or(0, |c| c.len()) as u32;
                let mut keys = Vec::with_capacity(rows as usize);
                for row in 0..rows {
                    keys.push(Self::row_key(&cols, row)?);
                }
                index.read_from(&keys)
            }
            BlockIndex::None => Ok(()),
        }
    }

    fn replay_delta(&self) -> Result<()> {
        let ckp_ts = self.max_checkpoint_ts();
        if let Some(node) = &self.node {
            // The on-disk rows become one synthetic committed append.
            let rows = node.do_with_pin(|| Ok(node.rows(None, true)))?;
            if rows > 0 {
                self.mvcc.on_replay_append(rows, ckp_ts);
            }
        }
        if let Some(updates) = self.file.load_updates()? {
            for (col_idx, mask, values) in updates {
                self.mvcc.on_replay_update(col_idx, mask, values, ckp_ts)?;
            }
        }
        if let Some(deletes) = self.file.load_deletes()? {
            let rows = self.mvcc.on_replay_delete(deletes, ckp_ts);
            self.apply_delete(&rows, ckp_ts)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Checkpoint / teardown
    // ------------------------------------------------------------------

    /// Persists everything committed at or before `ts`: flushes the buffer
    /// (appendable blocks), writes the folded update and delete blobs, and
    /// advances the checkpoint watermark. `ts` must not lag a previous
    /// checkpoint.
    pub fn checkpoint(&self, ts: u64) -> Result<()> {
        self.check_running()?;
        if let Some(node) = &self.node {
            node.on_unload()?;
        }
        let snap = self.mvcc.collect_snapshot(ts, None);
        let updates: crate::file::ColumnUpdates = snap.updates;
        self.file
            .checkpoint(ts, &updates, snap.delete_mask.as_ref())?;
        self.set_max_checkpoint_ts(ts);
        Ok(())
    }

    /// Test/ops helper: flush the appendable buffer now.
    pub fn flush(&self) -> Result<()> {
        match &self.node {
            Some(node) => node.on_unload(),
            None => Ok(()),
        }
    }

    /// Closes and removes the block. Idempotent; I/O failures are logged
    /// and do not unwind the close.
    pub fn destroy(&self) -> Result<()> {
        if !self.closed.try_close() {
            return Ok(());
        }
        self.state
            .store(BlockState::Closing as u8, Ordering::Release);
        if let Some(node) = &self.node {
            if let Err(err) = node.close() {
                warn!(block = %self.meta.id(), %err, "flush during destroy failed");
            }
            self.buffer.unregister(node.key());
        }
        match &self.index {
            BlockIndex::Mutable(index) => index.destroy(),
            BlockIndex::Immutable(index) => index.destroy(),
            BlockIndex::None => {}
        }
        self.file.close();
        if let Err(err) = self.file.destroy(&self.segment) {
            warn!(block = %self.meta.id(), %err, "file destroy failed");
        }
        self.state
            .store(BlockState::Destroyed as u8, Ordering::Release);
        info!(block = %self.meta.id(), "destroyed block");
        Ok(())
    }
}

fn node_key(meta: &BlockMeta) -> u64 {
    let mut hasher = DefaultHasher::new();
    meta.id().hash(&mut hasher);
    hasher.finish()
}
