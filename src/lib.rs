//! # Chert - Transactional Columnar Block Storage Engine
//!
//! Chert is the per-block storage engine of a columnar analytical table:
//! the unit that combines an in-memory appendable buffer, a column-oriented
//! on-disk layout, multi-version concurrency control over per-column update
//! chains and a per-block delete chain, a primary-key index with dedup and
//! visibility, and the scoring driver that decides when a block is
//! compacted.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              Block (public contract)          │
//! ├──────────────┬───────────────┬───────────────┤
//! │  PK Index    │  MVCC Handle  │  Views        │
//! │  (dedup /    │  (chains,     │  (column /    │
//! │  visibility) │  visibility)  │  block)       │
//! ├──────────────┴───────┬───────┴───────────────┤
//! │  Appendable Node     │  Compaction Driver    │
//! │  (pinned buffer)     │  (score + factory)    │
//! ├──────────────────────┴───────────────────────┤
//! │      Column File Set (headers, blobs)         │
//! ├──────────────────────────────────────────────┤
//! │   Buffer Manager     │     std::fs I/O        │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Collaborators
//!
//! The transaction manager, write-ahead log, catalog, and task scheduler
//! live outside this crate; the engine consumes their contracts ([`txn`],
//! [`wal`], [`catalog`], and the task factory returned by the driver) and
//! is handed its buffer manager explicitly, so every block is
//! unit-testable in isolation.
//!
//! ## On-Disk Layout
//!
//! ```text
//! seg_<segid>/
//! └── blk_<blkid>/
//!     ├── block.meta       rows + read_ts (checkpoint watermark)
//!     ├── col_<i>.dat      typed column payload, optionally LZ4
//!     ├── updates.blob     per-column (row-mask, values) overlays
//!     └── deletes.blob     merged delete row-mask
//! ```
//!
//! ## Module Overview
//!
//! - [`block`]: block object, appendable node, appender, compaction driver
//! - [`mvcc`]: MVCC handle, append nodes, column chains, delete chain
//! - [`index`]: PK index variants (mutable map / zone filter)
//! - [`file`]: column file set and on-disk headers
//! - [`buffer`]: pinnable-node buffer manager
//! - [`view`]: column/block view materialisation
//! - [`types`] / [`schema`] / [`encoding`]: values, vectors, sort keys
//! - [`txn`] / [`wal`] / [`catalog`]: external contracts
//! - [`config`]: centralized constants
//! - [`error`]: typed engine errors

pub mod block;
pub mod buffer;
pub mod catalog;
pub mod config;
pub mod encoding;
pub mod error;
pub mod file;
pub mod index;
pub mod mvcc;
pub mod schema;
pub mod txn;
pub mod types;
pub mod view;
pub mod wal;

pub use block::{
    Block, BlockAppender, CompactionKind, CompactionTask, CompactionTaskFactory, Filter,
    FilterOp, TaskKind,
};
pub use buffer::BufferManager;
pub use catalog::{BlockId, BlockMeta};
pub use error::{BlockError, Result};
pub use file::SegmentFile;
pub use schema::{ColDef, Schema};
pub use txn::{Txn, TxnId, TxnState};
pub use types::{Batch, ColumnVector, DataType, Value};
pub use view::{BlockView, ColumnView};
pub use wal::LogIndex;
