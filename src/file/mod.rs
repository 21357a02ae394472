//! # Column File Set
//!
//! Directory-per-block storage for sealed and checkpointed block state. A
//! segment owns a directory; each block owns a subdirectory holding its
//! metadata header, one data file per column, and the update/delete blobs:
//!
//! ```text
//! seg_<segid>/
//! └── blk_<blkid>/
//!     ├── block.meta       rows + read_ts header
//!     ├── col_0.dat        typed payload, optionally LZ4, crc-checked
//!     ├── col_1.dat
//!     ├── updates.blob     list of (col_idx, row-mask, values)
//!     └── deletes.blob     one row-mask
//! ```
//!
//! ## Contract
//!
//! - `read_ts` is the commit timestamp up to which the on-disk state is
//!   consistent; it only advances, and only through [`BlockFile::flush`] /
//!   [`BlockFile::checkpoint`].
//! - Writes go to a temp file and are renamed into place after `sync_all`,
//!   so a crash never leaves a half-written file under the final name.
//! - After a successful [`BlockFile::destroy`], reopening the block fails
//!   with `NotFound`.
//!
//! All I/O is synchronous from the block's point of view.

pub mod format;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crc::{Crc, CRC_32_ISCSI};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use roaring::RoaringBitmap;
use tracing::{debug, info};
use zerocopy::IntoBytes;

use crate::config::{COLUMN_COMPRESS_THRESHOLD, COLUMN_FLAG_COMPRESSED};
use crate::error::{BlockError, Result};
use crate::types::{Batch, ColumnVector, DataType, Value};
use format::{BlobHeader, BlockMetaHeader, ColumnFileHeader};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Per-column update overlay as persisted: row mask plus row->value cells.
pub type ColumnUpdates = Vec<(u16, RoaringBitmap, HashMap<u32, Value>)>;

fn corrupt(msg: impl Into<String>) -> BlockError {
    BlockError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        msg.into(),
    ))
}

/// One segment directory; hands out block file handles.
pub struct SegmentFile {
    dir: PathBuf,
    destroyed_blocks: Mutex<HashSet<u64>>,
}

impl SegmentFile {
    /// Opens (creating if absent) the directory for `segment` under `root`.
    pub fn open(root: impl AsRef<Path>, segment: u64) -> Result<Self> {
        let dir = root.as_ref().join(format!("seg_{segment}"));
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            destroyed_blocks: Mutex::new(HashSet::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Opens (creating if absent) the file set for one block.
    pub fn open_block(&self, block: u64, col_count: usize) -> Result<Arc<BlockFile>> {
        if self.destroyed_blocks.lock().contains(&block) {
            return Err(BlockError::NotFound);
        }
        BlockFile::open(&self.dir, block, col_count)
    }

    /// Records that `block` was destroyed so reopen attempts fail.
    pub(crate) fn mark_destroyed(&self, block: u64) {
        self.destroyed_blocks.lock().insert(block);
    }
}

struct MetaCache {
    rows: u64,
    read_ts: u64,
}

/// Handle on one block's on-disk file set.
pub struct BlockFile {
    dir: PathBuf,
    block: u64,
    col_count: usize,
    meta: Mutex<MetaCache>,
    destroyed: AtomicBool,
}

impl BlockFile {
    fn open(seg_dir: &Path, block: u64, col_count: usize) -> Result<Arc<Self>> {
        let dir = seg_dir.join(format!("blk_{block}"));
        fs::create_dir_all(&dir)?;
        let meta_path = dir.join("block.meta");
        let meta = if meta_path.exists() {
            let bytes = fs::read(&meta_path)?;
            let header = BlockMetaHeader::from_bytes(&bytes)?;
            if header.col_count() as usize != col_count {
                return Err(corrupt(format!(
                    "block {block} has {} columns on disk, schema says {col_count}",
                    header.col_count()
                )));
            }
            MetaCache {
                rows: header.rows(),
                read_ts: header.read_ts(),
            }
        } else {
            let header = BlockMetaHeader::new(col_count as u32, 0, 0);
            write_atomic(&meta_path, header.as_bytes())?;
            MetaCache {
                rows: 0,
                read_ts: 0,
            }
        };
        Ok(Arc::new(Self {
            dir,
            block,
            col_count,
            meta: Mutex::new(meta),
            destroyed: AtomicBool::new(false),
        }))
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    /// Row count of the consistent on-disk state.
    pub fn read_rows(&self) -> u64 {
        self.meta.lock().rows
    }

    /// Commit timestamp up to which the on-disk state is consistent.
    pub fn read_ts(&self) -> u64 {
        self.meta.lock().read_ts
    }

    fn check_open(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(BlockError::Closed);
        }
        Ok(())
    }

    fn col_path(&self, idx: usize) -> PathBuf {
        self.dir.join(format!("col_{idx}.dat"))
    }

    /// Writes the first `rows` rows of `batch` as the block's base columns
    /// and advances `read_ts` to `ts`. Used by the appendable node's flush.
    pub fn flush(&self, batch: &Batch, rows: u64, ts: u64) -> Result<()> {
        self.check_open()?;
        if batch.column_count() != self.col_count {
            return Err(BlockError::internal(format!(
                "flush with {} columns, block has {}",
                batch.column_count(),
                self.col_count
            )));
        }
        for (idx, col) in batch.columns().iter().enumerate() {
            let window = col.window(0, rows as usize);
            self.write_column(idx, &window)?;
        }
        self.write_meta(rows, ts)?;
        debug!(block = self.block, rows, ts, "flushed block columns");
        Ok(())
    }

    fn write_column(&self, idx: usize, col: &ColumnVector) -> Result<()> {
        let mut payload = Vec::with_capacity(col.mem_size());
        col.encode_to(&mut payload);
        let mut flags = 0u64;
        if payload.len() >= COLUMN_COMPRESS_THRESHOLD {
            payload = lz4_flex::compress_prepend_size(&payload);
            flags |= COLUMN_FLAG_COMPRESSED;
        }
        let header = ColumnFileHeader::new(
            col.data_type().tag(),
            col.len() as u64,
            flags,
            payload.len() as u64,
            CRC32.checksum(&payload),
        );
        let mut bytes = Vec::with_capacity(crate::config::COLUMN_HEADER_SIZE + payload.len());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&payload);
        write_atomic(&self.col_path(idx), &bytes)
    }

    fn write_meta(&self, rows: u64, read_ts: u64) -> Result<()> {
        let mut meta = self.meta.lock();
        if read_ts < meta.read_ts {
            return Err(BlockError::internal(format!(
                "read_ts regression: {read_ts} < {}",
                meta.read_ts
            )));
        }
        let header = BlockMetaHeader::new(self.col_count as u32, rows, read_ts);
        write_atomic(&self.dir.join("block.meta"), header.as_bytes())?;
        meta.rows = rows;
        meta.read_ts = read_ts;
        Ok(())
    }

    /// Loads one column's base vector.
    pub fn load_column(&self, idx: usize, expected: DataType) -> Result<ColumnVector> {
        self.check_open()?;
        let bytes = fs::read(self.col_path(idx))?;
        let header = ColumnFileHeader::from_bytes(&bytes)?;
        let payload = bytes
            .get(crate::config::COLUMN_HEADER_SIZE..)
            .ok_or_else(|| corrupt("column payload missing"))?;
        if payload.len() as u64 != header.payload_len() {
            return Err(corrupt(format!(
                "column {idx} payload length {} != header {}",
                payload.len(),
                header.payload_len()
            )));
        }
        if CRC32.checksum(payload) != header.crc() {
            return Err(corrupt(format!("column {idx} payload crc mismatch")));
        }
        let data_type = DataType::from_tag(header.type_tag())?;
        if data_type != expected {
            return Err(corrupt(format!(
                "column {idx} is {data_type:?} on disk, schema says {expected:?}"
            )));
        }
        let raw;
        let payload = if header.flags() & COLUMN_FLAG_COMPRESSED != 0 {
            raw = lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| corrupt(format!("column {idx} decompression failed: {e}")))?;
            raw.as_slice()
        } else {
            payload
        };
        ColumnVector::decode(data_type, header.rows() as usize, payload)
    }

    /// Loads all base columns as a batch.
    pub fn load_batch(&self, types: &[DataType]) -> Result<Batch> {
        self.check_open()?;
        if types.len() != self.col_count {
            return Err(BlockError::internal(format!(
                "load_batch with {} types, block has {} columns",
                types.len(),
                self.col_count
            )));
        }
        let mut columns = Vec::with_capacity(types.len());
        for (idx, dt) in types.iter().enumerate() {
            columns.push(self.load_column(idx, *dt)?);
        }
        Batch::new(columns)
    }

    /// Persists the folded update overlays and delete mask, advancing
    /// `read_ts` to `ckp_ts`. The meta header is written last so a crash
    /// mid-checkpoint leaves the previous consistent state addressable.
    pub fn checkpoint(
        &self,
        ckp_ts: u64,
        updates: &ColumnUpdates,
        deletes: Option<&RoaringBitmap>,
    ) -> Result<()> {
        self.check_open()?;
        self.write_updates_blob(updates)?;
        self.write_deletes_blob(deletes)?;
        let rows = self.meta.lock().rows;
        self.write_meta(rows, ckp_ts)?;
        info!(block = self.block, ckp_ts, "checkpointed block deltas");
        Ok(())
    }

    fn write_updates_blob(&self, updates: &ColumnUpdates) -> Result<()> {
        let mut payload = Vec::new();
        for (col_idx, mask, values) in updates {
            payload.extend_from_slice(&(*col_idx as u32).to_le_bytes());
            let mut mask_bytes = Vec::with_capacity(mask.serialized_size());
            mask.serialize_into(&mut mask_bytes)?;
            payload.extend_from_slice(&(mask_bytes.len() as u32).to_le_bytes());
            payload.extend_from_slice(&mask_bytes);
            let mut rows: Vec<u32> = values.keys().copied().collect();
            rows.sort_unstable();
            payload.extend_from_slice(&(rows.len() as u32).to_le_bytes());
            for row in rows {
                payload.extend_from_slice(&row.to_le_bytes());
                values[&row].encode_to(&mut payload);
            }
        }
        let header = BlobHeader::new(
            updates.len() as u32,
            payload.len() as u64,
            CRC32.checksum(&payload),
        );
        let mut bytes = Vec::with_capacity(crate::config::BLOB_HEADER_SIZE + payload.len());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&payload);
        write_atomic(&self.dir.join("updates.blob"), &bytes)
    }

    fn write_deletes_blob(&self, deletes: Option<&RoaringBitmap>) -> Result<()> {
        let mut payload = Vec::new();
        let count = match deletes {
            Some(mask) if !mask.is_empty() => {
                mask.serialize_into(&mut payload)?;
                1
            }
            _ => 0,
        };
        let header = BlobHeader::new(count, payload.len() as u64, CRC32.checksum(&payload));
        let mut bytes = Vec::with_capacity(crate::config::BLOB_HEADER_SIZE + payload.len());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&payload);
        write_atomic(&self.dir.join("deletes.blob"), &bytes)
    }

    fn read_blob(&self, name: &str) -> Result<Option<(u32, Vec<u8>)>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let header = BlobHeader::from_bytes(&bytes)?;
        let payload = bytes
            .get(crate::config::BLOB_HEADER_SIZE..)
            .ok_or_else(|| corrupt("blob payload missing"))?;
        if payload.len() as u64 != header.payload_len() {
            return Err(corrupt(format!("{name} payload length mismatch")));
        }
        if CRC32.checksum(payload) != header.crc() {
            return Err(corrupt(format!("{name} payload crc mismatch")));
        }
        Ok(Some((header.entry_count(), payload.to_vec())))
    }

    /// Loads the persisted update overlays, if any.
    pub fn load_updates(&self) -> Result<Option<ColumnUpdates>> {
        self.check_open()?;
        let Some((entries, payload)) = self.read_blob("updates.blob")? else {
            return Ok(None);
        };
        if entries == 0 {
            return Ok(None);
        }
        let mut out = ColumnUpdates::new();
        let mut slice = payload.as_slice();
        for _ in 0..entries {
            let col_idx = read_u32(&mut slice)? as u16;
            let mask_len = read_u32(&mut slice)? as usize;
            let mask_bytes = slice
                .get(..mask_len)
                .ok_or_else(|| corrupt("updates blob truncated in mask"))?;
            let mask = RoaringBitmap::deserialize_from(mask_bytes)
                .map_err(|e| corrupt(format!("bad update mask: {e}")))?;
            slice = &slice[mask_len..];
            let value_count = read_u32(&mut slice)? as usize;
            let mut values = HashMap::with_capacity(value_count);
            for _ in 0..value_count {
                let row = read_u32(&mut slice)?;
                let (value, used) = Value::decode_from(slice)?;
                slice = &slice[used..];
                values.insert(row, value);
            }
            if mask.len() != values.len() as u64 {
                return Err(corrupt(format!(
                    "update mask covers {} rows but {} values stored",
                    mask.len(),
                    values.len()
                )));
            }
            out.push((col_idx, mask, values));
        }
        Ok(Some(out))
    }

    /// Loads the persisted delete mask, if any.
    pub fn load_deletes(&self) -> Result<Option<RoaringBitmap>> {
        self.check_open()?;
        let Some((entries, payload)) = self.read_blob("deletes.blob")? else {
            return Ok(None);
        };
        if entries == 0 {
            return Ok(None);
        }
        let mask = RoaringBitmap::deserialize_from(payload.as_slice())
            .map_err(|e| corrupt(format!("bad delete mask: {e}")))?;
        Ok(Some(mask))
    }

    pub fn close(&self) {
        // Nothing buffered; files are written through.
    }

    /// Removes the block directory. Idempotent; later operations on this
    /// handle fail with `Closed`.
    pub fn destroy(&self, segment: &SegmentFile) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        segment.mark_destroyed(self.block);
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        info!(block = self.block, "destroyed block file set");
        Ok(())
    }
}

fn read_u32(slice: &mut &[u8]) -> Result<u32> {
    let bytes = slice
        .get(..4)
        .ok_or_else(|| corrupt("blob truncated reading u32"))?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    *slice = &slice[4..];
    Ok(u32::from_le_bytes(buf))
}

/// Writes `bytes` to a temp file, syncs, then renames over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
