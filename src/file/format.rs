//! # On-Disk Header Definitions
//!
//! Zerocopy-based header structs for the three file kinds in a block
//! directory. Every header starts with 16 magic bytes and a format version;
//! multi-byte fields are little-endian so the structs read directly off any
//! architecture.
//!
//! ## File Kinds
//!
//! 1. **block.meta** — [`BlockMetaHeader`], exactly 128 bytes: column count,
//!    row count, and `read_ts`, the commit timestamp up to which the on-disk
//!    state is consistent.
//! 2. **col_\<i\>.dat** — [`ColumnFileHeader`], 64 bytes: type tag, rows,
//!    flags (compression), payload length, and a CRC-32 over the payload as
//!    stored.
//! 3. **updates.blob / deletes.blob** — [`BlobHeader`], 64 bytes: entry
//!    count, payload length, CRC-32.
//!
//! The header layout is a bit-level contract: fields are only ever appended
//! into the reserved tail, never reordered.

use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    BLOB_FILE_MAGIC, BLOB_HEADER_SIZE, BLOCK_META_HEADER_SIZE, BLOCK_META_MAGIC,
    COLUMN_FILE_MAGIC, COLUMN_HEADER_SIZE, FORMAT_VERSION,
};
use crate::error::{BlockError, Result};

fn corrupt(msg: impl Into<String>) -> BlockError {
    BlockError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        msg.into(),
    ))
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BlockMetaHeader {
    magic: [u8; 16],
    version: U32,
    col_count: U32,
    rows: U64,
    read_ts: U64,
    flags: U64,
    reserved: [u8; 80],
}

const _: () = assert!(std::mem::size_of::<BlockMetaHeader>() == BLOCK_META_HEADER_SIZE);

impl BlockMetaHeader {
    pub fn new(col_count: u32, rows: u64, read_ts: u64) -> Self {
        Self {
            magic: *BLOCK_META_MAGIC,
            version: U32::new(FORMAT_VERSION),
            col_count: U32::new(col_count),
            rows: U64::new(rows),
            read_ts: U64::new(read_ts),
            flags: U64::new(0),
            reserved: [0u8; 80],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        if bytes.len() < BLOCK_META_HEADER_SIZE {
            return Err(corrupt(format!(
                "block meta header truncated: {} < {BLOCK_META_HEADER_SIZE}",
                bytes.len()
            )));
        }
        let header = Self::ref_from_bytes(&bytes[..BLOCK_META_HEADER_SIZE])
            .map_err(|e| corrupt(format!("unparseable block meta header: {e:?}")))?;
        if &header.magic != BLOCK_META_MAGIC {
            return Err(corrupt("bad magic in block.meta"));
        }
        if header.version.get() != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported block.meta version {}",
                header.version.get()
            )));
        }
        Ok(header)
    }

    pub fn col_count(&self) -> u32 {
        self.col_count.get()
    }

    pub fn rows(&self) -> u64 {
        self.rows.get()
    }

    pub fn read_ts(&self) -> u64 {
        self.read_ts.get()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ColumnFileHeader {
    magic: [u8; 16],
    version: U32,
    type_tag: U32,
    rows: U64,
    flags: U64,
    payload_len: U64,
    crc: U32,
    reserved: [u8; 12],
}

const _: () = assert!(std::mem::size_of::<ColumnFileHeader>() == COLUMN_HEADER_SIZE);

impl ColumnFileHeader {
    pub fn new(type_tag: u32, rows: u64, flags: u64, payload_len: u64, crc: u32) -> Self {
        Self {
            magic: *COLUMN_FILE_MAGIC,
            version: U32::new(FORMAT_VERSION),
            type_tag: U32::new(type_tag),
            rows: U64::new(rows),
            flags: U64::new(flags),
            payload_len: U64::new(payload_len),
            crc: U32::new(crc),
            reserved: [0u8; 12],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        if bytes.len() < COLUMN_HEADER_SIZE {
            return Err(corrupt(format!(
                "column header truncated: {} < {COLUMN_HEADER_SIZE}",
                bytes.len()
            )));
        }
        let header = Self::ref_from_bytes(&bytes[..COLUMN_HEADER_SIZE])
            .map_err(|e| corrupt(format!("unparseable column header: {e:?}")))?;
        if &header.magic != COLUMN_FILE_MAGIC {
            return Err(corrupt("bad magic in column file"));
        }
        if header.version.get() != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported column file version {}",
                header.version.get()
            )));
        }
        Ok(header)
    }

    pub fn type_tag(&self) -> u32 {
        self.type_tag.get()
    }

    pub fn rows(&self) -> u64 {
        self.rows.get()
    }

    pub fn flags(&self) -> u64 {
        self.flags.get()
    }

    pub fn payload_len(&self) -> u64 {
        self.payload_len.get()
    }

    pub fn crc(&self) -> u32 {
        self.crc.get()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BlobHeader {
    magic: [u8; 16],
    version: U32,
    entry_count: U32,
    payload_len: U64,
    crc: U32,
    reserved: [u8; 28],
}

const _: () = assert!(std::mem::size_of::<BlobHeader>() == BLOB_HEADER_SIZE);

impl BlobHeader {
    pub fn new(entry_count: u32, payload_len: u64, crc: u32) -> Self {
        Self {
            magic: *BLOB_FILE_MAGIC,
            version: U32::new(FORMAT_VERSION),
            entry_count: U32::new(entry_count),
            payload_len: U64::new(payload_len),
            crc: U32::new(crc),
            reserved: [0u8; 28],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        if bytes.len() < BLOB_HEADER_SIZE {
            return Err(corrupt(format!(
                "blob header truncated: {} < {BLOB_HEADER_SIZE}",
                bytes.len()
            )));
        }
        let header = Self::ref_from_bytes(&bytes[..BLOB_HEADER_SIZE])
            .map_err(|e| corrupt(format!("unparseable blob header: {e:?}")))?;
        if &header.magic != BLOB_FILE_MAGIC {
            return Err(corrupt("bad magic in blob file"));
        }
        if header.version.get() != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported blob version {}",
                header.version.get()
            )));
        }
        Ok(header)
    }

    pub fn entry_count(&self) -> u32 {
        self.entry_count.get()
    }

    pub fn payload_len(&self) -> u64 {
        self.payload_len.get()
    }

    pub fn crc(&self) -> u32 {
        self.crc.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    #[test]
    fn block_meta_round_trips() {
        let header = BlockMetaHeader::new(3, 42, 100);
        let bytes = header.as_bytes().to_vec();
        let parsed = BlockMetaHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.col_count(), 3);
        assert_eq!(parsed.rows(), 42);
        assert_eq!(parsed.read_ts(), 100);
    }

    #[test]
    fn bad_magic_rejected() {
        let header = ColumnFileHeader::new(1, 0, 0, 0, 0);
        let mut bytes = header.as_bytes().to_vec();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            ColumnFileHeader::from_bytes(&bytes),
            Err(BlockError::Io(_))
        ));
    }

    #[test]
    fn truncated_header_rejected() {
        let header = BlobHeader::new(1, 10, 0);
        let bytes = header.as_bytes().to_vec();
        assert!(BlobHeader::from_bytes(&bytes[..10]).is_err());
    }
}
