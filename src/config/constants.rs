//! # Engine Configuration Constants
//!
//! All tunables and format constants for the block engine live here.
//! Interdependent values are grouped and their relationships documented so a
//! change in one place cannot silently invalidate another.
//!
//! ```text
//! BLOCK_META_HEADER_SIZE (128)
//!       │
//!       └─> block.meta is exactly one header; rows and read_ts live in it.
//!
//! COLUMN_HEADER_SIZE (64)
//!       │
//!       └─> every col_<i>.dat starts with one header followed by the
//!           (optionally LZ4) payload covered by the header's crc.
//!
//! BLOB_HEADER_SIZE (64)
//!       │
//!       └─> updates.blob / deletes.blob share the layout: header + payload.
//!
//! SCORE_COL_RATIO_LOW (0.005) / SCORE_COL_RATIO_HIGH (0.10)
//!       │
//!       └─> piecewise thresholds for the per-column update ratio. The
//!           branches are checked in order, so a ratio exactly at
//!           SCORE_COL_RATIO_LOW takes the low branch.
//! ```

/// Default row capacity of an appendable block. The catalog may override it
/// per schema; the engine only enforces whatever the schema carries.
pub const DEFAULT_BLOCK_MAX_ROWS: u32 = 8192;

/// Default byte budget for the buffer manager holding appendable buffers.
pub const DEFAULT_BUFFER_BUDGET: usize = 64 * 1024 * 1024;

/// Size of the block metadata file header.
pub const BLOCK_META_HEADER_SIZE: usize = 128;

/// Size of a column data file header.
pub const COLUMN_HEADER_SIZE: usize = 64;

/// Size of an updates/deletes blob header.
pub const BLOB_HEADER_SIZE: usize = 64;

pub const BLOCK_META_MAGIC: &[u8; 16] = b"Chert Block\x00\x00\x00\x00\x00";
pub const COLUMN_FILE_MAGIC: &[u8; 16] = b"Chert Column\x00\x00\x00\x00";
pub const BLOB_FILE_MAGIC: &[u8; 16] = b"Chert Blob\x00\x00\x00\x00\x00\x00";

pub const FORMAT_VERSION: u32 = 1;

/// Column payload flag: payload is LZ4-compressed with a prepended size.
pub const COLUMN_FLAG_COMPRESSED: u64 = 1;

/// Compress column payloads larger than this on flush. Small payloads are
/// stored raw since the LZ4 frame overhead outweighs the savings.
pub const COLUMN_COMPRESS_THRESHOLD: usize = 4 * 1024;

/// Raw score of a full appendable block: a definitive flush candidate.
pub const SCORE_FULL: usize = 100;

/// Per-column update-ratio thresholds and multipliers for the raw score.
/// Ratios below LOW weigh 10x, ratios in [LOW, HIGH) weigh 20x, ratios at or
/// above HIGH weigh 40x.
pub const SCORE_COL_RATIO_LOW: f64 = 0.005;
pub const SCORE_COL_RATIO_HIGH: f64 = 0.10;
pub const SCORE_COL_MULT_LOW: f64 = 10.0;
pub const SCORE_COL_MULT_MID: f64 = 20.0;
pub const SCORE_COL_MULT_HIGH: f64 = 40.0;

/// Weight of the delete ratio in the raw score.
pub const SCORE_DELETE_WEIGHT: f64 = 50.0;

/// The combined factor is scaled by this before rounding to a score.
pub const SCORE_SCALE: f64 = 100.0;

const _: () = assert!(BLOCK_META_HEADER_SIZE == 128);
const _: () = assert!(COLUMN_HEADER_SIZE == 64);
const _: () = assert!(BLOB_HEADER_SIZE == 64);
const _: () = assert!(SCORE_COL_RATIO_LOW < SCORE_COL_RATIO_HIGH);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magics_are_header_sized() {
        assert_eq!(BLOCK_META_MAGIC.len(), 16);
        assert_eq!(COLUMN_FILE_MAGIC.len(), 16);
        assert_eq!(BLOB_FILE_MAGIC.len(), 16);
    }

    #[test]
    fn score_thresholds_ordered() {
        assert!(SCORE_COL_RATIO_LOW < SCORE_COL_RATIO_HIGH);
        assert!(SCORE_COL_MULT_LOW < SCORE_COL_MULT_MID);
        assert!(SCORE_COL_MULT_MID < SCORE_COL_MULT_HIGH);
    }
}
