//! # Block Schema
//!
//! The catalog hands each block an ordered list of column definitions plus
//! the sort-key and hidden-key designations. The engine treats the schema as
//! immutable for the lifetime of the block.
//!
//! ## Sort Key
//!
//! Zero or more columns may form the sort key, which doubles as the primary
//! key: the PK index is built over the byte-comparable encoding of the
//! sort-key cells (see `encoding`), so single-column and compound keys share
//! one representation.
//!
//! ## Hidden Key
//!
//! A schema without a sort key carries a synthetic hidden-key column: a
//! `u64` packing segment, block, and row offset. Point lookups on the hidden
//! key decode directly to a row offset without touching the index, and the
//! column rejects updates.
//!
//! ```text
//!  63           48 47           32 31            0
//! +---------------+---------------+---------------+
//! |   segment     |    block      |     row       |
//! +---------------+---------------+---------------+
//! ```

use smallvec::SmallVec;

use crate::error::{BlockError, Result};
use crate::types::DataType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColDef {
    pub name: String,
    pub data_type: DataType,
    pub idx: usize,
}

#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    col_defs: Vec<ColDef>,
    sort_key: SmallVec<[usize; 2]>,
    hidden_key: Option<usize>,
    block_max_rows: u32,
}

impl Schema {
    pub fn new(
        name: impl Into<String>,
        col_defs: Vec<ColDef>,
        sort_key: &[usize],
        hidden_key: Option<usize>,
        block_max_rows: u32,
    ) -> Result<Self> {
        for (i, def) in col_defs.iter().enumerate() {
            if def.idx != i {
                return Err(BlockError::internal(format!(
                    "column {} has idx {} at position {i}",
                    def.name, def.idx
                )));
            }
        }
        for idx in sort_key {
            if *idx >= col_defs.len() {
                return Err(BlockError::internal(format!(
                    "sort key column {idx} out of range"
                )));
            }
        }
        if let Some(idx) = hidden_key {
            let def = col_defs
                .get(idx)
                .ok_or_else(|| BlockError::internal(format!("hidden key column {idx} out of range")))?;
            if def.data_type != DataType::UInt64 {
                return Err(BlockError::internal(
                    "hidden key column must be UInt64".to_string(),
                ));
            }
        }
        Ok(Self {
            name: name.into(),
            col_defs,
            sort_key: SmallVec::from_slice(sort_key),
            hidden_key,
            block_max_rows,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn col_defs(&self) -> &[ColDef] {
        &self.col_defs
    }

    pub fn column_count(&self) -> usize {
        self.col_defs.len()
    }

    pub fn col_idx(&self, name: &str) -> Option<usize> {
        self.col_defs.iter().position(|d| d.name == name)
    }

    pub fn data_type(&self, idx: usize) -> Option<DataType> {
        self.col_defs.get(idx).map(|d| d.data_type)
    }

    pub fn types(&self) -> Vec<DataType> {
        self.col_defs.iter().map(|d| d.data_type).collect()
    }

    pub fn has_sort_key(&self) -> bool {
        !self.sort_key.is_empty()
    }

    pub fn is_single_sort_key(&self) -> bool {
        self.sort_key.len() == 1
    }

    pub fn sort_key_idxs(&self) -> &[usize] {
        &self.sort_key
    }

    /// Index of the sole sort-key column. Callers check
    /// [`is_single_sort_key`](Self::is_single_sort_key) first.
    pub fn single_sort_key_idx(&self) -> usize {
        self.sort_key[0]
    }

    pub fn hidden_key_idx(&self) -> Option<usize> {
        self.hidden_key
    }

    pub fn block_max_rows(&self) -> u32 {
        self.block_max_rows
    }
}

/// Packs a hidden-key cell from segment, block, and row.
pub fn encode_hidden_key(segment: u64, block: u64, row: u32) -> u64 {
    (segment & 0xFFFF) << 48 | (block & 0xFFFF) << 32 | row as u64
}

/// Splits a hidden-key cell back into (segment, block, row).
pub fn decode_hidden_key(key: u64) -> (u64, u64, u32) {
    (key >> 48, (key >> 32) & 0xFFFF, key as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_col_schema() -> Schema {
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
        .unwrap()
    }

    #[test]
    fn lookups_by_name() {
        let s = two_col_schema();
        assert_eq!(s.col_idx("v"), Some(1));
        assert_eq!(s.col_idx("missing"), None);
        assert!(s.is_single_sort_key());
        assert_eq!(s.single_sort_key_idx(), 0);
    }

    #[test]
    fn hidden_key_must_be_u64() {
        let err = Schema::new(
            "t",
            vec![ColDef {
                name: "h".into(),
                data_type: DataType::Int64,
                idx: 0,
            }],
            &[],
            Some(0),
            4,
        );
        assert!(err.is_err());
    }

    #[test]
    fn hidden_key_round_trips() {
        let key = encode_hidden_key(7, 11, 123456);
        assert_eq!(decode_hidden_key(key), (7, 11, 123456));
    }

    #[test]
    fn sort_key_out_of_range_rejected() {
        let err = Schema::new(
            "t",
            vec![ColDef {
                name: "a".into(),
                data_type: DataType::Int64,
                idx: 0,
            }],
            &[3],
            None,
            4,
        );
        assert!(err.is_err());
    }
}
