//! # Typed Column Vectors
//!
//! [`ColumnVector`] is the in-memory representation of one column: a tagged
//! variant over typed `Vec`s. The appendable node's buffer, loaded base
//! columns, and materialised views all use this type, so `get_value`,
//! updates, and the file codec dispatch on a single tag.
//!
//! ## Payload Codec
//!
//! Fixed-width types encode as packed little-endian cells; Text/Blob cells
//! carry a `u32` length prefix each. The payload is framed by the column
//! file header (type tag, row count, crc), so the decoder validates the cell
//! count against the header after consuming the payload.

use crate::error::{BlockError, Result};
use crate::types::{DataType, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnVector {
    Bool(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float64(Vec<f64>),
    Text(Vec<String>),
    Blob(Vec<Vec<u8>>),
}

impl ColumnVector {
    pub fn new(data_type: DataType) -> Self {
        Self::with_capacity(data_type, 0)
    }

    pub fn with_capacity(data_type: DataType, cap: usize) -> Self {
        match data_type {
            DataType::Bool => ColumnVector::Bool(Vec::with_capacity(cap)),
            DataType::Int32 => ColumnVector::Int32(Vec::with_capacity(cap)),
            DataType::Int64 => ColumnVector::Int64(Vec::with_capacity(cap)),
            DataType::UInt64 => ColumnVector::UInt64(Vec::with_capacity(cap)),
            DataType::Float64 => ColumnVector::Float64(Vec::with_capacity(cap)),
            DataType::Text => ColumnVector::Text(Vec::with_capacity(cap)),
            DataType::Blob => ColumnVector::Blob(Vec::with_capacity(cap)),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ColumnVector::Bool(_) => DataType::Bool,
            ColumnVector::Int32(_) => DataType::Int32,
            ColumnVector::Int64(_) => DataType::Int64,
            ColumnVector::UInt64(_) => DataType::UInt64,
            ColumnVector::Float64(_) => DataType::Float64,
            ColumnVector::Text(_) => DataType::Text,
            ColumnVector::Blob(_) => DataType::Blob,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnVector::Bool(v) => v.len(),
            ColumnVector::Int32(v) => v.len(),
            ColumnVector::Int64(v) => v.len(),
            ColumnVector::UInt64(v) => v.len(),
            ColumnVector::Float64(v) => v.len(),
            ColumnVector::Text(v) => v.len(),
            ColumnVector::Blob(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, value: Value) -> Result<()> {
        match (self, value) {
            (ColumnVector::Bool(v), Value::Bool(x)) => v.push(x),
            (ColumnVector::Int32(v), Value::Int32(x)) => v.push(x),
            (ColumnVector::Int64(v), Value::Int64(x)) => v.push(x),
            (ColumnVector::UInt64(v), Value::UInt64(x)) => v.push(x),
            (ColumnVector::Float64(v), Value::Float64(x)) => v.push(x),
            (ColumnVector::Text(v), Value::Text(x)) => v.push(x),
            (ColumnVector::Blob(v), Value::Blob(x)) => v.push(x),
            (this, value) => {
                return Err(BlockError::internal(format!(
                    "type mismatch: pushing {:?} into {:?} column",
                    value.data_type(),
                    this.data_type()
                )))
            }
        }
        Ok(())
    }

    pub fn get(&self, row: usize) -> Option<Value> {
        match self {
            ColumnVector::Bool(v) => v.get(row).map(|x| Value::Bool(*x)),
            ColumnVector::Int32(v) => v.get(row).map(|x| Value::Int32(*x)),
            ColumnVector::Int64(v) => v.get(row).map(|x| Value::Int64(*x)),
            ColumnVector::UInt64(v) => v.get(row).map(|x| Value::UInt64(*x)),
            ColumnVector::Float64(v) => v.get(row).map(|x| Value::Float64(*x)),
            ColumnVector::Text(v) => v.get(row).map(|x| Value::Text(x.clone())),
            ColumnVector::Blob(v) => v.get(row).map(|x| Value::Blob(x.clone())),
        }
    }

    pub fn set(&mut self, row: usize, value: Value) -> Result<()> {
        if row >= self.len() {
            return Err(BlockError::internal(format!(
                "set row {row} out of bounds (len {})",
                self.len()
            )));
        }
        match (self, value) {
            (ColumnVector::Bool(v), Value::Bool(x)) => v[row] = x,
            (ColumnVector::Int32(v), Value::Int32(x)) => v[row] = x,
            (ColumnVector::Int64(v), Value::Int64(x)) => v[row] = x,
            (ColumnVector::UInt64(v), Value::UInt64(x)) => v[row] = x,
            (ColumnVector::Float64(v), Value::Float64(x)) => v[row] = x,
            (ColumnVector::Text(v), Value::Text(x)) => v[row] = x,
            (ColumnVector::Blob(v), Value::Blob(x)) => v[row] = x,
            (this, value) => {
                return Err(BlockError::internal(format!(
                    "type mismatch: setting {:?} into {:?} column",
                    value.data_type(),
                    this.data_type()
                )))
            }
        }
        Ok(())
    }

    /// Appends all cells of `other`, which must carry the same type tag.
    pub fn extend_from(&mut self, other: &ColumnVector) -> Result<()> {
        if self.data_type() != other.data_type() {
            return Err(BlockError::internal(format!(
                "type mismatch: extending {:?} column with {:?}",
                self.data_type(),
                other.data_type()
            )));
        }
        match (self, other) {
            (ColumnVector::Bool(v), ColumnVector::Bool(o)) => v.extend_from_slice(o),
            (ColumnVector::Int32(v), ColumnVector::Int32(o)) => v.extend_from_slice(o),
            (ColumnVector::Int64(v), ColumnVector::Int64(o)) => v.extend_from_slice(o),
            (ColumnVector::UInt64(v), ColumnVector::UInt64(o)) => v.extend_from_slice(o),
            (ColumnVector::Float64(v), ColumnVector::Float64(o)) => v.extend_from_slice(o),
            (ColumnVector::Text(v), ColumnVector::Text(o)) => v.extend_from_slice(o),
            (ColumnVector::Blob(v), ColumnVector::Blob(o)) => v.extend_from_slice(o),
            _ => unreachable!("tags checked above"),
        }
        Ok(())
    }

    /// Drops all rows at or after `len`.
    pub fn truncate(&mut self, len: usize) {
        match self {
            ColumnVector::Bool(v) => v.truncate(len),
            ColumnVector::Int32(v) => v.truncate(len),
            ColumnVector::Int64(v) => v.truncate(len),
            ColumnVector::UInt64(v) => v.truncate(len),
            ColumnVector::Float64(v) => v.truncate(len),
            ColumnVector::Text(v) => v.truncate(len),
            ColumnVector::Blob(v) => v.truncate(len),
        }
    }

    /// Returns an owned copy of rows `[start, end)`.
    pub fn window(&self, start: usize, end: usize) -> ColumnVector {
        let end = end.min(self.len());
        let start = start.min(end);
        match self {
            ColumnVector::Bool(v) => ColumnVector::Bool(v[start..end].to_vec()),
            ColumnVector::Int32(v) => ColumnVector::Int32(v[start..end].to_vec()),
            ColumnVector::Int64(v) => ColumnVector::Int64(v[start..end].to_vec()),
            ColumnVector::UInt64(v) => ColumnVector::UInt64(v[start..end].to_vec()),
            ColumnVector::Float64(v) => ColumnVector::Float64(v[start..end].to_vec()),
            ColumnVector::Text(v) => ColumnVector::Text(v[start..end].to_vec()),
            ColumnVector::Blob(v) => ColumnVector::Blob(v[start..end].to_vec()),
        }
    }

    /// Returns a copy with the rows in `deleted` removed, preserving order.
    pub fn filter_deleted(&self, deleted: &roaring::RoaringBitmap) -> ColumnVector {
        let mut out = ColumnVector::with_capacity(self.data_type(), self.len());
        for row in 0..self.len() {
            if deleted.contains(row as u32) {
                continue;
            }
            // Rows below len always decode; unwrap is fine here.
            out.push(self.get(row).expect("row in bounds")).expect("same tag");
        }
        out
    }

    /// Approximate heap footprint, used by the buffer manager's byte budget.
    pub fn mem_size(&self) -> usize {
        match self {
            ColumnVector::Bool(v) => v.len(),
            ColumnVector::Int32(v) => v.len() * 4,
            ColumnVector::Int64(v) => v.len() * 8,
            ColumnVector::UInt64(v) => v.len() * 8,
            ColumnVector::Float64(v) => v.len() * 8,
            ColumnVector::Text(v) => v.iter().map(|s| s.len() + 24).sum(),
            ColumnVector::Blob(v) => v.iter().map(|b| b.len() + 24).sum(),
        }
    }

    /// Appends the packed payload encoding of all cells to `buf`.
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        match self {
            ColumnVector::Bool(v) => {
                buf.extend(v.iter().map(|x| *x as u8));
            }
            ColumnVector::Int32(v) => {
                for x in v {
                    buf.extend_from_slice(&x.to_le_bytes());
                }
            }
            ColumnVector::Int64(v) => {
                for x in v {
                    buf.extend_from_slice(&x.to_le_bytes());
                }
            }
            ColumnVector::UInt64(v) => {
                for x in v {
                    buf.extend_from_slice(&x.to_le_bytes());
                }
            }
            ColumnVector::Float64(v) => {
                for x in v {
                    buf.extend_from_slice(&x.to_le_bytes());
                }
            }
            ColumnVector::Text(v) => {
                for x in v {
                    buf.extend_from_slice(&(x.len() as u32).to_le_bytes());
                    buf.extend_from_slice(x.as_bytes());
                }
            }
            ColumnVector::Blob(v) => {
                for x in v {
                    buf.extend_from_slice(&(x.len() as u32).to_le_bytes());
                    buf.extend_from_slice(x);
                }
            }
        }
    }

    /// Decodes a payload produced by [`encode_to`](Self::encode_to),
    /// expecting exactly `rows` cells of `data_type`.
    pub fn decode(data_type: DataType, rows: usize, payload: &[u8]) -> Result<ColumnVector> {
        let mut out = ColumnVector::with_capacity(data_type, rows);
        let mut off = 0usize;
        for _ in 0..rows {
            match data_type {
                DataType::Bool => {
                    let b = *payload.get(off).ok_or_else(|| truncated(data_type))?;
                    out.push(Value::Bool(b != 0))?;
                    off += 1;
                }
                DataType::Int32 => {
                    out.push(Value::Int32(i32::from_le_bytes(fixed::<4>(payload, off)?)))?;
                    off += 4;
                }
                DataType::Int64 => {
                    out.push(Value::Int64(i64::from_le_bytes(fixed::<8>(payload, off)?)))?;
                    off += 8;
                }
                DataType::UInt64 => {
                    out.push(Value::UInt64(u64::from_le_bytes(fixed::<8>(payload, off)?)))?;
                    off += 8;
                }
                DataType::Float64 => {
                    out.push(Value::Float64(f64::from_le_bytes(fixed::<8>(
                        payload, off,
                    )?)))?;
                    off += 8;
                }
                DataType::Text => {
                    let len = u32::from_le_bytes(fixed::<4>(payload, off)?) as usize;
                    let bytes = payload
                        .get(off + 4..off + 4 + len)
                        .ok_or_else(|| truncated(data_type))?;
                    let s = std::str::from_utf8(bytes)
                        .map_err(|e| BlockError::internal(format!("invalid utf8 cell: {e}")))?;
                    out.push(Value::Text(s.to_owned()))?;
                    off += 4 + len;
                }
                DataType::Blob => {
                    let len = u32::from_le_bytes(fixed::<4>(payload, off)?) as usize;
                    let bytes = payload
                        .get(off + 4..off + 4 + len)
                        .ok_or_else(|| truncated(data_type))?;
                    out.push(Value::Blob(bytes.to_vec()))?;
                    off += 4 + len;
                }
            }
        }
        if off != payload.len() {
            return Err(BlockError::internal(format!(
                "column payload has {} trailing bytes",
                payload.len() - off
            )));
        }
        Ok(out)
    }
}

fn fixed<const N: usize>(payload: &[u8], off: usize) -> Result<[u8; N]> {
    let bytes = payload
        .get(off..off + N)
        .ok_or_else(|| BlockError::internal("truncated column payload"))?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn truncated(data_type: DataType) -> BlockError {
    BlockError::internal(format!("truncated {data_type:?} column payload"))
}
