//! # Runtime Cell Values
//!
//! [`Value`] is the owned, runtime-typed representation of a single cell.
//! It flows through point reads (`get_value`), column updates (update nodes
//! store the new cell in the same variant), PK filters, and the update-blob
//! codec.
//!
//! ## Byte Codec
//!
//! Values serialize as `tag:u8` followed by a little-endian payload;
//! variable-width types carry a `u32` length prefix. The codec is used by
//! the updates blob, where cells of mixed rows are written back to back, so
//! it is self-delimiting. All parsing is bounds-checked: a truncated buffer
//! surfaces as an `Internal` error rather than a panic.

use crate::error::{BlockError, Result};
use crate::types::DataType;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::Bool,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::UInt64(_) => DataType::UInt64,
            Value::Float64(_) => DataType::Float64,
            Value::Text(_) => DataType::Text,
            Value::Blob(_) => DataType::Blob,
        }
    }

    /// Appends the encoded form of this value to `buf`.
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.data_type().tag() as u8);
        match self {
            Value::Bool(v) => buf.push(*v as u8),
            Value::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::UInt64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Float64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Text(v) => {
                buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
                buf.extend_from_slice(v.as_bytes());
            }
            Value::Blob(v) => {
                buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
                buf.extend_from_slice(v);
            }
        }
    }

    /// Decodes one value from the front of `buf`, returning it and the
    /// number of bytes consumed.
    pub fn decode_from(buf: &[u8]) -> Result<(Value, usize)> {
        let tag = *buf.first().ok_or_else(|| truncated("value tag"))?;
        let body = &buf[1..];
        let (value, used) = match DataType::from_tag(tag as u32)? {
            DataType::Bool => {
                let b = *body.first().ok_or_else(|| truncated("bool"))?;
                (Value::Bool(b != 0), 1)
            }
            DataType::Int32 => (Value::Int32(i32::from_le_bytes(take::<4>(body, "i32")?)), 4),
            DataType::Int64 => (Value::Int64(i64::from_le_bytes(take::<8>(body, "i64")?)), 8),
            DataType::UInt64 => (Value::UInt64(u64::from_le_bytes(take::<8>(body, "u64")?)), 8),
            DataType::Float64 => (
                Value::Float64(f64::from_le_bytes(take::<8>(body, "f64")?)),
                8,
            ),
            DataType::Text => {
                let len = u32::from_le_bytes(take::<4>(body, "text len")?) as usize;
                let bytes = body
                    .get(4..4 + len)
                    .ok_or_else(|| truncated("text body"))?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| BlockError::internal(format!("invalid utf8 cell: {e}")))?;
                (Value::Text(s.to_owned()), 4 + len)
            }
            DataType::Blob => {
                let len = u32::from_le_bytes(take::<4>(body, "blob len")?) as usize;
                let bytes = body
                    .get(4..4 + len)
                    .ok_or_else(|| truncated("blob body"))?;
                (Value::Blob(bytes.to_vec()), 4 + len)
            }
        };
        Ok((value, 1 + used))
    }

    pub fn as_u64(&self) -> Result<u64> {
        match self {
            Value::UInt64(v) => Ok(*v),
            other => Err(BlockError::internal(format!(
                "expected u64 cell, got {:?}",
                other.data_type()
            ))),
        }
    }
}

fn take<const N: usize>(buf: &[u8], what: &str) -> Result<[u8; N]> {
    let bytes = buf.get(..N).ok_or_else(|| truncated(what))?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn truncated(what: &str) -> BlockError {
    BlockError::internal(format!("truncated value encoding: {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) {
        let mut buf = Vec::new();
        v.encode_to(&mut buf);
        let (decoded, used) = Value::decode_from(&buf).unwrap();
        assert_eq!(decoded, v);
        assert_eq!(used, buf.len());
    }

    #[test]
    fn codec_round_trips() {
        round_trip(Value::Bool(true));
        round_trip(Value::Int32(-7));
        round_trip(Value::Int64(i64::MIN));
        round_trip(Value::UInt64(u64::MAX));
        round_trip(Value::Float64(3.5));
        round_trip(Value::Text("hello".into()));
        round_trip(Value::Blob(vec![0, 255, 3]));
    }

    #[test]
    fn decode_consumes_exact_prefix() {
        let mut buf = Vec::new();
        Value::Int32(42).encode_to(&mut buf);
        Value::Text("tail".into()).encode_to(&mut buf);
        let (first, used) = Value::decode_from(&buf).unwrap();
        assert_eq!(first, Value::Int32(42));
        let (second, _) = Value::decode_from(&buf[used..]).unwrap();
        assert_eq!(second, Value::Text("tail".into()));
    }

    #[test]
    fn truncated_buffer_is_internal_error() {
        let mut buf = Vec::new();
        Value::Int64(1).encode_to(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(matches!(
            Value::decode_from(&buf),
            Err(BlockError::Internal(_))
        ));
    }
}
