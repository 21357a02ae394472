//! # Key Encoding
//!
//! Encodes cell values into byte-comparable keys for the PK index.
//!
//! ## Design Goals
//!
//! 1. **Byte-comparable**: encoded keys preserve sort order under
//!    lexicographic comparison
//! 2. **Type-aware ordering**: booleans < numbers < text < blobs
//! 3. **Compound support**: concatenated encodings order correctly because
//!    every encoding is self-delimiting
//! 4. **Deterministic**: the same value always produces the same bytes
//!
//! ## Type Prefix Scheme
//!
//! Each encoded value starts with a prefix byte fixing the order between
//! types:
//!
//! ```text
//! 0x02-0x03  Booleans (FALSE < TRUE)
//! 0x12       Negative integers (two's complement, bits inverted order)
//! 0x13       Negative floats
//! 0x14       Zero
//! 0x15       Positive floats
//! 0x16       Positive integers
//! 0x20       Text (escape-encoded, 0x00 0x00 terminator)
//! 0x21       Blob (escape-encoded, 0x00 0x00 terminator)
//! ```
//!
//! ## Number Encoding
//!
//! Integers use a sign split: negatives encode with the NEG_INT prefix and
//! their offset-binary big-endian bytes; zero is the ZERO prefix alone;
//! positives use POS_INT plus big-endian bytes. This yields
//! `-100 < -1 < 0 < 1 < 100` bytewise. Floats map through the standard IEEE
//! 754 trick: negative floats invert all bits, positive floats flip the
//! sign bit.
//!
//! ## Text/Blob Encoding
//!
//! Variable-width values escape embedded `0x00`/`0xFF` bytes and terminate
//! with `0x00 0x00`, so a shorter string that is a prefix of a longer one
//! sorts first and the terminator never collides with content.

use crate::types::Value;

/// An encoded, memcmp-ordered index key.
pub type KeyBytes = Box<[u8]>;

pub mod type_prefix {
    pub const FALSE: u8 = 0x02;
    pub const TRUE: u8 = 0x03;

    pub const NEG_INT: u8 = 0x12;
    pub const NEG_FLOAT: u8 = 0x13;
    pub const ZERO: u8 = 0x14;
    pub const POS_FLOAT: u8 = 0x15;
    pub const POS_INT: u8 = 0x16;

    pub const TEXT: u8 = 0x20;
    pub const BLOB: u8 = 0x21;
}

/// Appends the byte-comparable encoding of `value` to `buf`.
pub fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Bool(false) => buf.push(type_prefix::FALSE),
        Value::Bool(true) => buf.push(type_prefix::TRUE),
        Value::Int32(v) => encode_int(*v as i64, buf),
        Value::Int64(v) => encode_int(*v, buf),
        Value::UInt64(v) => encode_uint(*v, buf),
        Value::Float64(v) => encode_float(*v, buf),
        Value::Text(s) => encode_bytes(type_prefix::TEXT, s.as_bytes(), buf),
        Value::Blob(b) => encode_bytes(type_prefix::BLOB, b, buf),
    }
}

/// Encodes a compound key by concatenating the column encodings in order.
pub fn encode_compound_key(values: &[Value]) -> KeyBytes {
    let mut buf = Vec::with_capacity(values.len() * 10);
    for v in values {
        encode_value(v, &mut buf);
    }
    buf.into_boxed_slice()
}

fn encode_int(v: i64, buf: &mut Vec<u8>) {
    match v {
        0 => buf.push(type_prefix::ZERO),
        v if v > 0 => {
            buf.push(type_prefix::POS_INT);
            buf.extend_from_slice(&(v as u64).to_be_bytes());
        }
        v => {
            // Offset-binary: adding i64::MIN's magnitude makes the
            // big-endian bytes of more-negative values smaller.
            buf.push(type_prefix::NEG_INT);
            buf.extend_from_slice(&(v as u64 ^ (1 << 63)).to_be_bytes());
        }
    }
}

fn encode_uint(v: u64, buf: &mut Vec<u8>) {
    if v == 0 {
        buf.push(type_prefix::ZERO);
    } else {
        buf.push(type_prefix::POS_INT);
        buf.extend_from_slice(&v.to_be_bytes());
    }
}

fn encode_float(v: f64, buf: &mut Vec<u8>) {
    if v == 0.0 {
        buf.push(type_prefix::ZERO);
        return;
    }
    let bits = v.to_bits();
    if v < 0.0 {
        buf.push(type_prefix::NEG_FLOAT);
        buf.extend_from_slice(&(!bits).to_be_bytes());
    } else {
        buf.push(type_prefix::POS_FLOAT);
        buf.extend_from_slice(&(bits ^ (1 << 63)).to_be_bytes());
    }
}

fn encode_bytes(prefix: u8, bytes: &[u8], buf: &mut Vec<u8>) {
    buf.push(prefix);
    for b in bytes {
        match b {
            0x00 => buf.extend_from_slice(&[0x00, 0xFF]),
            0xFF => buf.extend_from_slice(&[0xFF, 0x00]),
            b => buf.push(*b),
        }
    }
    buf.extend_from_slice(&[0x00, 0x00]);
}
