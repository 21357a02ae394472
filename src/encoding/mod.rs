//! # Byte-Comparable Key Encoding
//!
//! The PK index stores sort-key values as encoded byte strings whose
//! lexicographic order matches the typed sort order. A single `memcmp`
//! compares keys of any sort-key shape, and compound sort keys are just the
//! concatenation of their columns' encodings.

pub mod key;

pub use key::{encode_compound_key, encode_value, type_prefix, KeyBytes};
