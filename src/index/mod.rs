//! # Primary-Key Index
//!
//! Maps the byte-comparable encoding of a row's sort key to its row offset.
//! Two variants share the key representation:
//!
//! - [`MutableIndex`] for appendable blocks: an active map (key -> row) plus
//!   a tombstone map (key -> last delete), answering point lookups, dedup,
//!   and delete-visibility questions.
//! - [`ImmutableIndex`] for sealed blocks: a zone map over the sorted
//!   on-disk PK column answering `dedup` with `Absent` or
//!   `PossibleDuplicate`; possibles are resolved by the block against the
//!   sorted column itself.
//!
//! The index lock is the bottom of the block's lock hierarchy: it is only
//! ever taken while no attempt to take a handle or chain lock can follow.

pub mod immutable;
pub mod mutable;

pub use immutable::ImmutableIndex;
pub use mutable::{MutableIndex, Tombstone};

/// Answer of a membership probe on an immutable block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupResult {
    /// The key is definitely not in the block.
    Absent,
    /// The key may be in the block; resolve against the sorted PK column.
    PossibleDuplicate,
}
