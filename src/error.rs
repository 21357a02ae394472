//! # Engine Errors
//!
//! Every public operation on a block returns [`BlockError`] through the
//! crate [`Result`] alias. The variants are deliberately coarse: callers
//! are expected to match on the kind and act on it (retry on `WWConflict`,
//! treat `NotFound` as an empty result, abort on `Internal`), never to
//! parse messages.
//!
//! ## Propagation Rules
//!
//! - `NotFound`, `Duplicate` and `WWConflict` are surfaced to the caller
//!   unchanged; they are part of normal transactional operation.
//! - `PossibleDuplicate` is an internal signal from the immutable PK index
//!   and never escapes the block: the block resolves it against the sorted
//!   on-disk PK column before returning.
//! - I/O errors during replay fail the block open; I/O errors during
//!   destroy are logged and swallowed so close always completes.
//! - `Internal` marks an invariant violation and is never recovered from.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BlockError>;

#[derive(Error, Debug)]
pub enum BlockError {
    /// Row or key absent, deleted, or not visible at the read timestamp.
    #[error("not found")]
    NotFound,

    /// Primary key uniqueness violation on insert.
    #[error("duplicate key")]
    Duplicate,

    /// The membership filter cannot rule the key out; resolve against the
    /// sorted PK column. Internal to the block.
    #[error("possible duplicate key")]
    PossibleDuplicate,

    /// Write-write conflict with a committed or in-flight transaction. The
    /// caller must retry or abort.
    #[error("write-write conflict")]
    WWConflict,

    /// Append issued against an immutable block.
    #[error("block is not appendable")]
    NotAppendable,

    /// Append would exceed the block's row capacity.
    #[error("block is full")]
    Full,

    /// Attempt to update the synthetic hidden-key column.
    #[error("hidden key column cannot be updated")]
    UpdateHiddenKey,

    /// The block has been closed and rejects new operations.
    #[error("block is closed")]
    Closed,

    /// The block has been dropped through the catalog.
    #[error("block is dropped")]
    Dropped,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Invariant violation; indicates a bug in the engine.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BlockError {
    /// True for errors that are part of normal transactional control flow
    /// rather than failures of the engine itself.
    pub fn is_transactional(&self) -> bool {
        matches!(
            self,
            BlockError::NotFound | BlockError::Duplicate | BlockError::WWConflict
        )
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        BlockError::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transactional_kinds() {
        assert!(BlockError::NotFound.is_transactional());
        assert!(BlockError::Duplicate.is_transactional());
        assert!(BlockError::WWConflict.is_transactional());
        assert!(!BlockError::Full.is_transactional());
        assert!(!BlockError::NotAppendable.is_transactional());
        assert!(!BlockError::Closed.is_transactional());
        assert!(!BlockError::Dropped.is_transactional());
    }

    #[test]
    fn io_errors_convert() {
        let err: BlockError = io::Error::new(io::ErrorKind::Other, "disk").into();
        assert!(matches!(err, BlockError::Io(_)));
    }

    #[test]
    fn internal_carries_message() {
        let err = BlockError::internal("mask without value");
        assert!(matches!(err, BlockError::Internal(ref m) if m == "mask without value"));
    }

    #[test]
    fn display_is_stable() {
        assert_eq!(BlockError::WWConflict.to_string(), "write-write conflict");
        assert_eq!(BlockError::Duplicate.to_string(), "duplicate key");
        assert_eq!(
            BlockError::PossibleDuplicate.to_string(),
            "possible duplicate key"
        );
        assert_eq!(BlockError::Closed.to_string(), "block is closed");
    }
}
