//! # Transaction Contract
//!
//! The transaction manager lives outside this crate; the engine only needs
//! the contract "a transaction supplies a start timestamp, a commit
//! timestamp assigned at commit, a monotonically assigned identity, and an
//! observable aborted flag". [`Txn`] is that contract made concrete.
//!
//! ## Lifecycle
//!
//! ```text
//! ┌─────────┐   apply_commit(ts)   ┌───────────┐
//! │ Active  │ ──────────────────>  │ Committed │
//! └─────────┘                      └───────────┘
//!      │
//!      │ apply_abort()
//!      v
//! ┌─────────┐
//! │ Aborted │
//! └─────────┘
//! ```
//!
//! ## Ownership
//!
//! MVCC nodes hold `Arc<Txn>` back-references used only for visibility and
//! conflict decisions; the transaction never owns a node. Commit application
//! on the block stamps the commit timestamp into the txn's nodes and drops
//! the back-references, so a long-lived block does not pin transactions.
//!
//! ## Concurrency
//!
//! State and commit timestamp are atomics: the commit timestamp is stored
//! before the state flips to `Committed` (release ordering), so any reader
//! that observes `Committed` also observes the final timestamp.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::error::{BlockError, Result};

pub type TxnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnState {
    #[default]
    Active,
    Committed,
    Aborted,
}

const STATE_ACTIVE: u8 = 0;
const STATE_COMMITTED: u8 = 1;
const STATE_ABORTED: u8 = 2;

#[derive(Debug)]
pub struct Txn {
    id: TxnId,
    start_ts: u64,
    commit_ts: AtomicU64,
    state: AtomicU8,
}

impl Txn {
    pub fn new(id: TxnId, start_ts: u64) -> Self {
        Self {
            id,
            start_ts,
            commit_ts: AtomicU64::new(0),
            state: AtomicU8::new(STATE_ACTIVE),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn start_ts(&self) -> u64 {
        self.start_ts
    }

    /// Commit timestamp, or 0 while the transaction has not committed.
    pub fn commit_ts(&self) -> u64 {
        if self.state() == TxnState::Committed {
            self.commit_ts.load(Ordering::Acquire)
        } else {
            0
        }
    }

    pub fn state(&self) -> TxnState {
        match self.state.load(Ordering::Acquire) {
            STATE_ACTIVE => TxnState::Active,
            STATE_COMMITTED => TxnState::Committed,
            _ => TxnState::Aborted,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == TxnState::Active
    }

    pub fn is_committed(&self) -> bool {
        self.state() == TxnState::Committed
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == TxnState::Aborted
    }

    /// Marks the transaction committed at `commit_ts`. Driven by the
    /// external manager (directly or through `Block::commit_txn`).
    pub fn apply_commit(&self, commit_ts: u64) -> Result<()> {
        if commit_ts <= self.start_ts {
            return Err(BlockError::internal(format!(
                "commit ts {commit_ts} not after start ts {}",
                self.start_ts
            )));
        }
        self.commit_ts.store(commit_ts, Ordering::Release);
        match self.state.compare_exchange(
            STATE_ACTIVE,
            STATE_COMMITTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(STATE_COMMITTED) => Ok(()),
            Err(_) => Err(BlockError::internal("commit of aborted transaction")),
        }
    }

    /// Marks the transaction aborted. Idempotent; committing afterwards is
    /// an error.
    pub fn apply_abort(&self) {
        let _ = self.state.compare_exchange(
            STATE_ACTIVE,
            STATE_ABORTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}
