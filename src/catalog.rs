//! # Catalog Contract
//!
//! The catalog proper (schemas, table and segment lifecycle, DDL) lives
//! outside this crate. A block consumes only this slice of it: its identity,
//! its schema reference, whether it is appendable, and the state bits the
//! compaction driver must respect (dropped, active DDL transaction).
//!
//! The meta lock sits at the top of the lock hierarchy: it is only ever
//! taken before any block-internal lock, and only for short reads.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::schema::Schema;

/// Identity of a block: database, table, segment, block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub db: u64,
    pub table: u64,
    pub segment: u64,
    pub block: u64,
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.db, self.table, self.segment, self.block
        )
    }
}

#[derive(Debug, Default)]
struct MetaState {
    dropped_committed: bool,
    dropped_uncommitted: bool,
    active_txn: bool,
}

/// The block's view of its catalog entry.
///
/// `appendable` is fixed at creation: an appendable block becomes immutable
/// only by being replaced through compaction, never in place, so the mode
/// cannot regress.
#[derive(Debug)]
pub struct BlockMeta {
    id: BlockId,
    schema: Arc<Schema>,
    appendable: bool,
    state: RwLock<MetaState>,
}

impl BlockMeta {
    pub fn new(id: BlockId, schema: Arc<Schema>, appendable: bool) -> Self {
        Self {
            id,
            schema,
            appendable,
            state: RwLock::new(MetaState::default()),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn is_appendable(&self) -> bool {
        self.appendable
    }

    pub fn block_max_rows(&self) -> u32 {
        self.schema.block_max_rows()
    }

    pub fn is_dropped_committed(&self) -> bool {
        self.state.read().dropped_committed
    }

    pub fn is_dropped_uncommitted(&self) -> bool {
        self.state.read().dropped_uncommitted
    }

    pub fn has_active_txn(&self) -> bool {
        self.state.read().active_txn
    }

    pub fn set_dropped_committed(&self) {
        let mut state = self.state.write();
        state.dropped_committed = true;
        state.dropped_uncommitted = false;
    }

    pub fn set_dropped_uncommitted(&self) {
        self.state.write().dropped_uncommitted = true;
    }

    pub fn set_active_txn(&self, active: bool) {
        self.state.write().active_txn = active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColDef;
    use crate::types::DataType;

    fn meta() -> BlockMeta {
        let schema = Arc::new(
            Schema::new(
                "t",
                vec![ColDef {
                    name: "pk".into(),
                    data_type: DataType::Int64,
                    idx: 0,
                }],
                &[0],
                None,
                8,
            )
            .unwrap(),
        );
        BlockMeta::new(
            BlockId {
                db: 1,
                table: 2,
                segment: 3,
                block: 4,
            },
            schema,
            true,
        )
    }

    #[test]
    fn id_renders_as_path() {
        assert_eq!(meta().id().to_string(), "1/2/3/4");
    }

    #[test]
    fn drop_committed_clears_uncommitted() {
        let m = meta();
        m.set_dropped_uncommitted();
        assert!(m.is_dropped_uncommitted());
        m.set_dropped_committed();
        assert!(m.is_dropped_committed());
        assert!(!m.is_dropped_uncommitted());
    }
}
