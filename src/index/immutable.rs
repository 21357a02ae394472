//! # Immutable PK Index
//!
//! Membership filter for sealed blocks. The base PK column is stored sorted,
//! so a zone map (smallest and largest encoded key) rules out most foreign
//! keys in O(1); anything inside the range answers `PossibleDuplicate` and
//! the block resolves it by searching the sorted column itself.
//!
//! False positives are part of the contract; false negatives are not.

use parking_lot::RwLock;

use crate::error::{BlockError, Result};
use crate::index::DedupResult;

struct Zone {
    min: Box<[u8]>,
    max: Box<[u8]>,
    rows: u32,
}

#[derive(Default)]
pub struct ImmutableIndex {
    zone: RwLock<Option<Zone>>,
}

impl ImmutableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates the zone map from the block's encoded PK column, which is
    /// sorted on disk; the first and last keys bound the zone.
    pub fn read_from(&self, sorted_keys: &[Box<[u8]>]) -> Result<()> {
        let mut zone = self.zone.write();
        let (Some(first), Some(last)) = (sorted_keys.first(), sorted_keys.last()) else {
            *zone = None;
            return Ok(());
        };
        let min = first.clone();
        let max = last.clone();
        if min > max {
            return Err(BlockError::internal("pk column is not sorted"));
        }
        *zone = Some(Zone {
            min,
            max,
            rows: sorted_keys.len() as u32,
        });
        Ok(())
    }

    pub fn dedup(&self, key: &[u8]) -> DedupResult {
        let zone = self.zone.read();
        match zone.as_ref() {
            None => DedupResult::Absent,
            Some(z) if key < z.min.as_ref() || key > z.max.as_ref() => DedupResult::Absent,
            Some(_) => DedupResult::PossibleDuplicate,
        }
    }

    pub fn rows(&self) -> u32 {
        self.zone.read().as_ref().map_or(0, |z| z.rows)
    }

    pub fn destroy(&self) {
        *self.zone.write() = None;
    }
}
