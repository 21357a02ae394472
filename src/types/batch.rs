//! # Column Batches
//!
//! A [`Batch`] is an ordered set of equal-length column vectors: one logical
//! run of rows, either handed to `append` by a writer or materialised by a
//! block view. Column order follows the schema's column order.

use crate::error::{BlockError, Result};
use crate::types::{ColumnVector, DataType, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    columns: Vec<ColumnVector>,
}

impl Batch {
    /// Builds a batch from columns, validating equal lengths.
    pub fn new(columns: Vec<ColumnVector>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let rows = first.len();
            if columns.iter().any(|c| c.len() != rows) {
                return Err(BlockError::internal("batch columns have unequal lengths"));
            }
        }
        Ok(Self { columns })
    }

    /// An empty batch with one column per entry in `types`.
    pub fn empty(types: &[DataType]) -> Self {
        Self {
            columns: types.iter().map(|t| ColumnVector::new(*t)).collect(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, |c| c.len())
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, idx: usize) -> Option<&ColumnVector> {
        self.columns.get(idx)
    }

    pub fn column_mut(&mut self, idx: usize) -> Option<&mut ColumnVector> {
        self.columns.get_mut(idx)
    }

    pub fn columns(&self) -> &[ColumnVector] {
        &self.columns
    }

    pub fn value(&self, row: usize, col: usize) -> Option<Value> {
        self.columns.get(col).and_then(|c| c.get(row))
    }

    /// Appends all rows of `other`; schemas must match column for column.
    pub fn extend_from(&mut self, other: &Batch) -> Result<()> {
        if self.columns.len() != other.columns.len() {
            return Err(BlockError::internal("batch column count mismatch"));
        }
        for (dst, src) in self.columns.iter_mut().zip(&other.columns) {
            dst.extend_from(src)?;
        }
        Ok(())
    }

    /// Drops all rows at or after `rows` from every column.
    pub fn truncate(&mut self, rows: usize) {
        for col in &mut self.columns {
            col.truncate(rows);
        }
    }

    pub fn mem_size(&self) -> usize {
        self.columns.iter().map(|c| c.mem_size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_col(vals: &[i64]) -> ColumnVector {
        let mut c = ColumnVector::new(DataType::Int64);
        for v in vals {
            c.push(Value::Int64(*v)).unwrap();
        }
        c
    }

    #[test]
    fn rejects_unequal_columns() {
        assert!(Batch::new(vec![int_col(&[1, 2]), int_col(&[1])]).is_err());
    }

    #[test]
    fn extend_appends_rows() {
        let mut b = Batch::new(vec![int_col(&[1]), int_col(&[10])]).unwrap();
        let more = Batch::new(vec![int_col(&[2, 3]), int_col(&[20, 30])]).unwrap();
        b.extend_from(&more).unwrap();
        assert_eq!(b.row_count(), 3);
        assert_eq!(b.value(2, 1), Some(Value::Int64(30)));
    }
}
