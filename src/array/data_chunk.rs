// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use itertools::Itertools;
use smallvec::SmallVec;

use super::{ArrayBuilderImpl, ArrayImpl};
use crate::types::{DataType, DataValue};

/// A columnar batch of rows with a bounded capacity.
///
/// A chunk is the unit of data flow between executors. Unlike a finished
/// array, a chunk is mutable: an operator appends rows column by column,
/// hands the chunk to its consumer, and gets it back for reuse after the
/// consumer swaps the columns out. `reset` drops the rows but keeps the
/// allocations, so a recycled chunk costs nothing to refill.
///
/// Invariants: all columns have the same length, which never exceeds the
/// capacity. A chunk built for zero-column output (e.g. `COUNT(*)` plans
/// with no aggregate columns) tracks its row count in `num_virtual_rows`.
pub struct DataChunk {
    columns: SmallVec<[ArrayBuilderImpl; 16]>,
    capacity: usize,
    num_virtual_rows: usize,
}

impl DataChunk {
    /// Create an empty chunk for the given column types.
    ///
    /// `reserve` rows are pre-allocated; the chunk accepts up to `capacity`
    /// rows, growing the column buffers on demand.
    pub fn with_capacity(types: &[DataType], reserve: usize, capacity: usize) -> Self {
        assert_ne!(capacity, 0, "chunk capacity must be positive");
        let columns = types
            .iter()
            .map(|ty| ArrayBuilderImpl::with_capacity(reserve.min(capacity), ty))
            .collect();
        DataChunk {
            columns,
            capacity,
            num_virtual_rows: 0,
        }
    }

    /// Create an empty chunk with `capacity` rows pre-allocated.
    pub fn new(types: &[DataType], capacity: usize) -> Self {
        Self::with_capacity(types, capacity, capacity)
    }

    /// The number of rows in the chunk.
    pub fn num_rows(&self) -> usize {
        match self.columns.first() {
            Some(col) => col.len(),
            None => self.num_virtual_rows,
        }
    }

    /// The maximum number of rows the chunk accepts.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the chunk reached its capacity.
    pub fn is_full(&self) -> bool {
        self.num_rows() >= self.capacity
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Set the logical row count of a zero-column chunk.
    pub fn set_num_virtual_rows(&mut self, rows: usize) {
        self.num_virtual_rows = rows;
    }

    /// Remove all rows, keeping the column allocations.
    pub fn reset(&mut self) {
        for col in &mut self.columns {
            col.clear();
        }
        self.num_virtual_rows = 0;
    }

    /// Exchange the columns of two chunks in O(1).
    pub fn swap_columns(&mut self, other: &mut DataChunk) {
        std::mem::swap(&mut self.columns, &mut other.columns);
        std::mem::swap(&mut self.num_virtual_rows, &mut other.num_virtual_rows);
    }

    /// Append a value to the column at `col_idx`.
    ///
    /// Panics if the value type does not match the column type.
    pub fn append_value(&mut self, col_idx: usize, value: &DataValue) {
        self.columns[col_idx].push(value);
    }

    /// Append one row to the chunk.
    ///
    /// The length of the row must equal the number of columns.
    pub fn append_row(&mut self, row: impl IntoIterator<Item = DataValue>) {
        self.columns
            .iter_mut()
            .zip_eq(row)
            .for_each(|(col, v)| col.push(&v));
    }

    /// Append the rows `begin..end` of another chunk.
    pub fn append_rows(&mut self, other: &DataChunk, begin: usize, end: usize) {
        for row_idx in begin..end {
            for (col, other_col) in self.columns.iter_mut().zip_eq(&other.columns) {
                col.push(&other_col.get(row_idx));
            }
        }
        if other.columns.is_empty() {
            self.num_virtual_rows += end - begin;
        }
    }

    /// The value at the given row and column.
    pub fn value_at(&self, row_idx: usize, col_idx: usize) -> DataValue {
        self.columns[col_idx].get(row_idx)
    }

    /// Get a reference to the row at the given index.
    pub fn row(&self, idx: usize) -> RowRef<'_> {
        debug_assert!(idx < self.num_rows());
        RowRef { chunk: self, idx }
    }

    /// Get an iterator over the rows.
    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        (0..self.num_rows()).map(|idx| self.row(idx))
    }

    /// Materialize the column at `col_idx` as an immutable array.
    pub fn column_array(&self, col_idx: usize) -> ArrayImpl {
        self.columns[col_idx].finish_cloned()
    }

    /// Estimated size of the chunk contents in memory.
    pub fn memory_usage(&self) -> usize {
        self.columns.iter().map(|col| col.estimated_size()).sum()
    }
}

/// Reference to a row in a [`DataChunk`].
#[derive(Clone, Copy)]
pub struct RowRef<'a> {
    chunk: &'a DataChunk,
    idx: usize,
}

impl RowRef<'_> {
    pub fn value_at(&self, col_idx: usize) -> DataValue {
        self.chunk.value_at(self.idx, col_idx)
    }

    /// Get an iterator over the values of the row.
    pub fn values(&self) -> impl Iterator<Item = DataValue> + '_ {
        (0..self.chunk.column_count()).map(|col_idx| self.value_at(col_idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataTypeExt, DataTypeKind};

    fn chunk_i64_str(capacity: usize) -> DataChunk {
        DataChunk::new(
            &[
                DataTypeKind::Int64.nullable(),
                DataTypeKind::String.nullable(),
            ],
            capacity,
        )
    }

    #[test]
    fn append_and_read() {
        let mut chunk = chunk_i64_str(4);
        chunk.append_row([DataValue::Int64(1), DataValue::String("a".into())]);
        chunk.append_row([DataValue::Null, DataValue::String("b".into())]);
        assert_eq!(chunk.num_rows(), 2);
        assert!(!chunk.is_full());
        assert_eq!(chunk.value_at(0, 0), DataValue::Int64(1));
        assert_eq!(chunk.value_at(1, 0), DataValue::Null);
        assert_eq!(
            chunk.row(1).values().collect::<Vec<_>>(),
            vec![DataValue::Null, DataValue::String("b".into())]
        );
    }

    #[test]
    fn full_and_reset() {
        let mut chunk = chunk_i64_str(2);
        chunk.append_row([DataValue::Int64(1), DataValue::String("a".into())]);
        chunk.append_row([DataValue::Int64(2), DataValue::String("b".into())]);
        assert!(chunk.is_full());
        assert!(chunk.memory_usage() > 0);
        chunk.reset();
        assert_eq!(chunk.num_rows(), 0);
        assert!(!chunk.is_full());
        assert_eq!(chunk.memory_usage(), 0);
    }

    #[test]
    fn swap_columns() {
        let mut a = chunk_i64_str(4);
        a.append_row([DataValue::Int64(7), DataValue::String("x".into())]);
        let mut b = chunk_i64_str(4);
        a.swap_columns(&mut b);
        assert_eq!(a.num_rows(), 0);
        assert_eq!(b.num_rows(), 1);
        assert_eq!(b.value_at(0, 1), DataValue::String("x".into()));
    }

    #[test]
    fn virtual_rows() {
        let mut chunk = DataChunk::new(&[], 4);
        assert_eq!(chunk.num_rows(), 0);
        chunk.set_num_virtual_rows(3);
        assert_eq!(chunk.num_rows(), 3);
        chunk.reset();
        assert_eq!(chunk.num_rows(), 0);
    }
}
