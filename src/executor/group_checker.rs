// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use super::group_key::{encode_cell, normalize_str};
use crate::array::{Array, ArrayImpl, DataChunk};
use crate::executor::ExecutorError;
use crate::expr::{Collation, Expression};

/// Splits chunks into runs of rows sharing the same group key, for the
/// streaming aggregator.
///
/// The checker evaluates the group-by expressions columnarly and compares
/// adjacent rows per typed array, so no row values are boxed. The only state
/// carried between chunks is the encoded key of the previous chunk's last
/// group.
pub struct VecGroupChecker {
    group_by: Vec<Expression>,
    /// End offset of each group in the current chunk.
    group_offsets: Vec<usize>,
    /// Index of the next group to be consumed.
    next_group: usize,
    /// Encoded key of the last group of the previous chunk.
    last_key_of_prev_chunk: Option<Vec<u8>>,
    same_group: Vec<bool>,
    first_key: Vec<u8>,
    last_key: Vec<u8>,
}

impl VecGroupChecker {
    pub fn new(group_by: Vec<Expression>) -> Self {
        VecGroupChecker {
            group_by,
            group_offsets: Vec::new(),
            next_group: 0,
            last_key_of_prev_chunk: None,
            same_group: Vec::with_capacity(1024),
            first_key: Vec::new(),
            last_key: Vec::new(),
        }
    }

    /// Split a non-empty chunk into groups.
    ///
    /// Returns whether the first group continues the last group of the
    /// previous chunk.
    pub fn split_into_groups(&mut self, chunk: &DataChunk) -> Result<bool, ExecutorError> {
        let num_rows = chunk.num_rows();
        debug_assert!(num_rows > 0, "the fetcher never passes an empty chunk");

        self.group_offsets.clear();
        self.next_group = 0;

        // With no group-by items the whole input is one group.
        if self.group_by.is_empty() {
            self.group_offsets.push(num_rows);
            return Ok(true);
        }

        let arrays = self
            .group_by
            .iter()
            .map(|expr| expr.eval(chunk))
            .collect::<Result<Vec<_>, _>>()?;

        self.first_key.clear();
        self.last_key.clear();
        for (expr, array) in self.group_by.iter().zip(&arrays) {
            encode_cell(&mut self.first_key, expr, array, 0);
            encode_cell(&mut self.last_key, expr, array, num_rows - 1);
        }

        let continues_prev = match &self.last_key_of_prev_chunk {
            Some(prev) => *prev == self.first_key,
            None => false,
        };
        match &mut self.last_key_of_prev_chunk {
            Some(prev) => {
                prev.clear();
                prev.extend_from_slice(&self.last_key);
            }
            None => self.last_key_of_prev_chunk = Some(self.last_key.clone()),
        }

        // The whole chunk is one group.
        if self.first_key == self.last_key {
            self.group_offsets.push(num_rows);
            return Ok(continues_prev);
        }

        self.same_group.clear();
        self.same_group.push(false);
        self.same_group.extend(std::iter::repeat(true).take(num_rows - 1));

        for (expr, array) in self.group_by.iter().zip(&arrays) {
            compare_adjacent_rows(expr, array, &mut self.same_group);
        }

        for (i, same) in self.same_group.iter().enumerate().skip(1) {
            if !same {
                self.group_offsets.push(i);
            }
        }
        self.group_offsets.push(num_rows);
        Ok(continues_prev)
    }

    /// The next `(begin, end)` group range of the current chunk.
    pub fn next_group(&mut self) -> Option<(usize, usize)> {
        if self.is_exhausted() {
            return None;
        }
        let begin = if self.next_group == 0 {
            0
        } else {
            self.group_offsets[self.next_group - 1]
        };
        let end = self.group_offsets[self.next_group];
        self.next_group += 1;
        Some((begin, end))
    }

    pub fn is_exhausted(&self) -> bool {
        self.next_group >= self.group_offsets.len()
    }

    /// Forget all state, including the previous chunk's tail key.
    pub fn reset(&mut self) {
        self.group_offsets.clear();
        self.next_group = 0;
        self.last_key_of_prev_chunk = None;
        self.same_group.clear();
    }
}

/// Clear `same_group[i]` wherever `array` differs between rows `i - 1` and
/// `i`. Null/not-null parity counts as a difference.
fn compare_adjacent_rows(expr: &Expression, array: &ArrayImpl, same_group: &mut [bool]) {
    let num_rows = same_group.len();
    // `Option` equality covers null parity: two nulls compare equal, a null
    // and a value do not.
    macro_rules! check_adjacent {
        ($a:expr) => {
            for i in 1..num_rows {
                if same_group[i] && $a.get(i) != $a.get(i - 1) {
                    same_group[i] = false;
                }
            }
        };
    }
    match array {
        ArrayImpl::Bool(a) => check_adjacent!(a),
        ArrayImpl::Int32(a) => check_adjacent!(a),
        ArrayImpl::Int64(a) => check_adjacent!(a),
        ArrayImpl::Float64(a) => check_adjacent!(a),
        ArrayImpl::Decimal(a) => check_adjacent!(a),
        ArrayImpl::Date(a) => check_adjacent!(a),
        ArrayImpl::Timestamp(a) => check_adjacent!(a),
        ArrayImpl::Interval(a) => check_adjacent!(a),
        ArrayImpl::String(a) => match expr.collation() {
            Collation::Binary => check_adjacent!(a),
            collation => {
                for i in 1..num_rows {
                    if !same_group[i] {
                        continue;
                    }
                    let same = match (a.get(i), a.get(i - 1)) {
                        (Some(x), Some(y)) => {
                            normalize_str(x, collation) == normalize_str(y, collation)
                        }
                        (None, None) => true,
                        _ => false,
                    };
                    if !same {
                        same_group[i] = false;
                    }
                }
            }
        },
        ArrayImpl::Blob(a) => check_adjacent!(a),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataTypeExt, DataTypeKind, DataValue};

    fn int_chunk(values: &[Option<i64>]) -> DataChunk {
        let mut chunk = DataChunk::new(&[DataTypeKind::Int64.nullable()], values.len());
        for v in values {
            chunk.append_row([v.map(DataValue::Int64).unwrap_or(DataValue::Null)]);
        }
        chunk
    }

    fn int_checker() -> VecGroupChecker {
        VecGroupChecker::new(vec![Expression::column_ref(
            0,
            DataTypeKind::Int64.nullable(),
        )])
    }

    fn drain(checker: &mut VecGroupChecker) -> Vec<(usize, usize)> {
        std::iter::from_fn(|| checker.next_group()).collect()
    }

    #[test]
    fn splits_runs() {
        let mut checker = int_checker();
        let chunk = int_chunk(&[Some(1), Some(1), Some(1), Some(2), Some(2), Some(3)]);
        let continues = checker.split_into_groups(&chunk).unwrap();
        assert!(!continues);
        assert_eq!(drain(&mut checker), vec![(0, 3), (3, 5), (5, 6)]);
        assert!(checker.is_exhausted());
    }

    #[test]
    fn single_group_chunk() {
        let mut checker = int_checker();
        let chunk = int_chunk(&[Some(7), Some(7), Some(7)]);
        let continues = checker.split_into_groups(&chunk).unwrap();
        assert!(!continues);
        assert_eq!(drain(&mut checker), vec![(0, 3)]);
    }

    #[test]
    fn continuation_across_chunks() {
        let mut checker = int_checker();
        checker
            .split_into_groups(&int_chunk(&[Some(1), Some(2)]))
            .unwrap();
        drain(&mut checker);
        let continues = checker
            .split_into_groups(&int_chunk(&[Some(2), Some(3)]))
            .unwrap();
        assert!(continues);
        assert_eq!(drain(&mut checker), vec![(0, 1), (1, 2)]);

        let continues = checker
            .split_into_groups(&int_chunk(&[Some(9)]))
            .unwrap();
        assert!(!continues);
    }

    #[test]
    fn null_parity_breaks_groups() {
        let mut checker = int_checker();
        let chunk = int_chunk(&[Some(1), None, None, Some(1)]);
        checker.split_into_groups(&chunk).unwrap();
        assert_eq!(drain(&mut checker), vec![(0, 1), (1, 3), (3, 4)]);
    }

    #[test]
    fn empty_group_by_is_one_group() {
        let mut checker = VecGroupChecker::new(vec![]);
        let chunk = int_chunk(&[Some(1), Some(2), Some(3)]);
        let continues = checker.split_into_groups(&chunk).unwrap();
        assert!(continues);
        assert_eq!(drain(&mut checker), vec![(0, 3)]);
    }

    #[test]
    fn multi_column_keys() {
        let types = [
            DataTypeKind::Int64.nullable(),
            DataTypeKind::String.nullable(),
        ];
        let mut chunk = DataChunk::new(&types, 4);
        chunk.append_row([DataValue::Int64(1), DataValue::String("a".into())]);
        chunk.append_row([DataValue::Int64(1), DataValue::String("b".into())]);
        chunk.append_row([DataValue::Int64(2), DataValue::String("b".into())]);
        let mut checker = VecGroupChecker::new(vec![
            Expression::column_ref(0, types[0]),
            Expression::column_ref(1, types[1]),
        ]);
        checker.split_into_groups(&chunk).unwrap();
        assert_eq!(drain(&mut checker), vec![(0, 1), (1, 2), (2, 3)]);
    }
}
