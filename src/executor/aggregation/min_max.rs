// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use std::mem::size_of;

use super::*;
use crate::types::DataValue;

/// State for min/max aggregation.
struct MinMaxState {
    result: DataValue,
}

/// The MIN and MAX aggregates, over any ordered type.
pub struct MinMaxAggFunc {
    ordinal: usize,
    is_min: bool,
}

impl MinMaxAggFunc {
    pub fn new(ordinal: usize, is_min: bool) -> Self {
        MinMaxAggFunc { ordinal, is_min }
    }

    /// Whether `candidate` beats `current` for this function's direction.
    fn beats(&self, candidate: &DataValue, current: &DataValue) -> bool {
        if current.is_null() {
            return true;
        }
        if self.is_min {
            candidate < current
        } else {
            candidate > current
        }
    }
}

impl AggFunc for MinMaxAggFunc {
    fn alloc_partial_result(&self) -> (PartialResult, i64) {
        let pr = MinMaxState {
            result: DataValue::Null,
        };
        (Box::new(pr), size_of::<MinMaxState>() as i64)
    }

    fn update_partial_result(
        &self,
        pr: &mut PartialResult,
        args: &[ArrayImpl],
        begin: usize,
        end: usize,
    ) -> Result<i64, ExecutorError> {
        let state = downcast_mut::<MinMaxState>(pr);
        let mut mem_delta = 0;
        for i in begin..end {
            let v = args[0].get(i);
            if v.is_null() {
                continue;
            }
            if self.beats(&v, &state.result) {
                mem_delta += v.estimated_size() as i64 - state.result.estimated_size() as i64;
                state.result = v;
            }
        }
        Ok(mem_delta)
    }

    fn merge_partial_result(
        &self,
        src: &dyn AggState,
        dst: &mut PartialResult,
    ) -> Result<i64, ExecutorError> {
        let src = downcast_ref::<MinMaxState>(src);
        let dst = downcast_mut::<MinMaxState>(dst);
        let mut mem_delta = 0;
        if !src.result.is_null() && self.beats(&src.result, &dst.result) {
            mem_delta =
                src.result.estimated_size() as i64 - dst.result.estimated_size() as i64;
            dst.result = src.result.clone();
        }
        Ok(mem_delta)
    }

    fn append_final_result(
        &self,
        pr: &dyn AggState,
        chunk: &mut DataChunk,
    ) -> Result<(), ExecutorError> {
        let state = downcast_ref::<MinMaxState>(pr);
        chunk.append_value(self.ordinal, &state.result);
        Ok(())
    }

    fn reset_partial_result(&self, pr: &mut PartialResult) {
        downcast_mut::<MinMaxState>(pr).result = DataValue::Null;
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::*;
    use super::*;
    use crate::expr::{AggCall, AggKind, Expression};
    use crate::types::{DataTypeExt, DataTypeKind};

    #[test]
    fn min_max_int64() {
        let values = [5i64, -3, 9, 0].map(DataValue::Int64).to_vec();
        let min = run_agg(AggCall::new(AggKind::Min, int64_col()), values.clone());
        let max = run_agg(AggCall::new(AggKind::Max, int64_col()), values);
        assert_eq!(min, DataValue::Int64(-3));
        assert_eq!(max, DataValue::Int64(9));
    }

    #[test]
    fn min_strings() {
        let col = Expression::column_ref(0, DataTypeKind::String.nullable());
        let values = ["pear", "apple", "quince"]
            .map(|s| DataValue::String(s.into()))
            .to_vec();
        let min = run_agg(AggCall::new(AggKind::Min, col), values);
        assert_eq!(min, DataValue::String("apple".into()));
    }

    #[test]
    fn min_all_null_is_null() {
        let min = run_agg(
            AggCall::new(AggKind::Min, int64_col()),
            vec![DataValue::Null, DataValue::Null],
        );
        assert_eq!(min, DataValue::Null);
    }

    #[test]
    fn max_merge_equivalence() {
        check_merge_equivalence(
            AggCall::new(AggKind::Max, int64_col()),
            [3i64, 1, 4, 1, 5, 9, 2, 6].map(DataValue::Int64).to_vec(),
        );
    }
}
