// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use std::mem::size_of;

use super::*;
use crate::types::DataValue;

struct CountState {
    count: i64,
}

/// `COUNT(expr)`: the number of non-null argument values.
pub struct CountAggFunc {
    ordinal: usize,
}

impl CountAggFunc {
    pub fn new(ordinal: usize) -> Self {
        CountAggFunc { ordinal }
    }
}

impl AggFunc for CountAggFunc {
    fn alloc_partial_result(&self) -> (PartialResult, i64) {
        (Box::new(CountState { count: 0 }), size_of::<CountState>() as i64)
    }

    fn update_partial_result(
        &self,
        pr: &mut PartialResult,
        args: &[ArrayImpl],
        begin: usize,
        end: usize,
    ) -> Result<i64, ExecutorError> {
        let state = downcast_mut::<CountState>(pr);
        for i in begin..end {
            if !args[0].is_null(i) {
                state.count += 1;
            }
        }
        Ok(0)
    }

    fn merge_partial_result(
        &self,
        src: &dyn AggState,
        dst: &mut PartialResult,
    ) -> Result<i64, ExecutorError> {
        let src = downcast_ref::<CountState>(src);
        downcast_mut::<CountState>(dst).count += src.count;
        Ok(0)
    }

    fn append_final_result(
        &self,
        pr: &dyn AggState,
        chunk: &mut DataChunk,
    ) -> Result<(), ExecutorError> {
        let state = downcast_ref::<CountState>(pr);
        chunk.append_value(self.ordinal, &DataValue::Int64(state.count));
        Ok(())
    }

    fn reset_partial_result(&self, pr: &mut PartialResult) {
        downcast_mut::<CountState>(pr).count = 0;
    }
}

/// `COUNT(*)`: the number of rows. Takes no argument.
pub struct RowCountAggFunc {
    ordinal: usize,
}

impl RowCountAggFunc {
    pub fn new(ordinal: usize) -> Self {
        RowCountAggFunc { ordinal }
    }
}

impl AggFunc for RowCountAggFunc {
    fn alloc_partial_result(&self) -> (PartialResult, i64) {
        (Box::new(CountState { count: 0 }), size_of::<CountState>() as i64)
    }

    fn update_partial_result(
        &self,
        pr: &mut PartialResult,
        _args: &[ArrayImpl],
        begin: usize,
        end: usize,
    ) -> Result<i64, ExecutorError> {
        downcast_mut::<CountState>(pr).count += (end - begin) as i64;
        Ok(0)
    }

    fn merge_partial_result(
        &self,
        src: &dyn AggState,
        dst: &mut PartialResult,
    ) -> Result<i64, ExecutorError> {
        let src = downcast_ref::<CountState>(src);
        downcast_mut::<CountState>(dst).count += src.count;
        Ok(0)
    }

    fn append_final_result(
        &self,
        pr: &dyn AggState,
        chunk: &mut DataChunk,
    ) -> Result<(), ExecutorError> {
        let state = downcast_ref::<CountState>(pr);
        chunk.append_value(self.ordinal, &DataValue::Int64(state.count));
        Ok(())
    }

    fn reset_partial_result(&self, pr: &mut PartialResult) {
        downcast_mut::<CountState>(pr).count = 0;
    }
}
