// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use std::mem::size_of;

use super::*;
use crate::types::DataValue;

/// State for first-value aggregation.
///
/// `valid` distinguishes "no row seen yet" from "the first row was NULL".
struct FirstState {
    value: DataValue,
    valid: bool,
}

/// FIRST: the first value of the group, nulls included.
///
/// The planner rewrites group-by output columns into FIRST calls, so the
/// operator's output schema is exactly one column per aggregate call.
pub struct FirstAggFunc {
    ordinal: usize,
}

impl FirstAggFunc {
    pub fn new(ordinal: usize) -> Self {
        FirstAggFunc { ordinal }
    }
}

impl AggFunc for FirstAggFunc {
    fn alloc_partial_result(&self) -> (PartialResult, i64) {
        let pr = FirstState {
            value: DataValue::Null,
            valid: false,
        };
        (Box::new(pr), size_of::<FirstState>() as i64)
    }

    fn update_partial_result(
        &self,
        pr: &mut PartialResult,
        args: &[ArrayImpl],
        begin: usize,
        end: usize,
    ) -> Result<i64, ExecutorError> {
        let state = downcast_mut::<FirstState>(pr);
        if state.valid || begin == end {
            return Ok(0);
        }
        state.value = args[0].get(begin);
        state.valid = true;
        Ok(state.value.estimated_size() as i64)
    }

    fn merge_partial_result(
        &self,
        src: &dyn AggState,
        dst: &mut PartialResult,
    ) -> Result<i64, ExecutorError> {
        let src = downcast_ref::<FirstState>(src);
        let dst = downcast_mut::<FirstState>(dst);
        if dst.valid || !src.valid {
            return Ok(0);
        }
        dst.value = src.value.clone();
        dst.valid = true;
        Ok(dst.value.estimated_size() as i64)
    }

    fn append_final_result(
        &self,
        pr: &dyn AggState,
        chunk: &mut DataChunk,
    ) -> Result<(), ExecutorError> {
        let state = downcast_ref::<FirstState>(pr);
        chunk.append_value(self.ordinal, &state.value);
        Ok(())
    }

    fn reset_partial_result(&self, pr: &mut PartialResult) {
        let state = downcast_mut::<FirstState>(pr);
        state.value = DataValue::Null;
        state.valid = false;
    }
}
