// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use ahash::{HashSet, HashSetExt};

use super::*;
use crate::array::ArrayBuilderImpl;
use crate::types::{DataType, DataValue};

/// State for DISTINCT aggregation: the set of argument values seen so far.
struct DistinctState {
    seen: HashSet<DataValue>,
}

/// Wraps any single-argument kernel with DISTINCT semantics.
///
/// Updates deduplicate rows against the seen set; the wrapped kernel runs
/// over the distinct values only when the final result is appended. Merging
/// two partials is a set union, so the contract holds even though the
/// planner routes DISTINCT plans to the single-threaded path.
pub struct DistinctAggFunc {
    inner: Box<dyn AggFunc>,
    arg_type: DataType,
}

impl DistinctAggFunc {
    pub fn new(inner: Box<dyn AggFunc>, arg_type: DataType) -> Self {
        DistinctAggFunc { inner, arg_type }
    }
}

impl AggFunc for DistinctAggFunc {
    fn alloc_partial_result(&self) -> (PartialResult, i64) {
        let pr = DistinctState {
            seen: HashSet::new(),
        };
        (Box::new(pr), std::mem::size_of::<DistinctState>() as i64)
    }

    fn update_partial_result(
        &self,
        pr: &mut PartialResult,
        args: &[ArrayImpl],
        begin: usize,
        end: usize,
    ) -> Result<i64, ExecutorError> {
        let state = downcast_mut::<DistinctState>(pr);
        let mut mem_delta = 0;
        for i in begin..end {
            let v = args[0].get(i);
            if !state.seen.contains(&v) {
                mem_delta += v.estimated_size() as i64;
                state.seen.insert(v);
            }
        }
        Ok(mem_delta)
    }

    fn merge_partial_result(
        &self,
        src: &dyn AggState,
        dst: &mut PartialResult,
    ) -> Result<i64, ExecutorError> {
        let src = downcast_ref::<DistinctState>(src);
        let dst = downcast_mut::<DistinctState>(dst);
        let mut mem_delta = 0;
        for v in &src.seen {
            if !dst.seen.contains(v) {
                mem_delta += v.estimated_size() as i64;
                dst.seen.insert(v.clone());
            }
        }
        Ok(mem_delta)
    }

    fn append_final_result(
        &self,
        pr: &dyn AggState,
        chunk: &mut DataChunk,
    ) -> Result<(), ExecutorError> {
        let state = downcast_ref::<DistinctState>(pr);
        // Replay the distinct values through the wrapped kernel.
        let mut builder = ArrayBuilderImpl::with_capacity(state.seen.len(), &self.arg_type);
        for v in &state.seen {
            builder.push(v);
        }
        let array = builder.finish();
        let (mut inner_pr, _) = self.inner.alloc_partial_result();
        self.inner
            .update_partial_result(&mut inner_pr, std::slice::from_ref(&array), 0, array.len())?;
        self.inner.append_final_result(inner_pr.as_ref(), chunk)
    }

    fn reset_partial_result(&self, pr: &mut PartialResult) {
        downcast_mut::<DistinctState>(pr).seen.clear();
    }
}
