// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

//! Aggregate function kernels.
//!
//! Every kernel implements [`AggFunc`] over an opaque per-group
//! [`PartialResult`]. The operator allocates one partial result per
//! aggregate per group, folds row batches into it with `update`, combines
//! partials built by different workers with `merge`, and finally appends one
//! value per group to its configured output column. Kernels own their state
//! layout; the operator never looks inside.

use std::any::Any;

use crate::array::{ArrayImpl, DataChunk};
use crate::executor::ExecutorError;
use crate::expr::{AggCall, AggKind};

mod avg;
mod count;
mod distinct;
mod first;
mod min_max;
mod sum;
mod variance;

pub use self::avg::AvgAggFunc;
pub use self::count::{CountAggFunc, RowCountAggFunc};
pub use self::distinct::DistinctAggFunc;
pub use self::first::FirstAggFunc;
pub use self::min_max::MinMaxAggFunc;
pub use self::sum::SumAggFunc;
pub use self::variance::VarianceAggFunc;

/// Opaque per-group aggregate accumulator.
pub type PartialResult = Box<dyn AggState>;

/// The state of one aggregate for one group. Kernel-private layout.
pub trait AggState: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<S: Any + Send + Sync> AggState for S {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Downcast a partial result to the kernel's state type.
///
/// A mismatch means a partial result was handed to a different kernel than
/// the one that allocated it, which is a bug in the operator.
fn downcast_mut<S: 'static>(pr: &mut PartialResult) -> &mut S {
    // Deref through the box: `Box<dyn AggState>` is itself `Any`.
    (**pr)
        .as_any_mut()
        .downcast_mut()
        .expect("aggregate state type mismatch")
}

fn downcast_ref<S: 'static>(state: &dyn AggState) -> &S {
    state
        .as_any()
        .downcast_ref()
        .expect("aggregate state type mismatch")
}

/// An aggregation kernel.
///
/// `update` must be associative per group: merging two updates on disjoint
/// row sets is equivalent to one update on their union. This is what allows
/// the partial/final worker split of hash aggregation.
///
/// `alloc`, `update` and `merge` report memory deltas in bytes; the caller
/// feeds them to the memory tracker.
pub trait AggFunc: Send + Sync {
    /// Allocate a fresh partial result and return its size in bytes.
    fn alloc_partial_result(&self) -> (PartialResult, i64);

    /// Fold rows `begin..end` of the evaluated argument columns into `pr`.
    fn update_partial_result(
        &self,
        pr: &mut PartialResult,
        args: &[ArrayImpl],
        begin: usize,
        end: usize,
    ) -> Result<i64, ExecutorError>;

    /// Combine `src` into `dst`. Both must belong to the same group.
    fn merge_partial_result(
        &self,
        src: &dyn AggState,
        dst: &mut PartialResult,
    ) -> Result<i64, ExecutorError>;

    /// Append the final value of `pr` to this function's output column.
    fn append_final_result(
        &self,
        pr: &dyn AggState,
        chunk: &mut DataChunk,
    ) -> Result<(), ExecutorError>;

    /// Restore `pr` to its post-allocation state.
    fn reset_partial_result(&self, pr: &mut PartialResult);
}

/// Build one kernel per aggregate call; the `i`-th kernel writes the `i`-th
/// output column.
pub fn build_agg_funcs(calls: &[AggCall]) -> Vec<Box<dyn AggFunc>> {
    calls
        .iter()
        .enumerate()
        .map(|(ordinal, call)| build_agg_func(ordinal, call))
        .collect()
}

fn build_agg_func(ordinal: usize, call: &AggCall) -> Box<dyn AggFunc> {
    let input_kind = || {
        call.arg
            .as_ref()
            .expect("aggregate requires an argument")
            .return_type()
            .kind()
    };
    let inner: Box<dyn AggFunc> = match call.kind {
        AggKind::RowCount => Box::new(RowCountAggFunc::new(ordinal)),
        AggKind::Count => Box::new(CountAggFunc::new(ordinal)),
        AggKind::Sum => Box::new(SumAggFunc::new(ordinal, input_kind())),
        AggKind::Avg => Box::new(AvgAggFunc::new(ordinal, input_kind())),
        AggKind::Min => Box::new(MinMaxAggFunc::new(ordinal, true)),
        AggKind::Max => Box::new(MinMaxAggFunc::new(ordinal, false)),
        AggKind::First => Box::new(FirstAggFunc::new(ordinal)),
        AggKind::VarPop => Box::new(VarianceAggFunc::new(ordinal, false, false)),
        AggKind::VarSamp => Box::new(VarianceAggFunc::new(ordinal, true, false)),
        AggKind::StddevPop => Box::new(VarianceAggFunc::new(ordinal, false, true)),
        AggKind::StddevSamp => Box::new(VarianceAggFunc::new(ordinal, true, true)),
    };
    match &call.arg {
        Some(arg) if call.distinct => {
            Box::new(DistinctAggFunc::new(inner, arg.return_type()))
        }
        _ => inner,
    }
}
