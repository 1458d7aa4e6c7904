// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use smallvec::SmallVec;

use super::aggregation::{build_agg_funcs, AggFunc, PartialResult};
use super::{BoxedExecutor, Executor, ExecutorContext, ExecutorError, VecGroupChecker};
use crate::array::{ArrayImpl, DataChunk};
use crate::expr::{AggCall, Expression};
use crate::memory::MemTracker;
use crate::types::DataType;

/// The executor of streaming aggregation.
///
/// It assumes the child produces chunks sorted on the group-by key and emits
/// one output row per group, reusing a single tuple of partial results
/// across groups. Group boundaries come from the [`VecGroupChecker`]; a
/// group whose last row is the last row of a chunk stays open until the next
/// chunk tells whether its first rows continue it.
pub struct SortAggExecutor {
    agg_calls: Vec<AggCall>,
    child: BoxedExecutor,
    /// Planner-provided single-row chunk emitted when a scalar aggregate
    /// sees no input at all.
    default_val: Option<DataChunk>,
    schema: Vec<DataType>,

    funcs: Vec<Box<dyn AggFunc>>,
    partials: SmallVec<[PartialResult; 4]>,
    checker: VecGroupChecker,
    ctx: Option<ExecutorContext>,
    mem: Option<Arc<MemTracker>>,
    child_chunk: Option<DataChunk>,
    /// Evaluated argument columns of the current child chunk, per call.
    cur_args: Vec<Vec<ArrayImpl>>,
    executed: bool,
    is_child_empty: bool,
    /// Whether the shared partial results hold an unfinished group.
    group_open: bool,
    closed: bool,
}

impl SortAggExecutor {
    pub fn new(
        agg_calls: Vec<AggCall>,
        group_by: Vec<Expression>,
        child: BoxedExecutor,
        default_val: Option<DataChunk>,
    ) -> Self {
        let schema = agg_calls.iter().map(|call| call.return_type()).collect();
        let funcs = build_agg_funcs(&agg_calls);
        let checker = VecGroupChecker::new(group_by);
        SortAggExecutor {
            agg_calls,
            child,
            default_val,
            schema,
            funcs,
            partials: SmallVec::new(),
            checker,
            ctx: None,
            mem: None,
            child_chunk: None,
            cur_args: Vec::new(),
            executed: false,
            is_child_empty: true,
            group_open: false,
            closed: false,
        }
    }

    fn mem(&self) -> &Arc<MemTracker> {
        self.mem.as_ref().expect("executor is not open")
    }

    /// Pull the next chunk from the child. Returns whether it has rows.
    async fn fetch_child(&mut self) -> Result<bool, ExecutorError> {
        let chunk = self.child_chunk.as_mut().expect("executor is not open");
        let pre = chunk.memory_usage() as i64;
        self.child.next(chunk).await?;
        let post = chunk.memory_usage() as i64;
        self.mem.as_ref().expect("executor is not open").consume(post - pre);
        Ok(chunk.num_rows() > 0)
    }

    /// Evaluate the aggregate arguments of the freshly fetched chunk.
    fn refresh_args(&mut self) -> Result<(), ExecutorError> {
        let chunk = self.child_chunk.as_ref().expect("executor is not open");
        self.cur_args = self
            .agg_calls
            .iter()
            .map(|call| call.arg.iter().map(|e| e.eval(chunk)).try_collect())
            .try_collect()?;
        Ok(())
    }

    /// Fold rows `begin..end` of the current chunk into the open group.
    fn update_partials(&mut self, begin: usize, end: usize) -> Result<(), ExecutorError> {
        for ((func, pr), args) in self
            .funcs
            .iter()
            .zip_eq(&mut self.partials)
            .zip_eq(&self.cur_args)
        {
            let mem_delta = func.update_partial_result(pr, args, begin, end)?;
            self.mem.as_ref().expect("executor is not open").consume(mem_delta);
        }
        self.group_open = true;
        let mem = self.mem();
        if mem.exceeded() {
            return Err(ExecutorError::MemoryExceeded(
                mem.effective_quota().unwrap_or_default(),
            ));
        }
        Ok(())
    }

    /// Append one result row for the open group and reset the partials.
    fn finalize_group(&mut self, out: &mut DataChunk) -> Result<(), ExecutorError> {
        if self.funcs.is_empty() {
            out.set_num_virtual_rows(out.num_rows() + 1);
        }
        for (func, pr) in self.funcs.iter().zip_eq(&mut self.partials) {
            func.append_final_result(pr.as_ref(), out)?;
            func.reset_partial_result(pr);
        }
        self.group_open = false;
        Ok(())
    }

    async fn next_inner(&mut self, out: &mut DataChunk) -> Result<(), ExecutorError> {
        while !self.executed && !out.is_full() {
            if self.ctx.as_ref().is_some_and(|ctx| ctx.is_cancelled()) {
                self.executed = true;
                break;
            }
            if self.checker.is_exhausted() {
                if !self.fetch_child().await? {
                    // Input exhausted: close the open group, or honor the
                    // empty-input scalar-aggregate contract.
                    if self.group_open {
                        self.finalize_group(out)?;
                    } else if self.is_child_empty {
                        if let Some(default_val) = &self.default_val {
                            out.append_rows(default_val, 0, 1);
                        }
                    }
                    self.executed = true;
                    break;
                }
                self.is_child_empty = false;
                let chunk = self.child_chunk.as_ref().expect("executor is not open");
                let continues_prev = self.checker.split_into_groups(chunk)?;
                self.refresh_args()?;
                if self.group_open && !continues_prev {
                    self.finalize_group(out)?;
                    if out.is_full() {
                        return Ok(());
                    }
                }
            }
            let num_rows = self
                .child_chunk
                .as_ref()
                .expect("executor is not open")
                .num_rows();
            while let Some((begin, end)) = self.checker.next_group() {
                self.update_partials(begin, end)?;
                if end < num_rows {
                    // The next run starts inside this chunk, so the group
                    // is complete. A group ending at the chunk boundary
                    // stays open for the next chunk to extend.
                    self.finalize_group(out)?;
                }
                if out.is_full() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Executor for SortAggExecutor {
    fn schema(&self) -> &[DataType] {
        &self.schema
    }

    async fn open(&mut self, ctx: &ExecutorContext) -> Result<(), ExecutorError> {
        self.child.open(ctx).await?;
        let mem = ctx.mem().child();
        for func in &self.funcs {
            let (pr, mem_delta) = func.alloc_partial_result();
            mem.consume(mem_delta);
            self.partials.push(pr);
        }
        let config = ctx.config();
        let child_chunk = DataChunk::with_capacity(
            self.child.schema(),
            config.init_chunk_size,
            config.max_chunk_size,
        );
        self.ctx = Some(ctx.clone());
        self.mem = Some(mem);
        self.child_chunk = Some(child_chunk);
        Ok(())
    }

    async fn next(&mut self, chunk: &mut DataChunk) -> Result<(), ExecutorError> {
        chunk.reset();
        match self.next_inner(chunk).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.executed = true;
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<(), ExecutorError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.executed = true;
        self.checker.reset();
        self.child_chunk = None;
        self.cur_args.clear();
        if let Some(mem) = &self.mem {
            mem.detach();
        }
        self.child.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{collect_rows, MockExecutor};
    use super::*;
    use crate::executor::HashAggExecutor;
    use crate::expr::AggKind;
    use crate::types::{DataTypeExt, DataTypeKind, DataValue};

    fn kv_schema() -> Vec<DataType> {
        vec![
            DataTypeKind::Int64.nullable(),
            DataTypeKind::Int64.nullable(),
        ]
    }

    fn kv_rows(data: &[(i64, i64)]) -> Vec<Vec<DataValue>> {
        data.iter()
            .map(|(k, v)| vec![DataValue::Int64(*k), DataValue::Int64(*v)])
            .collect()
    }

    fn first_k_sum_v() -> (Vec<AggCall>, Vec<Expression>) {
        let k = Expression::column_ref(0, DataTypeKind::Int64.nullable());
        let v = Expression::column_ref(1, DataTypeKind::Int64.nullable());
        (
            vec![
                AggCall::new(AggKind::First, k.clone()),
                AggCall::new(AggKind::Sum, v),
            ],
            vec![k],
        )
    }

    #[tokio::test]
    async fn one_row_per_group_in_input_order() {
        let data = [(1, 1), (1, 2), (1, 3), (2, 4), (2, 5), (3, 6)];
        let child = MockExecutor::new(kv_schema()).chunk(kv_rows(&data));
        let (calls, group_by) = first_k_sum_v();
        let ctx = ExecutorContext::default();
        let mut exec = SortAggExecutor::new(calls, group_by, Box::new(child), None);
        exec.open(&ctx).await.unwrap();
        let rows = collect_rows(&mut exec, &ctx).await.unwrap();
        exec.close().await.unwrap();
        assert_eq!(
            rows,
            vec![
                vec![DataValue::Int64(1), DataValue::Int64(6)],
                vec![DataValue::Int64(2), DataValue::Int64(9)],
                vec![DataValue::Int64(3), DataValue::Int64(6)],
            ]
        );
        assert_eq!(ctx.mem().consumed(), 0);
    }

    #[tokio::test]
    async fn groups_span_chunk_boundaries() {
        let child = MockExecutor::new(kv_schema())
            .chunk(kv_rows(&[(1, 1), (1, 2)]))
            .chunk(kv_rows(&[(1, 3), (2, 4)]))
            .chunk(kv_rows(&[(2, 5)]));
        let (calls, group_by) = first_k_sum_v();
        let ctx = ExecutorContext::default();
        let mut exec = SortAggExecutor::new(calls, group_by, Box::new(child), None);
        exec.open(&ctx).await.unwrap();
        let rows = collect_rows(&mut exec, &ctx).await.unwrap();
        exec.close().await.unwrap();
        assert_eq!(
            rows,
            vec![
                vec![DataValue::Int64(1), DataValue::Int64(6)],
                vec![DataValue::Int64(2), DataValue::Int64(9)],
            ]
        );
    }

    #[tokio::test]
    async fn scalar_aggregate_over_empty_input() {
        // With a default chunk the row comes from the planner.
        let child = MockExecutor::new(kv_schema());
        let v = Expression::column_ref(1, DataTypeKind::Int64.nullable());
        let mut default_val = DataChunk::new(&[DataTypeKind::Int64.nullable()], 1);
        default_val.append_row([DataValue::Null]);
        let ctx = ExecutorContext::default();
        let mut exec = SortAggExecutor::new(
            vec![AggCall::new(AggKind::Sum, v.clone())],
            vec![],
            Box::new(child),
            Some(default_val),
        );
        exec.open(&ctx).await.unwrap();
        let rows = collect_rows(&mut exec, &ctx).await.unwrap();
        exec.close().await.unwrap();
        assert_eq!(rows, vec![vec![DataValue::Null]]);

        // Without one the output is empty.
        let child = MockExecutor::new(kv_schema());
        let ctx = ExecutorContext::default();
        let mut exec = SortAggExecutor::new(
            vec![AggCall::new(AggKind::Sum, v)],
            vec![],
            Box::new(child),
            None,
        );
        exec.open(&ctx).await.unwrap();
        let rows = collect_rows(&mut exec, &ctx).await.unwrap();
        exec.close().await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn matches_hash_aggregation_on_sorted_input() {
        let mut data: Vec<(i64, i64)> = (0..200).map(|i| (i % 13, i)).collect();
        data.sort();
        let ctx = ExecutorContext::default();

        let (calls, group_by) = first_k_sum_v();
        let child = MockExecutor::new(kv_schema())
            .chunk(kv_rows(&data[..77]))
            .chunk(kv_rows(&data[77..]));
        let mut sort_agg =
            SortAggExecutor::new(calls.clone(), group_by.clone(), Box::new(child), None);
        sort_agg.open(&ctx).await.unwrap();
        let mut sorted_rows = collect_rows(&mut sort_agg, &ctx).await.unwrap();
        sort_agg.close().await.unwrap();
        sorted_rows.sort();

        let child = MockExecutor::new(kv_schema())
            .chunk(kv_rows(&data[..77]))
            .chunk(kv_rows(&data[77..]));
        let mut hash_agg = HashAggExecutor::new(calls, group_by, Box::new(child), None);
        hash_agg.open(&ctx).await.unwrap();
        let mut hash_rows = collect_rows(&mut hash_agg, &ctx).await.unwrap();
        hash_agg.close().await.unwrap();
        hash_rows.sort();

        assert_eq!(sorted_rows, hash_rows);
    }

    #[tokio::test]
    async fn output_chunks_respect_capacity() {
        let data: Vec<(i64, i64)> = (0..100).map(|k| (k, k)).collect();
        let child = MockExecutor::new(kv_schema()).chunk(kv_rows(&data));
        let (calls, group_by) = first_k_sum_v();
        let ctx = ExecutorContext::default();
        let mut exec = SortAggExecutor::new(calls, group_by, Box::new(child), None);
        exec.open(&ctx).await.unwrap();
        let mut out = DataChunk::new(exec.schema(), 16);
        let mut total = 0;
        loop {
            exec.next(&mut out).await.unwrap();
            if out.num_rows() == 0 {
                break;
            }
            assert!(out.num_rows() <= 16);
            total += out.num_rows();
        }
        exec.close().await.unwrap();
        assert_eq!(total, 100);
    }
}
