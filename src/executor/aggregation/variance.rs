// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use std::mem::size_of;

use super::*;
use crate::array::Array;
use crate::types::DataValue;

/// State for variance aggregation, maintained with Welford's recurrence:
/// the non-null count, the running mean, and the sum of squared deviations.
struct VarianceState {
    count: i64,
    mean: f64,
    m2: f64,
}

impl VarianceState {
    fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }
}

/// The variance family: `VAR_POP`, `VAR_SAMP`, `STDDEV_POP`, `STDDEV_SAMP`.
///
/// The sample variants return NULL when the count is one or less; the
/// population variants need only one row. Never an error: a division by
/// `count - 1` is not attempted below two rows.
pub struct VarianceAggFunc {
    ordinal: usize,
    sample: bool,
    sqrt: bool,
}

impl VarianceAggFunc {
    pub fn new(ordinal: usize, sample: bool, sqrt: bool) -> Self {
        VarianceAggFunc {
            ordinal,
            sample,
            sqrt,
        }
    }
}

impl AggFunc for VarianceAggFunc {
    fn alloc_partial_result(&self) -> (PartialResult, i64) {
        let pr = VarianceState {
            count: 0,
            mean: 0.0,
            m2: 0.0,
        };
        (Box::new(pr), size_of::<VarianceState>() as i64)
    }

    fn update_partial_result(
        &self,
        pr: &mut PartialResult,
        args: &[ArrayImpl],
        begin: usize,
        end: usize,
    ) -> Result<i64, ExecutorError> {
        let state = downcast_mut::<VarianceState>(pr);
        match &args[0] {
            ArrayImpl::Int32(a) => {
                for i in begin..end {
                    if let Some(v) = a.get(i) {
                        state.push(*v as f64);
                    }
                }
            }
            ArrayImpl::Int64(a) => {
                for i in begin..end {
                    if let Some(v) = a.get(i) {
                        state.push(*v as f64);
                    }
                }
            }
            ArrayImpl::Float64(a) => {
                for i in begin..end {
                    if let Some(v) = a.get(i) {
                        state.push(v.0);
                    }
                }
            }
            ArrayImpl::Decimal(a) => {
                use num_traits::ToPrimitive;
                for i in begin..end {
                    if let Some(v) = a.get(i) {
                        state.push(v.to_f64().unwrap_or_default());
                    }
                }
            }
            _ => panic!("variance: unsupported argument type"),
        }
        Ok(0)
    }

    fn merge_partial_result(
        &self,
        src: &dyn AggState,
        dst: &mut PartialResult,
    ) -> Result<i64, ExecutorError> {
        let src = downcast_ref::<VarianceState>(src);
        let dst = downcast_mut::<VarianceState>(dst);
        if src.count == 0 {
            return Ok(0);
        }
        if dst.count == 0 {
            dst.count = src.count;
            dst.mean = src.mean;
            dst.m2 = src.m2;
            return Ok(0);
        }
        // Chan et al.'s pairwise combination of Welford states.
        let count = src.count + dst.count;
        let delta = src.mean - dst.mean;
        dst.m2 += src.m2 + delta * delta * (src.count as f64) * (dst.count as f64) / count as f64;
        dst.mean += delta * src.count as f64 / count as f64;
        dst.count = count;
        Ok(0)
    }

    fn append_final_result(
        &self,
        pr: &dyn AggState,
        chunk: &mut DataChunk,
    ) -> Result<(), ExecutorError> {
        let state = downcast_ref::<VarianceState>(pr);
        let divisor = if self.sample {
            state.count - 1
        } else {
            state.count
        };
        let value = if divisor < 1 {
            DataValue::Null
        } else {
            let variance = state.m2 / divisor as f64;
            DataValue::Float64(if self.sqrt { variance.sqrt() } else { variance }.into())
        };
        chunk.append_value(self.ordinal, &value);
        Ok(())
    }

    fn reset_partial_result(&self, pr: &mut PartialResult) {
        let state = downcast_mut::<VarianceState>(pr);
        state.count = 0;
        state.mean = 0.0;
        state.m2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::*;
    use super::*;
    use crate::expr::{AggCall, AggKind};

    fn floats(values: &[f64]) -> Vec<DataValue> {
        values.iter().map(|v| DataValue::Float64((*v).into())).collect()
    }

    const SAMPLE: [f64; 8] = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];

    #[test]
    fn var_pop() {
        let result = run_agg(AggCall::new(AggKind::VarPop, float64_col()), floats(&SAMPLE));
        match result {
            DataValue::Float64(v) => assert!((v.0 - 4.0).abs() < 1e-9),
            other => panic!("unexpected result {other}"),
        }
    }

    #[test]
    fn var_samp() {
        let result = run_agg(AggCall::new(AggKind::VarSamp, float64_col()), floats(&SAMPLE));
        match result {
            DataValue::Float64(v) => assert!((v.0 - 32.0 / 7.0).abs() < 1e-9),
            other => panic!("unexpected result {other}"),
        }
    }

    #[test]
    fn stddev_pop() {
        let result = run_agg(
            AggCall::new(AggKind::StddevPop, float64_col()),
            floats(&SAMPLE),
        );
        match result {
            DataValue::Float64(v) => assert!((v.0 - 2.0).abs() < 1e-9),
            other => panic!("unexpected result {other}"),
        }
    }

    #[test]
    fn sample_variants_need_two_rows() {
        for kind in [AggKind::VarSamp, AggKind::StddevSamp] {
            let result = run_agg(AggCall::new(kind, float64_col()), floats(&[42.0]));
            assert_eq!(result, DataValue::Null);
        }
        let result = run_agg(AggCall::new(AggKind::VarPop, float64_col()), floats(&[42.0]));
        assert_eq!(result, DataValue::Float64(0.0.into()));
    }

    #[test]
    fn variance_merge_equivalence() {
        check_merge_equivalence(
            AggCall::new(AggKind::VarSamp, float64_col()),
            floats(&SAMPLE),
        );
        check_merge_equivalence(
            AggCall::new(AggKind::VarPop, float64_col()),
            floats(&[1.5, 2.5, 2.5, 8.0, -3.25, 0.0]),
        );
    }
}
