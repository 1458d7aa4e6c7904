// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use std::mem::size_of;

use rust_decimal::Decimal;

use super::*;
use crate::array::Array;
use crate::types::{ConvertError, DataTypeKind, DataValue};

/// State for average aggregation: the running sum and the non-null count.
struct AvgState {
    sum: DataValue,
    count: i64,
}

/// The AVG aggregate. DECIMAL inputs stay DECIMAL, everything else
/// averages as DOUBLE.
pub struct AvgAggFunc {
    ordinal: usize,
    input_kind: DataTypeKind,
}

impl AvgAggFunc {
    pub fn new(ordinal: usize, input_kind: DataTypeKind) -> Self {
        AvgAggFunc {
            ordinal,
            input_kind,
        }
    }
}

impl AggFunc for AvgAggFunc {
    fn alloc_partial_result(&self) -> (PartialResult, i64) {
        let pr = AvgState {
            sum: DataValue::Null,
            count: 0,
        };
        (Box::new(pr), size_of::<AvgState>() as i64)
    }

    fn update_partial_result(
        &self,
        pr: &mut PartialResult,
        args: &[ArrayImpl],
        begin: usize,
        end: usize,
    ) -> Result<i64, ExecutorError> {
        let state = downcast_mut::<AvgState>(pr);
        match &args[0] {
            ArrayImpl::Decimal(a) => {
                let mut acc = match state.sum {
                    DataValue::Null => None,
                    DataValue::Decimal(v) => Some(v),
                    _ => panic!("avg: mismatched state type"),
                };
                for i in begin..end {
                    if let Some(v) = a.get(i) {
                        acc = Some(match acc {
                            None => *v,
                            Some(x) => x
                                .checked_add(*v)
                                .ok_or(ConvertError::Overflow("DECIMAL"))?,
                        });
                        state.count += 1;
                    }
                }
                if let Some(v) = acc {
                    state.sum = DataValue::Decimal(v);
                }
            }
            array => {
                let mut acc = match state.sum {
                    DataValue::Null => None,
                    DataValue::Float64(v) => Some(v.0),
                    _ => panic!("avg: mismatched state type"),
                };
                for i in begin..end {
                    let v = array.get(i);
                    if v.is_null() {
                        continue;
                    }
                    let v = v
                        .to_f64()
                        .unwrap_or_else(|| panic!("avg: unsupported argument type {}", self.input_kind));
                    acc = Some(acc.unwrap_or_default() + v);
                    state.count += 1;
                }
                if let Some(v) = acc {
                    state.sum = DataValue::Float64(v.into());
                }
            }
        }
        Ok(0)
    }

    fn merge_partial_result(
        &self,
        src: &dyn AggState,
        dst: &mut PartialResult,
    ) -> Result<i64, ExecutorError> {
        let src = downcast_ref::<AvgState>(src);
        let dst = downcast_mut::<AvgState>(dst);
        dst.count += src.count;
        dst.sum = match (&src.sum, &dst.sum) {
            (DataValue::Null, d) => d.clone(),
            (s, DataValue::Null) => s.clone(),
            (DataValue::Float64(s), DataValue::Float64(d)) => DataValue::Float64(*d + *s),
            (DataValue::Decimal(s), DataValue::Decimal(d)) => DataValue::Decimal(
                d.checked_add(*s).ok_or(ConvertError::Overflow("DECIMAL"))?,
            ),
            _ => panic!("avg: mismatched state type"),
        };
        Ok(0)
    }

    fn append_final_result(
        &self,
        pr: &dyn AggState,
        chunk: &mut DataChunk,
    ) -> Result<(), ExecutorError> {
        let state = downcast_ref::<AvgState>(pr);
        let value = match &state.sum {
            DataValue::Null => DataValue::Null,
            DataValue::Float64(sum) => DataValue::Float64(*sum / state.count as f64),
            DataValue::Decimal(sum) => DataValue::Decimal(
                sum.checked_div(Decimal::from(state.count))
                    .ok_or(ConvertError::Overflow("DECIMAL"))?,
            ),
            _ => panic!("avg: mismatched state type"),
        };
        chunk.append_value(self.ordinal, &value);
        Ok(())
    }

    fn reset_partial_result(&self, pr: &mut PartialResult) {
        let state = downcast_mut::<AvgState>(pr);
        state.sum = DataValue::Null;
        state.count = 0;
    }
}
