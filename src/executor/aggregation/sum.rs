// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use std::mem::size_of;

use super::*;
use crate::array::Array;
use crate::types::{ConvertError, DataTypeKind, DataValue, F64};

/// State for sum aggregation.
struct SumState {
    result: DataValue,
}

/// The SUM aggregate. Integer inputs accumulate into BIGINT.
pub struct SumAggFunc {
    ordinal: usize,
    input_kind: DataTypeKind,
}

impl SumAggFunc {
    pub fn new(ordinal: usize, input_kind: DataTypeKind) -> Self {
        SumAggFunc {
            ordinal,
            input_kind,
        }
    }
}

fn add_i64(acc: Option<i64>, v: i64) -> Result<Option<i64>, ConvertError> {
    match acc {
        None => Ok(Some(v)),
        Some(a) => a
            .checked_add(v)
            .map(Some)
            .ok_or(ConvertError::Overflow("BIGINT")),
    }
}

impl AggFunc for SumAggFunc {
    fn alloc_partial_result(&self) -> (PartialResult, i64) {
        let pr = SumState {
            result: DataValue::Null,
        };
        (Box::new(pr), size_of::<SumState>() as i64)
    }

    fn update_partial_result(
        &self,
        pr: &mut PartialResult,
        args: &[ArrayImpl],
        begin: usize,
        end: usize,
    ) -> Result<i64, ExecutorError> {
        let state = downcast_mut::<SumState>(pr);
        match (&args[0], self.input_kind) {
            (ArrayImpl::Int32(a), DataTypeKind::Int32) => {
                let mut acc = match state.result {
                    DataValue::Null => None,
                    DataValue::Int64(v) => Some(v),
                    _ => panic!("sum: mismatched state type"),
                };
                for i in begin..end {
                    if let Some(v) = a.get(i) {
                        acc = add_i64(acc, *v as i64)?;
                    }
                }
                if let Some(v) = acc {
                    state.result = DataValue::Int64(v);
                }
            }
            (ArrayImpl::Int64(a), DataTypeKind::Int64) => {
                let mut acc = match state.result {
                    DataValue::Null => None,
                    DataValue::Int64(v) => Some(v),
                    _ => panic!("sum: mismatched state type"),
                };
                for i in begin..end {
                    if let Some(v) = a.get(i) {
                        acc = add_i64(acc, *v)?;
                    }
                }
                if let Some(v) = acc {
                    state.result = DataValue::Int64(v);
                }
            }
            (ArrayImpl::Float64(a), DataTypeKind::Float64) => {
                let mut acc: Option<F64> = match state.result {
                    DataValue::Null => None,
                    DataValue::Float64(v) => Some(v),
                    _ => panic!("sum: mismatched state type"),
                };
                for i in begin..end {
                    if let Some(v) = a.get(i) {
                        acc = Some(acc.unwrap_or_default() + *v);
                    }
                }
                if let Some(v) = acc {
                    state.result = DataValue::Float64(v);
                }
            }
            (ArrayImpl::Decimal(a), DataTypeKind::Decimal(_, _)) => {
                let mut acc = match state.result {
                    DataValue::Null => None,
                    DataValue::Decimal(v) => Some(v),
                    _ => panic!("sum: mismatched state type"),
                };
                for i in begin..end {
                    if let Some(v) = a.get(i) {
                        acc = Some(match acc {
                            None => *v,
                            Some(x) => x
                                .checked_add(*v)
                                .ok_or(ConvertError::Overflow("DECIMAL"))?,
                        });
                    }
                }
                if let Some(v) = acc {
                    state.result = DataValue::Decimal(v);
                }
            }
            _ => panic!("sum: unsupported argument type {}", self.input_kind),
        }
        Ok(0)
    }

    fn merge_partial_result(
        &self,
        src: &dyn AggState,
        dst: &mut PartialResult,
    ) -> Result<i64, ExecutorError> {
        let src = downcast_ref::<SumState>(src);
        let dst = downcast_mut::<SumState>(dst);
        dst.result = match (&src.result, &dst.result) {
            (DataValue::Null, d) => d.clone(),
            (s, DataValue::Null) => s.clone(),
            (DataValue::Int64(s), DataValue::Int64(d)) => DataValue::Int64(
                d.checked_add(*s).ok_or(ConvertError::Overflow("BIGINT"))?,
            ),
            (DataValue::Float64(s), DataValue::Float64(d)) => DataValue::Float64(*d + *s),
            (DataValue::Decimal(s), DataValue::Decimal(d)) => DataValue::Decimal(
                d.checked_add(*s).ok_or(ConvertError::Overflow("DECIMAL"))?,
            ),
            _ => panic!("sum: mismatched state type"),
        };
        Ok(0)
    }

    fn append_final_result(
        &self,
        pr: &dyn AggState,
        chunk: &mut DataChunk,
    ) -> Result<(), ExecutorError> {
        let state = downcast_ref::<SumState>(pr);
        chunk.append_value(self.ordinal, &state.result);
        Ok(())
    }

    fn reset_partial_result(&self, pr: &mut PartialResult) {
        downcast_mut::<SumState>(pr).result = DataValue::Null;
    }
}
