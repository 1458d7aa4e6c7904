// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

//! Minimal expressions consumed by the aggregation operators.
//!
//! The real expression subsystem lives in the front-end; the aggregation
//! engine only needs to evaluate planner-resolved column references and
//! constants into typed column buffers, and to describe aggregate calls.

use serde::{Deserialize, Serialize};

use crate::array::{ArrayBuilderImpl, ArrayImpl, DataChunk};
use crate::executor::ExecutorError;
use crate::types::{DataType, DataTypeExt, DataTypeKind, DataValue};

/// Collation of a string-typed expression.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Collation {
    /// Compare byte strings verbatim.
    #[default]
    Binary,
    /// Case-insensitive with trailing-pad-space semantics.
    CaseInsensitive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum ExprKind {
    /// Reference to a column of the input chunk.
    ColumnRef(usize),
    Constant(DataValue),
}

/// A planner-resolved scalar expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    kind: ExprKind,
    return_type: DataType,
    collation: Collation,
}

impl Expression {
    /// A reference to the `index`-th column of the input, typed `ty`.
    pub fn column_ref(index: usize, ty: DataType) -> Self {
        Expression {
            kind: ExprKind::ColumnRef(index),
            return_type: ty,
            collation: Collation::Binary,
        }
    }

    /// A constant value.
    pub fn constant(value: DataValue) -> Self {
        let return_type = value.data_type();
        Expression {
            kind: ExprKind::Constant(value),
            return_type,
            collation: Collation::Binary,
        }
    }

    /// Override the collation the expression compares under.
    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = collation;
        self
    }

    pub fn return_type(&self) -> DataType {
        self.return_type
    }

    pub fn collation(&self) -> Collation {
        self.collation
    }

    /// Evaluate the expression over a chunk into a typed column buffer.
    pub fn eval(&self, chunk: &DataChunk) -> Result<ArrayImpl, ExecutorError> {
        match &self.kind {
            ExprKind::ColumnRef(index) => Ok(chunk.column_array(*index)),
            ExprKind::Constant(v) => {
                let mut builder =
                    ArrayBuilderImpl::with_capacity(chunk.num_rows(), &self.return_type);
                for _ in 0..chunk.num_rows() {
                    builder.push(v);
                }
                Ok(builder.finish())
            }
        }
    }
}

/// Kind of an aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggKind {
    /// `COUNT(*)`: counts rows, takes no argument.
    RowCount,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    /// First value of the group, nulls included. The planner rewrites
    /// group-by output columns into FIRST calls.
    First,
    VarPop,
    VarSamp,
    StddevPop,
    StddevSamp,
}

/// An aggregate function call resolved by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggCall {
    pub kind: AggKind,
    /// The argument expression; `None` only for `RowCount`.
    pub arg: Option<Expression>,
    pub distinct: bool,
}

impl AggCall {
    pub fn new(kind: AggKind, arg: Expression) -> Self {
        AggCall {
            kind,
            arg: Some(arg),
            distinct: false,
        }
    }

    pub fn count_star() -> Self {
        AggCall {
            kind: AggKind::RowCount,
            arg: None,
            distinct: false,
        }
    }

    pub fn with_distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// The type of the aggregate result column.
    pub fn return_type(&self) -> DataType {
        let arg_kind = self.arg.as_ref().map(|a| a.return_type().kind());
        match self.kind {
            AggKind::RowCount | AggKind::Count => DataTypeKind::Int64.not_null(),
            AggKind::Sum => match arg_kind {
                Some(DataTypeKind::Int32) | Some(DataTypeKind::Int64) => {
                    DataTypeKind::Int64.nullable()
                }
                Some(kind) => kind.nullable(),
                None => panic!("SUM requires an argument"),
            },
            AggKind::Avg => match arg_kind {
                Some(kind @ DataTypeKind::Decimal(_, _)) => kind.nullable(),
                Some(_) => DataTypeKind::Float64.nullable(),
                None => panic!("AVG requires an argument"),
            },
            AggKind::Min | AggKind::Max | AggKind::First => match arg_kind {
                Some(kind) => kind.nullable(),
                None => panic!("aggregate requires an argument"),
            },
            AggKind::VarPop | AggKind::VarSamp | AggKind::StddevPop | AggKind::StddevSamp => {
                DataTypeKind::Float64.nullable()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataTypeExt;

    #[test]
    fn eval_column_ref() {
        let mut chunk = DataChunk::new(&[DataTypeKind::Int64.nullable()], 4);
        chunk.append_row([DataValue::Int64(5)]);
        chunk.append_row([DataValue::Null]);
        let expr = Expression::column_ref(0, DataTypeKind::Int64.nullable());
        let array = expr.eval(&chunk).unwrap();
        assert_eq!(array.get(0), DataValue::Int64(5));
        assert_eq!(array.get(1), DataValue::Null);
    }

    #[test]
    fn eval_constant() {
        let mut chunk = DataChunk::new(&[DataTypeKind::Int64.nullable()], 4);
        chunk.append_row([DataValue::Int64(1)]);
        chunk.append_row([DataValue::Int64(2)]);
        let expr = Expression::constant(DataValue::String("k".into()));
        let array = expr.eval(&chunk).unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array.get(1), DataValue::String("k".into()));
    }

    #[test]
    fn return_types() {
        let int_col = Expression::column_ref(0, DataTypeKind::Int32.nullable());
        assert_eq!(
            AggCall::new(AggKind::Sum, int_col.clone()).return_type().kind(),
            DataTypeKind::Int64
        );
        assert_eq!(
            AggCall::new(AggKind::Avg, int_col.clone()).return_type().kind(),
            DataTypeKind::Float64
        );
        assert_eq!(
            AggCall::new(AggKind::Min, int_col).return_type().kind(),
            DataTypeKind::Int32
        );
        assert_eq!(AggCall::count_star().return_type().kind(), DataTypeKind::Int64);
    }
}
