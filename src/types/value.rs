// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use ordered_float::OrderedFloat;
use parse_display::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::*;

/// A wrapper around floats providing implementations of `Eq`, `Ord`, and `Hash`.
pub type F64 = OrderedFloat<f64>;

/// Primitive SQL value.
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataValue {
    // NOTE: Null comes first.
    // => NULL is less than any non-NULL values
    #[display("null")]
    Null,
    #[display("{0}")]
    Bool(bool),
    #[display("{0}")]
    Int32(i32),
    #[display("{0}")]
    Int64(i64),
    #[display("{0}")]
    Float64(F64),
    #[display("{0}")]
    Decimal(Decimal),
    #[display("{0}")]
    Date(Date),
    #[display("{0}")]
    Timestamp(Timestamp),
    #[display("{0}")]
    Interval(Interval),
    #[display("'{0}'")]
    String(String),
    #[display("{0}")]
    Blob(Blob),
}

impl DataValue {
    /// Returns `true` if the value is null.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type of the value. [`DataTypeKind::Null`] for NULL.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Null => DataTypeKind::Null.nullable(),
            Self::Bool(_) => DataTypeKind::Bool.not_null(),
            Self::Int32(_) => DataTypeKind::Int32.not_null(),
            Self::Int64(_) => DataTypeKind::Int64.not_null(),
            Self::Float64(_) => DataTypeKind::Float64.not_null(),
            Self::Decimal(_) => DataTypeKind::Decimal(None, None).not_null(),
            Self::Date(_) => DataTypeKind::Date.not_null(),
            Self::Timestamp(_) => DataTypeKind::Timestamp.not_null(),
            Self::Interval(_) => DataTypeKind::Interval.not_null(),
            Self::String(_) => DataTypeKind::String.not_null(),
            Self::Blob(_) => DataTypeKind::Blob.not_null(),
        }
    }

    /// Estimated in-memory size in bytes, including heap allocations.
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + match self {
                Self::String(s) => s.len(),
                Self::Blob(b) => b.len(),
                _ => 0,
            }
    }

    /// Convert the value to `f64` if it is numeric.
    pub fn to_f64(&self) -> Option<f64> {
        use num_traits::ToPrimitive;
        match self {
            Self::Int32(v) => Some(*v as f64),
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) => Some(v.0),
            Self::Decimal(v) => v.to_f64(),
            _ => None,
        }
    }
}
