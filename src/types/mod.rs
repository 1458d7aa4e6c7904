// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

//! Logical data types and SQL values.

use parse_display::Display;
use serde::{Deserialize, Serialize};

mod blob;
mod date;
mod interval;
mod native;
mod timestamp;
mod value;

pub use self::blob::{Blob, BlobRef};
pub use self::date::Date;
pub use self::interval::Interval;
pub use self::native::NativeType;
pub use self::timestamp::Timestamp;
pub use self::value::{DataValue, F64};

/// Kind of the logical data type.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataTypeKind {
    #[display("NULL")]
    Null,
    #[display("BOOLEAN")]
    Bool,
    #[display("INT")]
    Int32,
    #[display("BIGINT")]
    Int64,
    #[display("DOUBLE")]
    Float64,
    /// `DECIMAL(precision, scale)`.
    #[display("DECIMAL")]
    Decimal(Option<u8>, Option<u8>),
    #[display("DATE")]
    Date,
    #[display("TIMESTAMP")]
    Timestamp,
    #[display("INTERVAL")]
    Interval,
    #[display("VARCHAR")]
    String,
    #[display("BLOB")]
    Blob,
}

/// Data type with nullability.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub kind: DataTypeKind,
    pub nullable: bool,
}

impl std::fmt::Debug for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if self.nullable {
            write!(f, " (null)")?;
        }
        Ok(())
    }
}

impl DataType {
    pub const fn new(kind: DataTypeKind, nullable: bool) -> DataType {
        DataType { kind, nullable }
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn kind(&self) -> DataTypeKind {
        self.kind
    }
}

/// The extension methods for [`DataType`].
pub trait DataTypeExt {
    fn nullable(self) -> DataType;
    fn not_null(self) -> DataType;
}

impl DataTypeExt for DataTypeKind {
    fn nullable(self) -> DataType {
        DataType::new(self, true)
    }

    fn not_null(self) -> DataType {
        DataType::new(self, false)
    }
}

/// The error type of value conversions.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("failed to convert value {0:?} to type {1}")]
    Cast(String, &'static str),
    #[error("numeric value out of range: {0}")]
    Overflow(&'static str),
}

/// A macro to generate code for all type variants.
///
/// Each entry is `{ Variant, ItemType, lower_name, ArrayType, BuilderType }`:
/// the variant name shared by [`DataTypeKind`], [`DataValue`] and
/// [`crate::array::ArrayImpl`], the array item type, the snake-case name, and
/// the concrete array and builder types.
#[macro_export]
macro_rules! for_all_variants {
    ($macro:ident $(, $x:tt)*) => {
        $macro! {
            [$($x),*],
            { Bool, bool, bool, BoolArray, BoolArrayBuilder },
            { Int32, i32, int32, I32Array, I32ArrayBuilder },
            { Int64, i64, int64, I64Array, I64ArrayBuilder },
            { Float64, F64, float64, F64Array, F64ArrayBuilder },
            { Decimal, Decimal, decimal, DecimalArray, DecimalArrayBuilder },
            { Date, Date, date, DateArray, DateArrayBuilder },
            { Timestamp, Timestamp, timestamp, TimestampArray, TimestampArrayBuilder },
            { Interval, Interval, interval, IntervalArray, IntervalArrayBuilder },
            { String, str, string, Utf8Array, Utf8ArrayBuilder },
            { Blob, BlobRef, blob, BlobArray, BlobArrayBuilder }
        }
    };
}
