// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

//! Columnar arrays and the [`DataChunk`] row batch.

use std::borrow::Borrow;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::for_all_variants;
use crate::types::{BlobRef, DataType, DataTypeKind, DataValue, Date, Interval, Timestamp, F64};

mod data_chunk;
mod iterator;
mod primitive_array;
mod utf8_array;

pub use self::data_chunk::{DataChunk, RowRef};
pub use self::iterator::ArrayIter;
pub use self::primitive_array::{PrimitiveArray, PrimitiveArrayBuilder};
pub use self::utf8_array::{BytesArray, BytesArrayBuilder};

/// A trait over all array builders.
///
/// Builders double as the mutable columns of a [`DataChunk`]: values are
/// appended with [`push`](ArrayBuilder::push) and can be read back with
/// [`get`](ArrayBuilder::get) without finishing the builder.
pub trait ArrayBuilder: Send + Sync + 'static {
    /// Corresponding `Array` of this builder.
    type Array: Array<Builder = Self>;

    /// Create a new builder with reserved `capacity`.
    fn with_capacity(capacity: usize) -> Self;

    /// Append a value to the builder.
    fn push(&mut self, value: Option<&<Self::Array as Array>::Item>);

    /// Append an array to the builder.
    fn append(&mut self, other: &Self::Array);

    /// Retrieve a reference to the value at `idx`.
    fn get(&self, idx: usize) -> Option<&<Self::Array as Array>::Item>;

    /// Number of values appended so far.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all values, keeping the allocation.
    fn clear(&mut self);

    /// Estimated size of the contained values in memory.
    fn estimated_size(&self) -> usize;

    /// Finish build and return a new array.
    fn finish(self) -> Self::Array;

    /// Materialize an array with the current contents, keeping the builder.
    fn finish_cloned(&self) -> Self::Array;
}

/// A trait over all arrays.
pub trait Array: Sized + Send + Sync + 'static {
    /// Corresponding builder of this array.
    type Builder: ArrayBuilder<Array = Self>;

    /// Type of element in the array.
    type Item: ToOwned + ?Sized;

    /// Retrieve a reference to the value at `idx`.
    fn get(&self, idx: usize) -> Option<&Self::Item>;

    /// Number of items of the array.
    fn len(&self) -> usize;

    /// Get an iterator over the array.
    fn iter(&self) -> ArrayIter<'_, Self> {
        ArrayIter::new(self)
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated size of the array in memory.
    fn estimated_size(&self) -> usize;
}

pub type BoolArray = PrimitiveArray<bool>;
pub type I32Array = PrimitiveArray<i32>;
pub type I64Array = PrimitiveArray<i64>;
pub type F64Array = PrimitiveArray<F64>;
pub type DecimalArray = PrimitiveArray<Decimal>;
pub type DateArray = PrimitiveArray<Date>;
pub type TimestampArray = PrimitiveArray<Timestamp>;
pub type IntervalArray = PrimitiveArray<Interval>;
pub type Utf8Array = BytesArray<str>;
pub type BlobArray = BytesArray<BlobRef>;

pub type BoolArrayBuilder = PrimitiveArrayBuilder<bool>;
pub type I32ArrayBuilder = PrimitiveArrayBuilder<i32>;
pub type I64ArrayBuilder = PrimitiveArrayBuilder<i64>;
pub type F64ArrayBuilder = PrimitiveArrayBuilder<F64>;
pub type DecimalArrayBuilder = PrimitiveArrayBuilder<Decimal>;
pub type DateArrayBuilder = PrimitiveArrayBuilder<Date>;
pub type TimestampArrayBuilder = PrimitiveArrayBuilder<Timestamp>;
pub type IntervalArrayBuilder = PrimitiveArrayBuilder<Interval>;
pub type Utf8ArrayBuilder = BytesArrayBuilder<str>;
pub type BlobArrayBuilder = BytesArrayBuilder<BlobRef>;

/// Implement the `ArrayImpl` and `ArrayBuilderImpl` dispatch enums.
macro_rules! impl_array_impl {
    ([], $( { $Abc:ident, $Type:ty, $abc:ident, $AbcArray:ty, $AbcArrayBuilder:ty } ),*) => {
        /// Embeds all types of arrays in the `array` module.
        #[derive(Clone, PartialEq, Serialize)]
        pub enum ArrayImpl {
            $($Abc($AbcArray),)*
        }

        /// Embeds all types of array builders in the `array` module.
        pub enum ArrayBuilderImpl {
            $($Abc($AbcArrayBuilder),)*
        }

        $(
            impl From<$AbcArray> for ArrayImpl {
                fn from(array: $AbcArray) -> Self {
                    Self::$Abc(array)
                }
            }
        )*

        impl ArrayImpl {
            /// Get the value at the given index.
            pub fn get(&self, idx: usize) -> DataValue {
                match self {
                    $(Self::$Abc(a) => match a.get(idx) {
                        Some(v) => DataValue::$Abc(v.to_owned().into()),
                        None => DataValue::Null,
                    },)*
                }
            }

            /// Whether the value at the given index is null.
            pub fn is_null(&self, idx: usize) -> bool {
                match self {
                    $(Self::$Abc(a) => a.get(idx).is_none(),)*
                }
            }

            /// Number of items of the array.
            pub fn len(&self) -> usize {
                match self {
                    $(Self::$Abc(a) => a.len(),)*
                }
            }

            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            /// Estimated size of the array in memory.
            pub fn estimated_size(&self) -> usize {
                match self {
                    $(Self::$Abc(a) => a.estimated_size(),)*
                }
            }
        }

        impl ArrayBuilderImpl {
            /// Create a new array builder for the given type.
            pub fn with_capacity(capacity: usize, ty: &DataType) -> Self {
                match ty.kind() {
                    DataTypeKind::Bool => Self::Bool(BoolArrayBuilder::with_capacity(capacity)),
                    DataTypeKind::Int32 => Self::Int32(I32ArrayBuilder::with_capacity(capacity)),
                    DataTypeKind::Int64 => Self::Int64(I64ArrayBuilder::with_capacity(capacity)),
                    DataTypeKind::Float64 => {
                        Self::Float64(F64ArrayBuilder::with_capacity(capacity))
                    }
                    DataTypeKind::Decimal(_, _) => {
                        Self::Decimal(DecimalArrayBuilder::with_capacity(capacity))
                    }
                    DataTypeKind::Date => Self::Date(DateArrayBuilder::with_capacity(capacity)),
                    DataTypeKind::Timestamp => {
                        Self::Timestamp(TimestampArrayBuilder::with_capacity(capacity))
                    }
                    DataTypeKind::Interval => {
                        Self::Interval(IntervalArrayBuilder::with_capacity(capacity))
                    }
                    DataTypeKind::String => Self::String(Utf8ArrayBuilder::with_capacity(capacity)),
                    DataTypeKind::Blob => Self::Blob(BlobArrayBuilder::with_capacity(capacity)),
                    kind => panic!("unsupported column type: {kind}"),
                }
            }

            /// Appends an element to the back of the builder.
            pub fn push(&mut self, v: &DataValue) {
                match (self, v) {
                    $((Self::$Abc(b), DataValue::$Abc(v)) => b.push(Some(v.borrow())),)*
                    $((Self::$Abc(b), DataValue::Null) => b.push(None),)*
                    _ => panic!("failed to push value: type mismatch"),
                }
            }

            /// Get the value at the given index.
            pub fn get(&self, idx: usize) -> DataValue {
                match self {
                    $(Self::$Abc(b) => match b.get(idx) {
                        Some(v) => DataValue::$Abc(v.to_owned().into()),
                        None => DataValue::Null,
                    },)*
                }
            }

            /// Number of values appended so far.
            pub fn len(&self) -> usize {
                match self {
                    $(Self::$Abc(b) => b.len(),)*
                }
            }

            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            /// Remove all values, keeping the allocation.
            pub fn clear(&mut self) {
                match self {
                    $(Self::$Abc(b) => b.clear(),)*
                }
            }

            /// Estimated size of the contained values in memory.
            pub fn estimated_size(&self) -> usize {
                match self {
                    $(Self::$Abc(b) => b.estimated_size(),)*
                }
            }

            /// Finish build and return a new array.
            pub fn finish(self) -> ArrayImpl {
                match self {
                    $(Self::$Abc(b) => ArrayImpl::$Abc(b.finish()),)*
                }
            }

            /// Materialize an array with the current contents, keeping the builder.
            pub fn finish_cloned(&self) -> ArrayImpl {
                match self {
                    $(Self::$Abc(b) => ArrayImpl::$Abc(b.finish_cloned()),)*
                }
            }
        }
    }
}

for_all_variants! { impl_array_impl }
