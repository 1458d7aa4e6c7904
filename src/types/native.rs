// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use std::fmt::Debug;

use rust_decimal::Decimal;

use super::{Date, Interval, Timestamp, F64};

/// Types that can be stored in a fixed-width primitive array.
pub trait NativeType:
    PartialOrd + PartialEq + Debug + Copy + Send + Sync + Sized + Default + 'static
{
}

macro_rules! impl_native {
    ($($t:ty),*) => {
        $(impl NativeType for $t {})*
    }
}
impl_native!(bool, i32, i64, F64, Decimal, Date, Timestamp, Interval);
