// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A time span, normalized to months, days and milliseconds.
///
/// The three fields do not convert into each other: `1 month` is not a fixed
/// number of days, so equality and ordering compare the fields verbatim.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Interval {
    months: i32,
    days: i32,
    millis: i64,
}

impl Interval {
    pub const fn new(months: i32, days: i32, millis: i64) -> Self {
        Interval {
            months,
            days,
            millis,
        }
    }

    pub const fn from_days(days: i32) -> Self {
        Interval::new(0, days, 0)
    }

    pub const fn from_months(months: i32) -> Self {
        Interval::new(months, 0, 0)
    }

    pub const fn months(&self) -> i32 {
        self.months
    }

    pub const fn days(&self) -> i32 {
        self.days
    }

    pub const fn millis(&self) -> i64 {
        self.millis
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (y, m) = (self.months / 12, self.months % 12);
        let mut parts = vec![];
        if y != 0 {
            parts.push(format!("{y} years"));
        }
        if m != 0 {
            parts.push(format!("{m} months"));
        }
        if self.days != 0 {
            parts.push(format!("{} days", self.days));
        }
        if self.millis != 0 || parts.is_empty() {
            parts.push(format!("{} ms", self.millis));
        }
        write!(f, "{}", parts.join(" "))
    }
}
