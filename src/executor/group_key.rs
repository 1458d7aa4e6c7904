// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

//! Group-key encoding.
//!
//! Every row of the `GROUP BY` expression list is encoded into a byte
//! string such that two rows produce the same bytes exactly when SQL
//! considers their group-by tuples equal: integers widen to big-endian
//! `i64`, floats are IEEE-normalized (`-0.0` encodes as `0.0`), decimals
//! are brought to the declared scale, strings are normalized under their
//! collation, and NULL gets a tag of its own so NULL groups never collide
//! with values.

use std::borrow::Cow;

use crate::array::{Array, ArrayImpl, DataChunk};
use crate::executor::ExecutorError;
use crate::expr::{Collation, Expression};
use crate::types::DataTypeKind;

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_DECIMAL: u8 = 0x04;
const TAG_DATE: u8 = 0x05;
const TAG_TIMESTAMP: u8 = 0x06;
const TAG_INTERVAL: u8 = 0x07;
const TAG_BYTES: u8 = 0x08;

/// Encode the group key of every row of `chunk` into `keys`.
///
/// The buffers in `keys` are reused across chunks to avoid per-row
/// allocation: existing entries are truncated, missing ones appended.
pub fn encode_group_keys(
    group_by: &[Expression],
    chunk: &DataChunk,
    keys: &mut Vec<Vec<u8>>,
) -> Result<(), ExecutorError> {
    let num_rows = chunk.num_rows();
    for key in keys.iter_mut().take(num_rows) {
        key.clear();
    }
    while keys.len() < num_rows {
        keys.push(Vec::with_capacity(10 * group_by.len()));
    }

    for expr in group_by {
        let array = expr.eval(chunk)?;
        encode_column(expr, &array, &mut keys[..num_rows]);
    }
    Ok(())
}

/// Append the encoding of one column to each row's key buffer.
fn encode_column(expr: &Expression, array: &ArrayImpl, keys: &mut [Vec<u8>]) {
    match array {
        ArrayImpl::Bool(a) => {
            for (i, buf) in keys.iter_mut().enumerate() {
                match a.get(i) {
                    Some(v) => {
                        buf.push(TAG_BOOL);
                        buf.push(*v as u8);
                    }
                    None => buf.push(TAG_NULL),
                }
            }
        }
        ArrayImpl::Int32(a) => {
            for (i, buf) in keys.iter_mut().enumerate() {
                match a.get(i) {
                    Some(v) => encode_int(buf, *v as i64),
                    None => buf.push(TAG_NULL),
                }
            }
        }
        ArrayImpl::Int64(a) => {
            for (i, buf) in keys.iter_mut().enumerate() {
                match a.get(i) {
                    Some(v) => encode_int(buf, *v),
                    None => buf.push(TAG_NULL),
                }
            }
        }
        ArrayImpl::Float64(a) => {
            for (i, buf) in keys.iter_mut().enumerate() {
                match a.get(i) {
                    Some(v) => encode_float(buf, v.0),
                    None => buf.push(TAG_NULL),
                }
            }
        }
        ArrayImpl::Decimal(a) => {
            let scale = declared_decimal_scale(expr);
            for (i, buf) in keys.iter_mut().enumerate() {
                match a.get(i) {
                    Some(v) => encode_decimal(buf, *v, scale),
                    None => buf.push(TAG_NULL),
                }
            }
        }
        ArrayImpl::Date(a) => {
            for (i, buf) in keys.iter_mut().enumerate() {
                match a.get(i) {
                    Some(v) => {
                        buf.push(TAG_DATE);
                        buf.extend_from_slice(&v.get_inner().to_be_bytes());
                    }
                    None => buf.push(TAG_NULL),
                }
            }
        }
        ArrayImpl::Timestamp(a) => {
            for (i, buf) in keys.iter_mut().enumerate() {
                match a.get(i) {
                    Some(v) => {
                        buf.push(TAG_TIMESTAMP);
                        buf.extend_from_slice(&v.get_inner().to_be_bytes());
                    }
                    None => buf.push(TAG_NULL),
                }
            }
        }
        ArrayImpl::Interval(a) => {
            for (i, buf) in keys.iter_mut().enumerate() {
                match a.get(i) {
                    Some(v) => {
                        buf.push(TAG_INTERVAL);
                        buf.extend_from_slice(&v.months().to_be_bytes());
                        buf.extend_from_slice(&v.days().to_be_bytes());
                        buf.extend_from_slice(&v.millis().to_be_bytes());
                    }
                    None => buf.push(TAG_NULL),
                }
            }
        }
        ArrayImpl::String(a) => {
            let collation = expr.collation();
            for (i, buf) in keys.iter_mut().enumerate() {
                match a.get(i) {
                    Some(v) => encode_bytes(buf, normalize_str(v, collation).as_bytes()),
                    None => buf.push(TAG_NULL),
                }
            }
        }
        ArrayImpl::Blob(a) => {
            for (i, buf) in keys.iter_mut().enumerate() {
                match a.get(i) {
                    Some(v) => encode_bytes(buf, v.as_bytes()),
                    None => buf.push(TAG_NULL),
                }
            }
        }
    }
}

/// Append the encoding of a single cell, for the group boundary detector's
/// first/last row probes.
pub(crate) fn encode_cell(buf: &mut Vec<u8>, expr: &Expression, array: &ArrayImpl, row: usize) {
    match array {
        ArrayImpl::Bool(a) => match a.get(row) {
            Some(v) => {
                buf.push(TAG_BOOL);
                buf.push(*v as u8);
            }
            None => buf.push(TAG_NULL),
        },
        ArrayImpl::Int32(a) => match a.get(row) {
            Some(v) => encode_int(buf, *v as i64),
            None => buf.push(TAG_NULL),
        },
        ArrayImpl::Int64(a) => match a.get(row) {
            Some(v) => encode_int(buf, *v),
            None => buf.push(TAG_NULL),
        },
        ArrayImpl::Float64(a) => match a.get(row) {
            Some(v) => encode_float(buf, v.0),
            None => buf.push(TAG_NULL),
        },
        ArrayImpl::Decimal(a) => match a.get(row) {
            Some(v) => encode_decimal(buf, *v, declared_decimal_scale(expr)),
            None => buf.push(TAG_NULL),
        },
        ArrayImpl::Date(a) => match a.get(row) {
            Some(v) => {
                buf.push(TAG_DATE);
                buf.extend_from_slice(&v.get_inner().to_be_bytes());
            }
            None => buf.push(TAG_NULL),
        },
        ArrayImpl::Timestamp(a) => match a.get(row) {
            Some(v) => {
                buf.push(TAG_TIMESTAMP);
                buf.extend_from_slice(&v.get_inner().to_be_bytes());
            }
            None => buf.push(TAG_NULL),
        },
        ArrayImpl::Interval(a) => match a.get(row) {
            Some(v) => {
                buf.push(TAG_INTERVAL);
                buf.extend_from_slice(&v.months().to_be_bytes());
                buf.extend_from_slice(&v.days().to_be_bytes());
                buf.extend_from_slice(&v.millis().to_be_bytes());
            }
            None => buf.push(TAG_NULL),
        },
        ArrayImpl::String(a) => match a.get(row) {
            Some(v) => encode_bytes(buf, normalize_str(v, expr.collation()).as_bytes()),
            None => buf.push(TAG_NULL),
        },
        ArrayImpl::Blob(a) => match a.get(row) {
            Some(v) => encode_bytes(buf, v.as_bytes()),
            None => buf.push(TAG_NULL),
        },
    }
}

fn encode_int(buf: &mut Vec<u8>, v: i64) {
    buf.push(TAG_INT);
    buf.extend_from_slice(&v.to_be_bytes());
}

fn encode_float(buf: &mut Vec<u8>, v: f64) {
    // -0.0 and +0.0 are the same SQL value. NaN is rejected upstream.
    let v = if v == 0.0 { 0.0 } else { v };
    debug_assert!(!v.is_nan());
    buf.push(TAG_FLOAT);
    buf.extend_from_slice(&v.to_be_bytes());
}

fn encode_decimal(buf: &mut Vec<u8>, v: rust_decimal::Decimal, scale: Option<u32>) {
    buf.push(TAG_DECIMAL);
    let canonical = match scale {
        // Bringing the value to the declared scale keeps `1.10` and `1.1`
        // in the same group when the column is DECIMAL(p, 1).
        Some(scale) => {
            let mut v = v;
            v.rescale(scale);
            v
        }
        // A zero or unknown scale must leave the value unscaled, or
        // rescaling would truncate the fraction away.
        None => v.normalize(),
    };
    buf.extend_from_slice(&canonical.mantissa().to_be_bytes());
    buf.extend_from_slice(&canonical.scale().to_be_bytes());
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.push(TAG_BYTES);
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// The declared scale of a decimal expression, if it is usable.
fn declared_decimal_scale(expr: &Expression) -> Option<u32> {
    match expr.return_type().kind() {
        DataTypeKind::Decimal(_, Some(scale)) if scale > 0 => Some(scale as u32),
        _ => None,
    }
}

/// Normalize a string under its collation, the same way for hashing and
/// for adjacent-row comparison.
pub(crate) fn normalize_str(s: &str, collation: Collation) -> Cow<'_, str> {
    match collation {
        Collation::Binary => Cow::Borrowed(s),
        Collation::CaseInsensitive => {
            let trimmed = s.trim_end_matches(' ');
            if trimmed.chars().all(|c| c.is_lowercase() || !c.is_alphabetic()) {
                Cow::Borrowed(trimmed)
            } else {
                Cow::Owned(trimmed.to_lowercase())
            }
        }
    }
}
