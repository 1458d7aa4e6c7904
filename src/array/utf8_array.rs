// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use std::marker::PhantomData;

use bitvec::vec::BitVec;
use serde::Serialize;

use super::{Array, ArrayBuilder};
use crate::types::BlobRef;

/// A collection of variable-length values.
#[derive(Debug, PartialEq, Serialize)]
#[serde(bound = "")]
pub struct BytesArray<T: ValueRef + ?Sized> {
    offset: Vec<usize>,
    valid: BitVec,
    data: Vec<u8>,
    _type: PhantomData<T>,
}

impl<T: ValueRef + ?Sized> Clone for BytesArray<T> {
    fn clone(&self) -> Self {
        Self {
            offset: self.offset.clone(),
            valid: self.valid.clone(),
            data: self.data.clone(),
            _type: PhantomData,
        }
    }
}

/// The borrowed type of a variable-length value.
pub trait ValueRef: ToOwned + AsRef<[u8]> + Send + Sync + 'static {
    fn from_bytes(s: &[u8]) -> &Self;
}

impl ValueRef for str {
    fn from_bytes(s: &[u8]) -> &Self {
        // SAFETY: only a `&str` can be pushed into a `BytesArray<str>`.
        unsafe { std::str::from_utf8_unchecked(s) }
    }
}

impl ValueRef for BlobRef {
    fn from_bytes(s: &[u8]) -> &Self {
        BlobRef::new(s)
    }
}

impl<T: ValueRef + ?Sized> Array for BytesArray<T> {
    type Item = T;
    type Builder = BytesArrayBuilder<T>;

    fn get(&self, idx: usize) -> Option<&T> {
        if self.valid[idx] {
            let data_slice = &self.data[self.offset[idx]..self.offset[idx + 1]];
            Some(T::from_bytes(data_slice))
        } else {
            None
        }
    }

    fn len(&self) -> usize {
        self.valid.len()
    }

    fn estimated_size(&self) -> usize {
        self.data.len() + self.valid.len() / 8 + self.valid.len() * std::mem::size_of::<usize>()
    }
}

impl<'a, T: ValueRef + ?Sized> FromIterator<Option<&'a T>> for BytesArray<T> {
    fn from_iter<I: IntoIterator<Item = Option<&'a T>>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut builder = BytesArrayBuilder::<T>::with_capacity(iter.size_hint().0);
        for e in iter {
            builder.push(e);
        }
        builder.finish()
    }
}

/// A builder that uses `&T` to build a [`BytesArray`].
pub struct BytesArrayBuilder<T: ValueRef + ?Sized> {
    offset: Vec<usize>,
    valid: BitVec,
    data: Vec<u8>,
    _type: PhantomData<T>,
}

impl<T: ValueRef + ?Sized> ArrayBuilder for BytesArrayBuilder<T> {
    type Array = BytesArray<T>;

    fn with_capacity(capacity: usize) -> Self {
        let mut offset = Vec::with_capacity(capacity + 1);
        offset.push(0);
        Self {
            offset,
            valid: BitVec::with_capacity(capacity),
            data: Vec::with_capacity(capacity * 8),
            _type: PhantomData,
        }
    }

    fn push(&mut self, value: Option<&T>) {
        self.valid.push(value.is_some());
        if let Some(x) = value {
            self.data.extend_from_slice(x.as_ref());
        }
        self.offset.push(self.data.len());
    }

    fn append(&mut self, other: &BytesArray<T>) {
        self.valid.extend_from_bitslice(&other.valid);
        let base = self.data.len();
        self.data.extend_from_slice(&other.data);
        self.offset.extend(other.offset[1..].iter().map(|o| o + base));
    }

    fn get(&self, idx: usize) -> Option<&T> {
        if self.valid[idx] {
            let data_slice = &self.data[self.offset[idx]..self.offset[idx + 1]];
            Some(T::from_bytes(data_slice))
        } else {
            None
        }
    }

    fn len(&self) -> usize {
        self.valid.len()
    }

    fn clear(&mut self) {
        self.offset.truncate(1);
        self.valid.clear();
        self.data.clear();
    }

    fn estimated_size(&self) -> usize {
        self.data.len() + self.valid.len() / 8 + self.valid.len() * std::mem::size_of::<usize>()
    }

    fn finish(self) -> BytesArray<T> {
        BytesArray {
            offset: self.offset,
            valid: self.valid,
            data: self.data,
            _type: PhantomData,
        }
    }

    fn finish_cloned(&self) -> BytesArray<T> {
        BytesArray {
            offset: self.offset.clone(),
            valid: self.valid.clone(),
            data: self.data.clone(),
            _type: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_get() {
        let mut builder = BytesArrayBuilder::<str>::with_capacity(4);
        builder.push(Some("millstone"));
        builder.push(None);
        builder.push(Some(""));
        assert_eq!(builder.get(0), Some("millstone"));
        assert_eq!(builder.get(1), None);
        assert_eq!(builder.get(2), Some(""));

        let array = builder.finish();
        assert_eq!(
            array.iter().collect::<Vec<_>>(),
            vec![Some("millstone"), None, Some("")]
        );
    }

    #[test]
    fn clear_resets_offsets() {
        let mut builder = BytesArrayBuilder::<str>::with_capacity(2);
        builder.push(Some("abc"));
        builder.clear();
        builder.push(Some("de"));
        assert_eq!(builder.get(0), Some("de"));
    }
}
