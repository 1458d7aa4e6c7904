// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

//! Hierarchical memory accounting.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A hierarchical memory usage counter with an optional quota.
///
/// Every consumer reports its allocation deltas with [`consume`]; deltas
/// propagate up the parent chain atomically. A quota of zero or less means
/// unlimited. Exceeding the quota does not fail the `consume` call itself:
/// workers poll [`exceeded`] at their next safe point and unwind from there.
///
/// [`consume`]: MemTracker::consume
/// [`exceeded`]: MemTracker::exceeded
pub struct MemTracker {
    consumed: AtomicI64,
    quota: i64,
    parent: Option<Arc<MemTracker>>,
}

impl MemTracker {
    /// Create a root tracker with the given quota in bytes.
    pub fn root(quota: i64) -> Arc<Self> {
        Arc::new(MemTracker {
            consumed: AtomicI64::new(0),
            quota,
            parent: None,
        })
    }

    /// Create an unlimited child tracker attached to `self`.
    pub fn child(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(MemTracker {
            consumed: AtomicI64::new(0),
            quota: 0,
            parent: Some(self.clone()),
        })
    }

    /// Report a memory usage delta in bytes. Negative deltas release memory.
    pub fn consume(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        self.consumed.fetch_add(delta, Ordering::Relaxed);
        if let Some(parent) = &self.parent {
            parent.consume(delta);
        }
    }

    /// Current memory usage in bytes.
    pub fn consumed(&self) -> i64 {
        self.consumed.load(Ordering::Relaxed)
    }

    /// The quota in bytes, or `None` if unlimited.
    pub fn quota(&self) -> Option<i64> {
        (self.quota > 0).then_some(self.quota)
    }

    /// Whether this tracker or any ancestor is over its quota.
    pub fn exceeded(&self) -> bool {
        if self.quota > 0 && self.consumed() > self.quota {
            return true;
        }
        match &self.parent {
            Some(parent) => parent.exceeded(),
            None => false,
        }
    }

    /// The smallest quota along the parent chain, for error reporting.
    pub fn effective_quota(&self) -> Option<i64> {
        let inherited = self.parent.as_ref().and_then(|p| p.effective_quota());
        match (self.quota(), inherited) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Zero this tracker, releasing everything it consumed from its parents.
    pub fn detach(&self) {
        let consumed = self.consumed.swap(0, Ordering::Relaxed);
        if consumed != 0 {
            if let Some(parent) = &self.parent {
                parent.consume(-consumed);
            }
        }
    }
}
