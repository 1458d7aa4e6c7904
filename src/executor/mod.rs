// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

//! # Execution Model
//!
//! Executors form a pull-based pipeline: the caller opens the operator,
//! repeatedly asks it to fill a caller-owned [`DataChunk`], and closes it. An
//! empty chunk signals end-of-stream. `next` always resets the chunk first,
//! so operators can hand chunks back and forth for reuse.
//!
//! The hash aggregation operator internally fans work out to tokio tasks
//! connected by bounded channels; everything else is sequential.

use async_trait::async_trait;

use crate::array::DataChunk;
use crate::types::{ConvertError, DataType};

pub mod aggregation;
mod context;
mod group_checker;
mod group_key;
mod hash_agg;
mod sort_agg;

#[cfg(test)]
pub(crate) mod test_utils;

pub use self::context::{ExecutorContext, SessionConfig};
pub use self::group_checker::VecGroupChecker;
pub use self::hash_agg::HashAggExecutor;
pub use self::sort_agg::SortAggExecutor;

/// The error type of execution.
#[derive(thiserror::Error, Debug)]
pub enum ExecutorError {
    #[error("conversion error: {0}")]
    Convert(
        #[from]
        #[source]
        ConvertError,
    ),
    #[error("memory quota exceeded ({0} bytes)")]
    MemoryExceeded(i64),
    #[error("internal error: {0}")]
    Internal(String),
}

/// A type-erased executor object.
pub type BoxedExecutor = Box<dyn Executor>;

/// The operator contract of the execution engine.
///
/// Lifecycle: `open` initializes the operator lazily (no work starts),
/// `next` fills the caller's chunk with up to its capacity of rows, and
/// `close` cancels and joins whatever is still running. `close` is
/// idempotent and is safe to call at any point after `open`, including
/// before the first `next`.
#[async_trait]
pub trait Executor: Send {
    /// The output column types.
    fn schema(&self) -> &[DataType];

    /// Initialize the operator.
    async fn open(&mut self, ctx: &ExecutorContext) -> Result<(), ExecutorError>;

    /// Fill `chunk` with the next batch of rows.
    ///
    /// The chunk is reset first. Returning it empty signals end-of-stream.
    async fn next(&mut self, chunk: &mut DataChunk) -> Result<(), ExecutorError>;

    /// Cancel and join all pending work.
    async fn close(&mut self) -> Result<(), ExecutorError>;
}
