// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

//! Scripted executors for operator tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::{Executor, ExecutorContext, ExecutorError};
use crate::array::DataChunk;
use crate::types::{DataType, DataValue};

/// A child executor that produces a scripted sequence of chunks.
pub(crate) struct MockExecutor {
    schema: Vec<DataType>,
    chunks: VecDeque<Vec<Vec<DataValue>>>,
    /// Repeat this row forever after the scripted chunks run out.
    infinite_row: Option<Vec<DataValue>>,
    /// Fail the call after the scripted chunks run out.
    fail: bool,
    closed: Arc<AtomicBool>,
}

impl MockExecutor {
    pub fn new(schema: Vec<DataType>) -> Self {
        MockExecutor {
            schema,
            chunks: VecDeque::new(),
            infinite_row: None,
            fail: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Append a scripted chunk of rows.
    pub fn chunk(mut self, rows: Vec<Vec<DataValue>>) -> Self {
        self.chunks.push_back(rows);
        self
    }

    /// Produce `row` forever once the scripted chunks run out.
    pub fn infinite(mut self, row: Vec<DataValue>) -> Self {
        self.infinite_row = Some(row);
        self
    }

    /// Fail with an internal error once the scripted chunks run out.
    pub fn fail_at_end(mut self) -> Self {
        self.fail = true;
        self
    }

    /// A flag that turns true when the executor is closed.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    fn schema(&self) -> &[DataType] {
        &self.schema
    }

    async fn open(&mut self, _ctx: &ExecutorContext) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn next(&mut self, chunk: &mut DataChunk) -> Result<(), ExecutorError> {
        chunk.reset();
        if let Some(rows) = self.chunks.pop_front() {
            for row in rows {
                chunk.append_row(row);
            }
            return Ok(());
        }
        if let Some(row) = &self.infinite_row {
            while !chunk.is_full() {
                chunk.append_row(row.clone());
            }
            // Let the runtime schedule cancellation in.
            tokio::task::yield_now().await;
            return Ok(());
        }
        if self.fail {
            return Err(ExecutorError::Internal("scripted child failure".into()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExecutorError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Drain an executor into a vector of rows.
pub(crate) async fn collect_rows(
    exec: &mut dyn Executor,
    ctx: &ExecutorContext,
) -> Result<Vec<Vec<DataValue>>, ExecutorError> {
    let mut out = DataChunk::new(exec.schema(), ctx.config().max_chunk_size);
    let mut rows = vec![];
    loop {
        exec.next(&mut out).await?;
        if out.num_rows() == 0 {
            return Ok(rows);
        }
        for row in out.rows() {
            rows.push(row.values().collect());
        }
    }
}
