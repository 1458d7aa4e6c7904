// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::memory::MemTracker;

/// Session options recognized by the aggregation operators.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Number of partial workers of parallel hash aggregation.
    pub partial_concurrency: usize,
    /// Number of final workers of parallel hash aggregation.
    pub final_concurrency: usize,
    /// Output chunk capacity.
    pub max_chunk_size: usize,
    /// Initial chunk allocation, grown toward `max_chunk_size` on demand.
    pub init_chunk_size: usize,
    /// Memory budget of the query in bytes. Zero or less means unlimited.
    pub mem_quota_query: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            partial_concurrency: 4,
            final_concurrency: 4,
            max_chunk_size: 1024,
            init_chunk_size: 32,
            mem_quota_query: 0,
        }
    }
}

/// Context shared by the executors of one query.
///
/// Cloning is cheap; clones share the memory tracker and the cancellation
/// token. Operators derive child tokens from [`token`](Self::token), so
/// cancelling the context propagates into every running operator.
#[derive(Clone)]
pub struct ExecutorContext {
    config: SessionConfig,
    mem: Arc<MemTracker>,
    token: CancellationToken,
}

impl ExecutorContext {
    pub fn new(config: SessionConfig) -> Self {
        let mem = MemTracker::root(config.mem_quota_query);
        ExecutorContext {
            config,
            mem,
            token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The query-level memory tracker.
    pub fn mem(&self) -> &Arc<MemTracker> {
        &self.mem
    }

    /// The query-level cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the query.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for ExecutorContext {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
