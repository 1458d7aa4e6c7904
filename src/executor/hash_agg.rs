// Copyright 2026 Millstone Project Authors. Licensed under Apache-2.0.

//! Hash aggregation.
//!
//! The parallel execution flow is as the following graph shows:
//!
//! ```text
//!                      caller (next)
//!                           ^
//!                           |  final_output (bounded N)
//!            +--------------+--------------+
//!            |                             |
//!     +------+-------+             +-------+------+
//!     | final worker |    ......   | final worker |
//!     +------+-------+             +-------+------+
//!            ^                             ^
//!            |  partial_outbox[j]          |  (bounded M, shuffled
//!            +-------------+---------------+   by group-key hash)
//!                          |
//!        +-----------------+-----------------+
//!        |                                   |
//!  +-----+----------+               +--------+-------+
//!  | partial worker |     ......    | partial worker |
//!  +-----+----------+               +--------+-------+
//!        ^                                   ^
//!        |  partial_inbox[i] (cap 1)         |
//!        +-----------------+-----------------+
//!                          |
//!                   +------+------+
//!                   | data fetcher| <--- input tickets recycled
//!                   +------+------+      through input_ch (cap M)
//!                          |
//!                        child
//! ```
//!
//! Chunks travel inside tickets that carry their own return address, so the
//! same M chunks circulate between the fetcher and the partial workers for
//! the whole query: back-pressure and reuse come from one mechanism.
//!
//! When any aggregate call is DISTINCT the shuffle cannot preserve its
//! semantics across workers, so the operator runs a single-threaded
//! fallback over the same kernels instead.

use std::sync::Arc;

use ahash::{HashMap, HashMapExt};
use futures::FutureExt;
use itertools::Itertools;
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::aggregation::{build_agg_funcs, AggFunc, PartialResult};
use super::group_key::encode_group_keys;
use super::{BoxedExecutor, Executor, ExecutorContext, ExecutorError};
use crate::array::{ArrayImpl, DataChunk};
use crate::expr::{AggCall, Expression};
use crate::memory::MemTracker;
use crate::types::DataType;

/// The partial results of all aggregates for one group.
type AggPartialResults = SmallVec<[PartialResult; 4]>;

/// Mapping from encoded group key to the group's partial results.
type AggPartialResultMap = HashMap<Vec<u8>, AggPartialResults>;

/// Route a group key to a final worker. The seeds are fixed so that every
/// partial worker routes the same key to the same final worker.
fn final_worker_index(key: &[u8], final_concurrency: usize) -> usize {
    let hasher = ahash::RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    );
    (hasher.hash_one(key) as usize) % final_concurrency
}

/// An empty chunk on its way back to the fetcher, carrying the address of
/// the partial worker it belongs to.
struct HashAggInput {
    chunk: DataChunk,
    give_back: mpsc::Sender<HashAggInput>,
}

/// A slice of one partial worker's group state, shuffled to one final
/// worker. The map is frozen once shuffling begins; final workers only read
/// the entries named by `group_keys`.
struct HashAggIntermData {
    group_keys: Vec<Vec<u8>>,
    cursor: usize,
    map: Arc<AggPartialResultMap>,
}

impl HashAggIntermData {
    /// The next batch of at most `max` keys, to bound peak working memory.
    fn next_batch(&mut self, max: usize) -> Option<std::ops::Range<usize>> {
        if self.cursor >= self.group_keys.len() {
            return None;
        }
        let begin = self.cursor;
        self.cursor = (self.cursor + max).min(self.group_keys.len());
        Some(begin..self.cursor)
    }
}

/// One delivery on the final output channel: a result chunk with its return
/// address, or the error that ended the query.
enum AggFinalResult {
    Chunk {
        chunk: DataChunk,
        give_back: mpsc::Sender<DataChunk>,
    },
    Error(ExecutorError),
}

/// Extract a displayable message from a panic payload.
fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).into()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

/// Run a worker future under a panic boundary: a panic becomes an internal
/// error on the final output channel and shuts the query down.
fn spawn_supervised(
    name: &'static str,
    task: impl std::future::Future<Output = ()> + Send + 'static,
    output: mpsc::Sender<AggFinalResult>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(panic) = std::panic::AssertUnwindSafe(task).catch_unwind().await {
            let message = panic_message(panic);
            error!("{name} panicked: {message}");
            let _ = output
                .send(AggFinalResult::Error(ExecutorError::Internal(format!(
                    "{name} panicked: {message}"
                ))))
                .await;
        }
    })
}

/// Allocate the partial results of one fresh group, charging the tracker.
fn alloc_group(
    funcs: &[Box<dyn AggFunc>],
    key: &[u8],
    mem: &MemTracker,
) -> AggPartialResults {
    let mut results = AggPartialResults::with_capacity(funcs.len());
    let mut mem_delta = key.len() as i64;
    for func in funcs {
        let (pr, delta) = func.alloc_partial_result();
        mem_delta += delta;
        results.push(pr);
    }
    mem.consume(mem_delta);
    results
}

fn quota_error(mem: &MemTracker) -> ExecutorError {
    ExecutorError::MemoryExceeded(mem.effective_quota().unwrap_or_default())
}

/// Pulls chunks from the child into input tickets and forwards them to the
/// addressed partial workers.
struct HashAggFetcher {
    child: BoxedExecutor,
    input_rx: mpsc::Receiver<HashAggInput>,
    output: mpsc::Sender<AggFinalResult>,
    finish: CancellationToken,
    mem: Arc<MemTracker>,
}

impl HashAggFetcher {
    async fn run(mut self) {
        loop {
            let mut input = tokio::select! {
                _ = self.finish.cancelled() => break,
                input = self.input_rx.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
            };
            let pre = input.chunk.memory_usage() as i64;
            match self.child.next(&mut input.chunk).await {
                Err(e) => {
                    self.mem.consume(-pre);
                    let _ = self.output.send(AggFinalResult::Error(e)).await;
                    break;
                }
                Ok(()) => {
                    let post = input.chunk.memory_usage() as i64;
                    self.mem.consume(post - pre);
                    if input.chunk.num_rows() == 0 {
                        self.mem.consume(-post);
                        break;
                    }
                    let give_back = input.give_back.clone();
                    if give_back.send(input).await.is_err() {
                        // The worker is gone; the query is shutting down.
                        break;
                    }
                }
            }
        }
        // Settle the accounting of every ticket still in flight. Closing
        // the channel fails later recycling sends, so the workers drop
        // their (already reset) tickets themselves.
        self.input_rx.close();
        while let Some(input) = self.input_rx.recv().await {
            self.mem.consume(-(input.chunk.memory_usage() as i64));
        }
        if let Err(e) = self.child.close().await {
            let _ = self.output.send(AggFinalResult::Error(e)).await;
        }
        debug!("hash aggregation fetcher finished");
    }
}

/// Builds a private group state map from raw input chunks, then shuffles it
/// to the final workers by group-key hash.
struct HashAggPartialWorker {
    id: usize,
    finish: CancellationToken,
    funcs: Arc<Vec<Box<dyn AggFunc>>>,
    agg_calls: Arc<Vec<AggCall>>,
    group_by: Arc<Vec<Expression>>,
    inbox: mpsc::Receiver<HashAggInput>,
    outboxes: Vec<mpsc::Sender<HashAggIntermData>>,
    output: mpsc::Sender<AggFinalResult>,
    input_ch: mpsc::Sender<HashAggInput>,
    /// Input data is swapped from the ticket chunk into this scratch chunk,
    /// so the ticket can be recycled immediately.
    chunk: DataChunk,
    map: AggPartialResultMap,
    key_buf: Vec<Vec<u8>>,
    mem: Arc<MemTracker>,
}

impl HashAggPartialWorker {
    async fn run(mut self) {
        let mut need_shuffle = false;
        loop {
            let mut input = tokio::select! {
                _ = self.finish.cancelled() => break,
                input = self.inbox.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
            };
            // Take the data and send the emptied ticket back for reuse.
            let consumed = self.chunk.memory_usage() as i64;
            self.chunk.swap_columns(&mut input.chunk);
            input.chunk.reset();
            self.mem.consume(-consumed);
            // On failure the fetcher is gone and no further input can
            // arrive, but the chunk just received still counts.
            let _ = self.input_ch.send(input).await;
            if self.chunk.num_rows() == 0 {
                continue;
            }
            if let Err(e) = self.update_partial_results() {
                let _ = self.output.send(AggFinalResult::Error(e)).await;
                self.mem.consume(-(self.chunk.memory_usage() as i64));
                return;
            }
            // The local map is known to be non-empty from here on.
            need_shuffle = true;
        }
        if need_shuffle {
            self.shuffle().await;
        }
        self.mem.consume(-(self.chunk.memory_usage() as i64));
        debug!("hash aggregation partial worker {} finished", self.id);
    }

    fn update_partial_results(&mut self) -> Result<(), ExecutorError> {
        encode_group_keys(&self.group_by, &self.chunk, &mut self.key_buf)?;
        let args: Vec<Vec<ArrayImpl>> = self
            .agg_calls
            .iter()
            .map(|call| call.arg.iter().map(|e| e.eval(&self.chunk)).try_collect())
            .try_collect()?;

        for row in 0..self.chunk.num_rows() {
            let key = &self.key_buf[row];
            if !self.map.contains_key(key) {
                let results = alloc_group(&self.funcs, key, &self.mem);
                self.map.insert(key.clone(), results);
            }
            // just inserted above, so the key must exist
            let results = self.map.get_mut(key).unwrap();
            for ((func, pr), args) in self
                .funcs
                .iter()
                .zip_eq(results.iter_mut())
                .zip_eq(&args)
            {
                let mem_delta = func.update_partial_result(pr, args, row, row + 1)?;
                self.mem.consume(mem_delta);
            }
        }
        if self.mem.exceeded() {
            return Err(quota_error(&self.mem));
        }
        Ok(())
    }

    /// Partition the local map by group-key hash and hand one slice to each
    /// final worker. The map is frozen into an `Arc` first and never
    /// mutated again.
    async fn shuffle(&mut self) {
        let final_concurrency = self.outboxes.len();
        let map = Arc::new(std::mem::take(&mut self.map));
        let mut buckets: Vec<Vec<Vec<u8>>> = vec![Vec::new(); final_concurrency];
        for key in map.keys() {
            buckets[final_worker_index(key, final_concurrency)].push(key.clone());
        }
        for (worker, group_keys) in buckets.into_iter().enumerate() {
            if group_keys.is_empty() {
                continue;
            }
            let interm = HashAggIntermData {
                group_keys,
                cursor: 0,
                map: map.clone(),
            };
            tokio::select! {
                _ = self.finish.cancelled() => return,
                sent = self.outboxes[worker].send(interm) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Merges the partial state shuffled to its bucket and emits final result
/// chunks.
struct HashAggFinalWorker {
    id: usize,
    finish: CancellationToken,
    funcs: Arc<Vec<Box<dyn AggFunc>>>,
    inbox: mpsc::Receiver<HashAggIntermData>,
    output: mpsc::Sender<AggFinalResult>,
    /// Holds the one output chunk this worker cycles through the caller.
    holder_rx: mpsc::Receiver<DataChunk>,
    holder_tx: mpsc::Sender<DataChunk>,
    map: AggPartialResultMap,
    /// Group keys in first-contact order; the map answers membership.
    group_keys: Vec<Vec<u8>>,
    max_chunk_size: usize,
    mem: Arc<MemTracker>,
}

impl HashAggFinalWorker {
    async fn run(mut self) {
        if let Err(e) = self.consume_interm_data().await {
            let _ = self.output.send(AggFinalResult::Error(e)).await;
            return;
        }
        if let Err(e) = self.emit_final_results().await {
            let _ = self.output.send(AggFinalResult::Error(e)).await;
        }
        debug!("hash aggregation final worker {} finished", self.id);
    }

    async fn consume_interm_data(&mut self) -> Result<(), ExecutorError> {
        loop {
            let mut interm = tokio::select! {
                _ = self.finish.cancelled() => return Ok(()),
                interm = self.inbox.recv() => match interm {
                    Some(interm) => interm,
                    None => return Ok(()),
                },
            };
            while let Some(batch) = interm.next_batch(self.max_chunk_size) {
                for idx in batch {
                    let key = &interm.group_keys[idx];
                    if !self.map.contains_key(key) {
                        let results = alloc_group(&self.funcs, key, &self.mem);
                        self.map.insert(key.clone(), results);
                        self.group_keys.push(key.clone());
                    }
                    let dst = self.map.get_mut(key).unwrap();
                    let src = interm
                        .map
                        .get(key)
                        .expect("shuffled key missing from the frozen map");
                    for ((func, dst_pr), src_pr) in
                        self.funcs.iter().zip_eq(dst.iter_mut()).zip_eq(src.iter())
                    {
                        let mem_delta = func.merge_partial_result(src_pr.as_ref(), dst_pr)?;
                        self.mem.consume(mem_delta);
                    }
                }
                if self.mem.exceeded() {
                    return Err(quota_error(&self.mem));
                }
            }
        }
    }

    async fn receive_result_holder(&mut self) -> Option<DataChunk> {
        tokio::select! {
            _ = self.finish.cancelled() => None,
            chunk = self.holder_rx.recv() => chunk,
        }
    }

    async fn emit_final_results(&mut self) -> Result<(), ExecutorError> {
        let Some(mut chunk) = self.receive_result_holder().await else {
            return Ok(());
        };
        for i in 0..self.group_keys.len() {
            let results = &self.map[&self.group_keys[i]];
            if self.funcs.is_empty() {
                chunk.set_num_virtual_rows(chunk.num_rows() + 1);
            }
            for (func, pr) in self.funcs.iter().zip_eq(results.iter()) {
                func.append_final_result(pr.as_ref(), &mut chunk)?;
            }
            if chunk.is_full() {
                let result = AggFinalResult::Chunk {
                    chunk,
                    give_back: self.holder_tx.clone(),
                };
                tokio::select! {
                    _ = self.finish.cancelled() => return Ok(()),
                    sent = self.output.send(result) => {
                        if sent.is_err() {
                            return Ok(());
                        }
                    }
                }
                chunk = match self.receive_result_holder().await {
                    Some(chunk) => chunk,
                    None => return Ok(()),
                };
            }
        }
        let result = AggFinalResult::Chunk {
            chunk,
            give_back: self.holder_tx.clone(),
        };
        tokio::select! {
            _ = self.finish.cancelled() => {}
            _ = self.output.send(result) => {}
        }
        Ok(())
    }
}

/// The executor of hash aggregation.
///
/// Lazy on both axes: `open` only builds channels and worker state, and the
/// first `next` spawns the fetcher, M partial workers and N final workers.
/// `close` cancels them, drains the channels and joins every task; it is
/// idempotent and safe to call before the first `next`.
pub struct HashAggExecutor {
    agg_calls: Arc<Vec<AggCall>>,
    group_by: Arc<Vec<Expression>>,
    /// Present until `open` in parallel mode (the fetcher takes the child),
    /// for the whole lifetime in unparallel mode.
    child: Option<BoxedExecutor>,
    /// Planner-provided single-row chunk emitted when a scalar aggregate
    /// sees no input at all.
    default_val: Option<DataChunk>,
    schema: Vec<DataType>,
    is_unparallel: bool,

    mem: Option<Arc<MemTracker>>,
    finish: CancellationToken,
    prepared: bool,
    executed: bool,
    is_child_empty: bool,
    closed: bool,

    // Parallel mode: built at `open`, spawned at the first `next`.
    partial_workers: Vec<HashAggPartialWorker>,
    final_workers: Vec<HashAggFinalWorker>,
    fetcher: Option<HashAggFetcher>,
    final_output_rx: Option<mpsc::Receiver<AggFinalResult>>,
    handles: Vec<JoinHandle<()>>,

    // Unparallel mode.
    funcs: Vec<Box<dyn AggFunc>>,
    group_map: AggPartialResultMap,
    /// Group keys in first-seen order, which is also the emission order.
    group_keys_list: Vec<Vec<u8>>,
    cursor: usize,
    key_buf: Vec<Vec<u8>>,
    child_chunk: Option<DataChunk>,
}

impl HashAggExecutor {
    pub fn new(
        agg_calls: Vec<AggCall>,
        group_by: Vec<Expression>,
        child: BoxedExecutor,
        default_val: Option<DataChunk>,
    ) -> Self {
        let schema = agg_calls.iter().map(|call| call.return_type()).collect();
        // The shuffle cannot preserve DISTINCT semantics across workers.
        let is_unparallel = agg_calls.iter().any(|call| call.distinct);
        HashAggExecutor {
            agg_calls: Arc::new(agg_calls),
            group_by: Arc::new(group_by),
            child: Some(child),
            default_val,
            schema,
            is_unparallel,
            mem: None,
            finish: CancellationToken::new(),
            prepared: false,
            executed: false,
            is_child_empty: true,
            closed: false,
            partial_workers: Vec::new(),
            final_workers: Vec::new(),
            fetcher: None,
            final_output_rx: None,
            handles: Vec::new(),
            funcs: Vec::new(),
            group_map: AggPartialResultMap::new(),
            group_keys_list: Vec::new(),
            cursor: 0,
            key_buf: Vec::new(),
            child_chunk: None,
        }
    }

    /// Force the single-threaded path, as the planner does for plans the
    /// shuffle cannot serve.
    pub fn unparallel(mut self) -> Self {
        self.is_unparallel = true;
        self
    }

    fn mem(&self) -> &Arc<MemTracker> {
        self.mem.as_ref().expect("executor is not open")
    }

    fn init_for_parallel(&mut self, ctx: &ExecutorContext, child: BoxedExecutor) {
        let config = ctx.config();
        let partial_concurrency = config.partial_concurrency.max(1);
        let final_concurrency = config.final_concurrency.max(1);
        let mem = self.mem().clone();
        let child_schema = child.schema().to_vec();
        let funcs = Arc::new(build_agg_funcs(&self.agg_calls));

        let (final_tx, final_rx) = mpsc::channel(final_concurrency);
        let (input_tx, input_rx) = mpsc::channel(partial_concurrency);
        let outbox_txs: Vec<_>;
        let mut outbox_rxs: Vec<_>;
        {
            let (txs, rxs): (Vec<_>, Vec<_>) = (0..final_concurrency)
                .map(|_| mpsc::channel::<HashAggIntermData>(partial_concurrency))
                .unzip();
            outbox_txs = txs;
            outbox_rxs = rxs;
        }

        for id in 0..partial_concurrency {
            let (inbox_tx, inbox_rx) = mpsc::channel(1);
            self.partial_workers.push(HashAggPartialWorker {
                id,
                finish: self.finish.clone(),
                funcs: funcs.clone(),
                agg_calls: self.agg_calls.clone(),
                group_by: self.group_by.clone(),
                inbox: inbox_rx,
                outboxes: outbox_txs.clone(),
                output: final_tx.clone(),
                input_ch: input_tx.clone(),
                chunk: DataChunk::with_capacity(
                    &child_schema,
                    config.init_chunk_size,
                    config.max_chunk_size,
                ),
                map: AggPartialResultMap::new(),
                key_buf: Vec::new(),
                mem: mem.clone(),
            });
            // Seed one ticket per worker; its return address is the only
            // sender of the worker's inbox.
            let ticket = HashAggInput {
                chunk: DataChunk::with_capacity(
                    &child_schema,
                    config.init_chunk_size,
                    config.max_chunk_size,
                ),
                give_back: inbox_tx,
            };
            input_tx
                .try_send(ticket)
                .unwrap_or_else(|_| panic!("input channel holds one ticket per worker"));
        }

        for id in 0..final_concurrency {
            let (holder_tx, holder_rx) = mpsc::channel(1);
            holder_tx
                .try_send(DataChunk::new(&self.schema, config.max_chunk_size))
                .unwrap_or_else(|_| panic!("result holder channel holds one chunk"));
            self.final_workers.push(HashAggFinalWorker {
                id,
                finish: self.finish.clone(),
                funcs: funcs.clone(),
                inbox: outbox_rxs.remove(0),
                output: final_tx.clone(),
                holder_rx,
                holder_tx,
                map: AggPartialResultMap::new(),
                group_keys: Vec::new(),
                max_chunk_size: config.max_chunk_size,
                mem: mem.clone(),
            });
        }

        self.fetcher = Some(HashAggFetcher {
            child,
            input_rx,
            output: final_tx,
            finish: self.finish.clone(),
            mem,
        });
        self.final_output_rx = Some(final_rx);
        // The workers and the fetcher hold all remaining senders, so every
        // channel closes on its own once they exit.
    }

    /// Spawn the fetcher and both worker tiers.
    fn prepare_for_parallel(&mut self) {
        let fetcher = self.fetcher.take().expect("executor is not open");
        let output = fetcher.output.clone();
        self.handles
            .push(spawn_supervised("hash aggregation fetcher", fetcher.run(), output));
        for worker in self.partial_workers.drain(..) {
            let output = worker.output.clone();
            self.handles.push(spawn_supervised(
                "hash aggregation partial worker",
                worker.run(),
                output,
            ));
        }
        for worker in self.final_workers.drain(..) {
            let output = worker.output.clone();
            self.handles.push(spawn_supervised(
                "hash aggregation final worker",
                worker.run(),
                output,
            ));
        }
        self.prepared = true;
    }

    async fn parallel_next(&mut self, chunk: &mut DataChunk) -> Result<(), ExecutorError> {
        if !self.prepared {
            self.prepare_for_parallel();
        }
        if self.executed {
            return Ok(());
        }
        let final_output_rx = self.final_output_rx.as_mut().expect("executor is not open");
        loop {
            match final_output_rx.recv().await {
                None => {
                    self.executed = true;
                    if self.is_child_empty {
                        if let Some(default_val) = &self.default_val {
                            chunk.append_rows(default_val, 0, 1);
                        }
                    }
                    return Ok(());
                }
                Some(AggFinalResult::Error(e)) => {
                    self.executed = true;
                    return Err(e);
                }
                Some(AggFinalResult::Chunk {
                    chunk: mut inner,
                    give_back,
                }) => {
                    chunk.swap_columns(&mut inner);
                    inner.reset();
                    let _ = give_back.send(inner).await;
                    if chunk.num_rows() > 0 {
                        self.is_child_empty = false;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Ingest the whole child input into the single group map.
    async fn unparallel_execute(&mut self) -> Result<(), ExecutorError> {
        loop {
            if self.finish.is_cancelled() {
                return Ok(());
            }
            let chunk = self.child_chunk.as_mut().expect("executor is not open");
            let pre = chunk.memory_usage() as i64;
            self.child
                .as_mut()
                .expect("executor is not open")
                .next(chunk)
                .await?;
            let post = chunk.memory_usage() as i64;
            self.mem.as_ref().expect("executor is not open").consume(post - pre);
            if chunk.num_rows() == 0 {
                return Ok(());
            }

            encode_group_keys(&self.group_by, chunk, &mut self.key_buf)?;
            let args: Vec<Vec<ArrayImpl>> = self
                .agg_calls
                .iter()
                .map(|call| call.arg.iter().map(|e| e.eval(chunk)).try_collect())
                .try_collect()?;
            let num_rows = chunk.num_rows();

            for row in 0..num_rows {
                let key = &self.key_buf[row];
                if !self.group_map.contains_key(key) {
                    let results =
                        alloc_group(&self.funcs, key, self.mem.as_ref().expect("executor is not open"));
                    self.group_map.insert(key.clone(), results);
                    self.group_keys_list.push(key.clone());
                }
                // just inserted above, so the key must exist
                let results = self.group_map.get_mut(key).unwrap();
                for ((func, pr), args) in
                    self.funcs.iter().zip_eq(results.iter_mut()).zip_eq(&args)
                {
                    let mem_delta = func.update_partial_result(pr, args, row, row + 1)?;
                    self.mem.as_ref().expect("executor is not open").consume(mem_delta);
                }
            }
            let mem = self.mem();
            if mem.exceeded() {
                return Err(quota_error(mem));
            }
        }
    }

    async fn unparallel_next(&mut self, chunk: &mut DataChunk) -> Result<(), ExecutorError> {
        if !self.prepared {
            if let Err(e) = self.unparallel_execute().await {
                self.executed = true;
                return Err(e);
            }
            if self.finish.is_cancelled() {
                // Cancellation produces an orderly end-of-stream, not a
                // partially aggregated result.
                self.executed = true;
                self.prepared = true;
                self.cursor = self.group_keys_list.len();
                return Ok(());
            }
            if self.group_map.is_empty() && self.group_by.is_empty() {
                // A scalar aggregate returns one row even over no input:
                // register a synthetic empty group.
                let results = alloc_group(&self.funcs, &[], self.mem());
                self.group_map.insert(Vec::new(), results);
                self.group_keys_list.push(Vec::new());
            }
            self.prepared = true;
        }

        // Emit in first-seen order so repeated calls walk a stable cursor.
        while self.cursor < self.group_keys_list.len() {
            let results = &self.group_map[&self.group_keys_list[self.cursor]];
            if self.funcs.is_empty() {
                chunk.set_num_virtual_rows(chunk.num_rows() + 1);
            }
            for (func, pr) in self.funcs.iter().zip_eq(results.iter()) {
                func.append_final_result(pr.as_ref(), chunk)?;
            }
            self.cursor += 1;
            if chunk.is_full() {
                return Ok(());
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Executor for HashAggExecutor {
    fn schema(&self) -> &[DataType] {
        &self.schema
    }

    async fn open(&mut self, ctx: &ExecutorContext) -> Result<(), ExecutorError> {
        let mut child = self.child.take().expect("executor opened twice");
        child.open(ctx).await?;
        self.mem = Some(ctx.mem().child());
        self.finish = ctx.token().child_token();
        self.is_child_empty = true;
        if self.is_unparallel {
            let config = ctx.config();
            self.funcs = build_agg_funcs(&self.agg_calls);
            self.child_chunk = Some(DataChunk::with_capacity(
                child.schema(),
                config.init_chunk_size,
                config.max_chunk_size,
            ));
            self.child = Some(child);
        } else {
            self.init_for_parallel(ctx, child);
        }
        Ok(())
    }

    async fn next(&mut self, chunk: &mut DataChunk) -> Result<(), ExecutorError> {
        chunk.reset();
        if self.is_unparallel {
            self.unparallel_next(chunk).await
        } else {
            self.parallel_next(chunk).await
        }
    }

    async fn close(&mut self) -> Result<(), ExecutorError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.executed = true;
        self.finish.cancel();

        let mut result = Ok(());
        if self.is_unparallel {
            if let Some(chunk) = self.child_chunk.take() {
                if let Some(mem) = &self.mem {
                    mem.consume(-(chunk.memory_usage() as i64));
                }
            }
            self.group_map = AggPartialResultMap::new();
            self.group_keys_list.clear();
            if let Some(child) = &mut self.child {
                result = child.close().await;
            }
        } else if !self.prepared {
            // `close` may be called after `open` without any `next`:
            // nothing was spawned, so just drop the channel state.
            self.partial_workers.clear();
            self.final_workers.clear();
            self.final_output_rx = None;
            if let Some(mut fetcher) = self.fetcher.take() {
                result = fetcher.child.close().await;
            }
        } else {
            if let Some(mut final_output_rx) = self.final_output_rx.take() {
                final_output_rx.close();
                while final_output_rx.recv().await.is_some() {}
            }
            for handle in self.handles.drain(..) {
                let _ = handle.await;
            }
        }
        if let Some(mem) = &self.mem {
            mem.detach();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::test_utils::{collect_rows, MockExecutor};
    use super::*;
    use crate::executor::SessionConfig;
    use crate::expr::AggKind;
    use crate::types::{DataTypeExt, DataTypeKind, DataValue};

    fn kv_schema() -> Vec<DataType> {
        vec![
            DataTypeKind::Int64.nullable(),
            DataTypeKind::Int64.nullable(),
        ]
    }

    fn kv_rows(data: &[(i64, i64)]) -> Vec<Vec<DataValue>> {
        data.iter()
            .map(|(k, v)| vec![DataValue::Int64(*k), DataValue::Int64(*v)])
            .collect()
    }

    /// `SELECT k, SUM(v) ... GROUP BY k`, with the group column carried by
    /// a FIRST call as the planner does.
    fn first_k_sum_v() -> (Vec<AggCall>, Vec<Expression>) {
        let k = Expression::column_ref(0, DataTypeKind::Int64.nullable());
        let v = Expression::column_ref(1, DataTypeKind::Int64.nullable());
        (
            vec![
                AggCall::new(AggKind::First, k.clone()),
                AggCall::new(AggKind::Sum, v),
            ],
            vec![k],
        )
    }

    async fn run_sorted(
        mut exec: HashAggExecutor,
        ctx: &ExecutorContext,
    ) -> Vec<Vec<DataValue>> {
        exec.open(ctx).await.unwrap();
        let mut rows = collect_rows(&mut exec, ctx).await.unwrap();
        exec.close().await.unwrap();
        rows.sort();
        rows
    }

    #[tokio::test]
    async fn parallel_sum_by_key() {
        let data = [(1, 10), (2, 20), (1, 30), (2, 40), (1, 50)];
        let child = MockExecutor::new(kv_schema())
            .chunk(kv_rows(&data[..2]))
            .chunk(kv_rows(&data[2..]));
        let (calls, group_by) = first_k_sum_v();
        let ctx = ExecutorContext::default();
        let exec = HashAggExecutor::new(calls, group_by, Box::new(child), None);
        let rows = run_sorted(exec, &ctx).await;
        assert_eq!(
            rows,
            vec![
                vec![DataValue::Int64(1), DataValue::Int64(90)],
                vec![DataValue::Int64(2), DataValue::Int64(60)],
            ]
        );
    }

    #[tokio::test]
    async fn unparallel_matches_parallel() {
        let data = [(3, 1), (1, 2), (2, 3), (1, 4), (3, 5), (2, 6), (2, 7)];
        let ctx = ExecutorContext::default();

        let (calls, group_by) = first_k_sum_v();
        let child = MockExecutor::new(kv_schema()).chunk(kv_rows(&data));
        let parallel =
            HashAggExecutor::new(calls.clone(), group_by.clone(), Box::new(child), None);
        let parallel_rows = run_sorted(parallel, &ctx).await;

        let child = MockExecutor::new(kv_schema()).chunk(kv_rows(&data));
        let unparallel =
            HashAggExecutor::new(calls, group_by, Box::new(child), None).unparallel();
        assert!(unparallel.is_unparallel);
        let unparallel_rows = run_sorted(unparallel, &ctx).await;

        assert_eq!(parallel_rows, unparallel_rows);
    }

    #[tokio::test]
    async fn unparallel_emits_in_first_seen_order() {
        let data = [(7, 1), (3, 1), (9, 1), (3, 1), (7, 1)];
        let child = MockExecutor::new(kv_schema()).chunk(kv_rows(&data));
        let (calls, group_by) = first_k_sum_v();
        let ctx = ExecutorContext::default();
        let mut exec =
            HashAggExecutor::new(calls, group_by, Box::new(child), None).unparallel();
        exec.open(&ctx).await.unwrap();
        let rows = collect_rows(&mut exec, &ctx).await.unwrap();
        exec.close().await.unwrap();
        let keys: Vec<_> = rows.iter().map(|row| row[0].clone()).collect();
        assert_eq!(
            keys,
            vec![
                DataValue::Int64(7),
                DataValue::Int64(3),
                DataValue::Int64(9)
            ]
        );
    }

    #[tokio::test]
    async fn count_star_on_empty_input_uses_default_chunk() {
        let schema = vec![DataTypeKind::Int64.nullable()];
        let child = MockExecutor::new(schema.clone());
        let mut default_val = DataChunk::new(&[DataTypeKind::Int64.not_null()], 1);
        default_val.append_row([DataValue::Int64(0)]);
        let ctx = ExecutorContext::default();
        let exec = HashAggExecutor::new(
            vec![AggCall::count_star()],
            vec![],
            Box::new(child),
            Some(default_val),
        );
        let rows = run_sorted(exec, &ctx).await;
        assert_eq!(rows, vec![vec![DataValue::Int64(0)]]);

        // Without a default chunk the output is empty.
        let child = MockExecutor::new(schema);
        let exec = HashAggExecutor::new(vec![AggCall::count_star()], vec![], Box::new(child), None);
        let rows = run_sorted(exec, &ctx).await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn scalar_aggregate_with_rows_needs_no_default() {
        let child = MockExecutor::new(kv_schema()).chunk(kv_rows(&[(1, 10), (2, 20)]));
        let v = Expression::column_ref(1, DataTypeKind::Int64.nullable());
        let ctx = ExecutorContext::default();
        let exec = HashAggExecutor::new(
            vec![AggCall::new(AggKind::Sum, v)],
            vec![],
            Box::new(child),
            None,
        );
        let rows = run_sorted(exec, &ctx).await;
        assert_eq!(rows, vec![vec![DataValue::Int64(30)]]);
    }

    #[tokio::test]
    async fn var_samp_parallel() {
        let schema = vec![DataTypeKind::Float64.nullable()];
        let rows: Vec<Vec<DataValue>> = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]
            .iter()
            .map(|v| vec![DataValue::Float64((*v).into())])
            .collect();
        let child = MockExecutor::new(schema.clone())
            .chunk(rows[..3].to_vec())
            .chunk(rows[3..].to_vec());
        let x = Expression::column_ref(0, DataTypeKind::Float64.nullable());
        let ctx = ExecutorContext::default();
        let exec = HashAggExecutor::new(
            vec![AggCall::new(AggKind::VarSamp, x)],
            vec![],
            Box::new(child),
            None,
        );
        let rows = run_sorted(exec, &ctx).await;
        assert_eq!(rows.len(), 1);
        match &rows[0][0] {
            DataValue::Float64(v) => assert!((v.0 - 32.0 / 7.0).abs() < 1e-9),
            other => panic!("unexpected result {other}"),
        }
    }

    #[tokio::test]
    async fn count_distinct_routes_through_unparallel_path() {
        let data = [(1, 1), (1, 1), (1, 2), (2, 3)];
        let child = MockExecutor::new(kv_schema()).chunk(kv_rows(&data));
        let k = Expression::column_ref(0, DataTypeKind::Int64.nullable());
        let v = Expression::column_ref(1, DataTypeKind::Int64.nullable());
        let calls = vec![
            AggCall::new(AggKind::First, k.clone()),
            AggCall::new(AggKind::Count, v).with_distinct(),
        ];
        let ctx = ExecutorContext::default();
        let exec = HashAggExecutor::new(calls, vec![k], Box::new(child), None);
        assert!(exec.is_unparallel);
        let rows = run_sorted(exec, &ctx).await;
        assert_eq!(
            rows,
            vec![
                vec![DataValue::Int64(1), DataValue::Int64(2)],
                vec![DataValue::Int64(2), DataValue::Int64(1)],
            ]
        );
    }

    #[tokio::test]
    async fn zero_aggregates_deduplicate_groups() {
        let data = [(1, 0), (2, 0), (1, 0), (3, 0), (2, 0)];
        let child = MockExecutor::new(kv_schema()).chunk(kv_rows(&data));
        let k = Expression::column_ref(0, DataTypeKind::Int64.nullable());
        let ctx = ExecutorContext::default();
        let mut exec = HashAggExecutor::new(vec![], vec![k], Box::new(child), None);
        exec.open(&ctx).await.unwrap();
        let rows = collect_rows(&mut exec, &ctx).await.unwrap();
        exec.close().await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn memory_returns_to_zero_after_close() {
        let data: Vec<(i64, i64)> = (0..500).map(|i| (i % 17, i)).collect();
        let child = MockExecutor::new(kv_schema())
            .chunk(kv_rows(&data[..250]))
            .chunk(kv_rows(&data[250..]));
        let (calls, group_by) = first_k_sum_v();
        let ctx = ExecutorContext::default();
        let mut exec = HashAggExecutor::new(calls, group_by, Box::new(child), None);
        exec.open(&ctx).await.unwrap();
        let rows = collect_rows(&mut exec, &ctx).await.unwrap();
        assert_eq!(rows.len(), 17);
        exec.close().await.unwrap();
        assert_eq!(ctx.mem().consumed(), 0);
    }

    #[tokio::test]
    async fn memory_quota_exceeded_is_reported() {
        let data: Vec<(i64, i64)> = (0..2000).map(|i| (i, i)).collect();
        let child = MockExecutor::new(kv_schema())
            .chunk(kv_rows(&data[..1000]))
            .chunk(kv_rows(&data[1000..]));
        let (calls, group_by) = first_k_sum_v();
        let ctx = ExecutorContext::new(SessionConfig {
            mem_quota_query: 512,
            ..SessionConfig::default()
        });
        let mut exec = HashAggExecutor::new(calls, group_by, Box::new(child), None);
        exec.open(&ctx).await.unwrap();
        let result = collect_rows(&mut exec, &ctx).await;
        assert!(matches!(result, Err(ExecutorError::MemoryExceeded(512))));
        exec.close().await.unwrap();
    }

    #[tokio::test]
    async fn child_error_is_forwarded() {
        let child = MockExecutor::new(kv_schema())
            .chunk(kv_rows(&[(1, 1)]))
            .fail_at_end();
        let (calls, group_by) = first_k_sum_v();
        let ctx = ExecutorContext::default();
        let mut exec = HashAggExecutor::new(calls, group_by, Box::new(child), None);
        exec.open(&ctx).await.unwrap();
        let result = collect_rows(&mut exec, &ctx).await;
        assert!(matches!(result, Err(ExecutorError::Internal(_))));
        exec.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_before_next_is_safe() {
        let child = MockExecutor::new(kv_schema()).chunk(kv_rows(&[(1, 1)]));
        let closed = child.closed_flag();
        let (calls, group_by) = first_k_sum_v();
        let ctx = ExecutorContext::default();
        let mut exec = HashAggExecutor::new(calls, group_by, Box::new(child), None);
        exec.open(&ctx).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), exec.close())
            .await
            .expect("close must not hang")
            .unwrap();
        assert!(closed.load(std::sync::atomic::Ordering::Relaxed));
        // Close is idempotent.
        exec.close().await.unwrap();
        assert_eq!(ctx.mem().consumed(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancellation_stops_an_infinite_input() {
        let child = MockExecutor::new(kv_schema()).infinite(vec![
            DataValue::Int64(1),
            DataValue::Int64(1),
        ]);
        let (calls, group_by) = first_k_sum_v();
        let ctx = ExecutorContext::default();
        let mut exec = HashAggExecutor::new(calls, group_by, Box::new(child), None);
        exec.open(&ctx).await.unwrap();

        let mut out = DataChunk::new(exec.schema(), ctx.config().max_chunk_size);
        // Start the pipeline, then cancel while it is busy.
        let first = tokio::time::timeout(Duration::from_secs(1), exec.next(&mut out)).await;
        // An infinite single-group input produces no output until cancelled,
        // so the first call is expected to still be pending.
        ctx.cancel();
        if first.is_err() {
            // The timed-out future was dropped; pull to completion now.
            tokio::time::timeout(Duration::from_secs(5), exec.next(&mut out))
                .await
                .expect("cancellation must unblock the caller")
                .unwrap();
        }
        loop {
            if out.num_rows() == 0 {
                break;
            }
            tokio::time::timeout(Duration::from_secs(5), exec.next(&mut out))
                .await
                .expect("cancellation must drain to end-of-stream")
                .unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), exec.close())
            .await
            .expect("close after cancel must not hang")
            .unwrap();
    }
}
