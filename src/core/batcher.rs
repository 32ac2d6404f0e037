//! Batch collector and executor.
//!
//! Concurrently submitted operations are coalesced into batches. A single
//! background task per pool pulls a *batch master* off the pending queue,
//! keeps the batch open for a construction window while more operations
//! arrive, then runs the whole batch in one transaction against the state
//! store. Within a batch, operations run in ascending [`Priority`] order and
//! in arrival order within a priority class.
//!
//! # Example
//!
//! ```rust,ignore
//! let collector = BatchCollector::new(store, CollectorOptions::new("pool", window));
//! let handle = collector
//!     .enqueue_operation(&token, operation(|_ctx, state, _events| { /* ... */ Ok(()) }), Priority::Notify)
//!     .await;
//! handle.wait().await?;
//! collector.close().await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::core::events::{EventBuffer, NullEventSink, SharedEventSink};
use crate::core::operation::{BatchContext, Operation, OperationHandle, ResultSender};
use crate::core::store::{StateStore, TransactionBody};
use crate::core::SchedulerError;
use crate::util::clock::now_ms;
use crate::util::serde::Priority;

/// Decides when a batch stops accepting operations.
#[async_trait]
pub trait BatchWindow: Send + Sync + 'static {
    /// Resolve when the currently open construction window closes.
    async fn wait(&self);
}

/// Construction window of a fixed duration.
#[derive(Debug, Clone, Copy)]
pub struct TimerWindow {
    duration: Duration,
}

impl TimerWindow {
    /// Window of the given length.
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Default for TimerWindow {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::DEFAULT_BATCH_WINDOW_MS))
    }
}

#[async_trait]
impl BatchWindow for TimerWindow {
    async fn wait(&self) {
        tokio::time::sleep(self.duration).await;
    }
}

/// Construction window closed explicitly, one batch at a time.
///
/// Lets tests single-step batch construction.
#[derive(Debug, Default)]
pub struct ManualWindow {
    release: Notify,
}

impl ManualWindow {
    /// Create a window that stays open until released.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the open window, or the next one to open if none is open.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl BatchWindow for ManualWindow {
    async fn wait(&self) {
        self.release.notified().await;
    }
}

/// Statistics about batches executed by a collector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatcherStats {
    /// Batches executed, successfully or not.
    pub batches_executed: u64,
    /// Operations that ran inside a batch.
    pub operations_executed: u64,
    /// Operations whose result was an error, including batch-wide failures.
    pub operations_failed: u64,
    /// Operations dropped because their caller cancelled before admission.
    pub operations_cancelled: u64,
    /// Batches whose transaction failed as a whole.
    pub batch_failures: u64,
    /// Number of operations in the most recent batch.
    pub last_batch_size: u64,
}

#[derive(Debug, Default)]
struct BatchCounters {
    batches_executed: AtomicU64,
    operations_executed: AtomicU64,
    operations_failed: AtomicU64,
    operations_cancelled: AtomicU64,
    batch_failures: AtomicU64,
    last_batch_size: AtomicU64,
}

impl BatchCounters {
    fn snapshot(&self) -> BatcherStats {
        BatcherStats {
            batches_executed: self.batches_executed.load(Ordering::Relaxed),
            operations_executed: self.operations_executed.load(Ordering::Relaxed),
            operations_failed: self.operations_failed.load(Ordering::Relaxed),
            operations_cancelled: self.operations_cancelled.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            last_batch_size: self.last_batch_size.load(Ordering::Relaxed),
        }
    }
}

/// Settings for a [`BatchCollector`].
pub struct CollectorOptions {
    pool: String,
    window: Arc<dyn BatchWindow>,
    max_pending_operations: usize,
    durable_sink: SharedEventSink,
    telemetry_sink: Option<SharedEventSink>,
}

impl CollectorOptions {
    /// Options with the given pool name and construction window.
    pub fn new(pool: impl Into<String>, window: Arc<dyn BatchWindow>) -> Self {
        Self {
            pool: pool.into(),
            window,
            max_pending_operations: crate::config::DEFAULT_MAX_PENDING_OPERATIONS,
            durable_sink: Arc::new(Mutex::new(NullEventSink)),
            telemetry_sink: None,
        }
    }

    /// Options derived from a pool configuration, using a timer window.
    #[must_use]
    pub fn from_config(pool: impl Into<String>, config: &PoolConfig) -> Self {
        Self::new(pool, Arc::new(TimerWindow::new(config.batch_window())))
            .with_max_pending_operations(config.max_pending_operations)
    }

    /// Capacity of the pending-operation queue.
    #[must_use]
    pub fn with_max_pending_operations(mut self, max: usize) -> Self {
        self.max_pending_operations = max.max(1);
        self
    }

    /// Sink flushed inside each batch transaction; its failure fails the batch.
    #[must_use]
    pub fn with_durable_sink(mut self, sink: SharedEventSink) -> Self {
        self.durable_sink = sink;
        self
    }

    /// Best-effort sink flushed after each committed batch.
    #[must_use]
    pub fn with_telemetry_sink(mut self, sink: SharedEventSink) -> Self {
        self.telemetry_sink = Some(sink);
        self
    }
}

/// An operation waiting in, or collected into, a batch.
struct BatchedOp<T> {
    op: Option<Operation<T>>,
    token: CancellationToken,
    priority: Priority,
    result: ResultSender,
    err: Option<SchedulerError>,
}

impl<T> BatchedOp<T> {
    fn apply(&mut self, ctx: &BatchContext, state: &mut T, events: &mut EventBuffer) {
        if let Some(op) = self.op.take() {
            self.err = op(ctx, state, events).err();
        }
    }
}

/// Operations collected in one construction window, grouped by priority class.
struct Batch<T> {
    master_token: CancellationToken,
    opened_at_ms: u128,
    classes: Vec<Vec<BatchedOp<T>>>,
}

impl<T> Batch<T> {
    fn new(master: BatchedOp<T>) -> Self {
        let mut batch = Self {
            master_token: master.token.clone(),
            opened_at_ms: now_ms(),
            classes: Priority::ALL.iter().map(|_| Vec::new()).collect(),
        };
        batch.push(master);
        batch
    }

    fn push(&mut self, op: BatchedOp<T>) {
        self.classes[op.priority.index()].push(op);
    }

    fn len(&self) -> usize {
        self.classes.iter().map(Vec::len).sum()
    }

    /// Operations in execution order.
    fn ops_mut(&mut self) -> impl Iterator<Item = &mut BatchedOp<T>> {
        self.classes.iter_mut().flatten()
    }

    fn into_ops(self) -> impl Iterator<Item = BatchedOp<T>> {
        self.classes.into_iter().flatten()
    }
}

/// Coalesces concurrently submitted operations into prioritized batches,
/// each executed as a single transaction.
pub struct BatchCollector<T>
where
    T: Send + 'static,
{
    pool: String,
    /// Pending-operation sender. `None` once closed.
    op_tx: Mutex<Option<mpsc::Sender<BatchedOp<T>>>>,
    /// Flips to `true` once the batch loop has exited.
    loop_done: watch::Receiver<bool>,
    closed: AtomicBool,
    counters: Arc<BatchCounters>,
}

impl<T> BatchCollector<T>
where
    T: Send + 'static,
{
    /// Start a collector and its background batch loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<S>(store: Arc<S>, options: CollectorOptions) -> Self
    where
        S: StateStore<T>,
    {
        let (op_tx, op_rx) = mpsc::channel(options.max_pending_operations);
        let counters = Arc::new(BatchCounters::default());
        let batch_loop = BatchLoop {
            pool: options.pool.clone(),
            op_rx,
            store,
            window: options.window,
            durable_sink: options.durable_sink,
            telemetry_sink: options.telemetry_sink,
            counters: Arc::clone(&counters),
            next_batch_id: 0,
        };
        let (done_tx, loop_done) = watch::channel(false);
        let handle = tokio::spawn(batch_loop.run());
        tokio::spawn(supervise(options.pool.clone(), handle, done_tx));

        info!(
            pool = %options.pool,
            max_pending_operations = options.max_pending_operations,
            "batch collector started"
        );

        Self {
            pool: options.pool,
            op_tx: Mutex::new(Some(op_tx)),
            loop_done,
            closed: AtomicBool::new(false),
            counters,
        }
    }

    /// Pool this collector serves.
    #[must_use]
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Enqueue an operation for the next batch.
    ///
    /// Returns once the operation is admitted into the pending queue, or
    /// `token` is cancelled first; the outcome arrives on the handle. A
    /// cancelled caller gets `SchedulerError::Cancelled` and the operation
    /// is dropped. Enqueueing after [`close`](Self::close) is a caller bug
    /// and yields `SchedulerError::Closed`.
    pub async fn enqueue_operation(
        &self,
        token: &CancellationToken,
        op: Operation<T>,
        priority: Priority,
    ) -> OperationHandle {
        if token.is_cancelled() {
            self.record_cancelled();
            return OperationHandle::failed(SchedulerError::Cancelled);
        }

        let Some(op_tx) = self.op_tx.lock().clone() else {
            error!(pool = %self.pool, "operation enqueued after close");
            return OperationHandle::failed(SchedulerError::Closed);
        };

        let (result, handle) = OperationHandle::channel();
        let batched = BatchedOp {
            op: Some(op),
            token: token.clone(),
            priority,
            result,
            err: None,
        };

        tokio::select! {
            biased;
            () = token.cancelled() => {
                self.record_cancelled();
                OperationHandle::failed(SchedulerError::Cancelled)
            }
            permit = op_tx.reserve() => match permit {
                Ok(permit) => {
                    permit.send(batched);
                    handle
                }
                Err(_) => OperationHandle::failed(SchedulerError::Closed),
            },
        }
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> BatcherStats {
        self.counters.snapshot()
    }

    /// Stop accepting operations, let already enqueued ones finish, and wait
    /// for the batch loop to exit.
    ///
    /// Every caller waits, including ones racing an earlier `close`.
    pub async fn close(&self) {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            info!(pool = %self.pool, "closing batch collector");
            self.op_tx.lock().take();
        }

        let mut loop_done = self.loop_done.clone();
        // An error means the supervisor is gone, which only happens after the loop exited.
        let _ = loop_done.wait_for(|exited| *exited).await;

        if first {
            info!(pool = %self.pool, "batch collector closed");
        }
    }

    fn record_cancelled(&self) {
        self.counters
            .operations_cancelled
            .fetch_add(1, Ordering::Relaxed);
        debug!(pool = %self.pool, "operation cancelled before admission");
    }
}

impl<T> Drop for BatchCollector<T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        // Don't join here; the loop drains what is queued and exits on its own.
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.op_tx.lock().take();
            debug!(pool = %self.pool, "batch collector dropped without explicit close");
        }
    }
}

/// Wait for the batch loop and publish its exit.
///
/// A panic inside the loop means scheduler state broke an invariant mid-batch.
/// Callers in that batch cannot be told the truth about their writes, so the
/// process is aborted.
async fn supervise(pool: String, handle: JoinHandle<()>, done: watch::Sender<bool>) {
    match handle.await {
        Ok(()) => {}
        Err(e) if e.is_panic() => {
            error!(pool = %pool, error = %e, "batch loop panicked, aborting");
            std::process::abort();
        }
        Err(e) => error!(pool = %pool, error = %e, "batch loop terminated abnormally"),
    }
    let _ = done.send(true);
}

/// The single background task that builds and executes batches.
struct BatchLoop<T, S> {
    pool: String,
    op_rx: mpsc::Receiver<BatchedOp<T>>,
    store: Arc<S>,
    window: Arc<dyn BatchWindow>,
    durable_sink: SharedEventSink,
    telemetry_sink: Option<SharedEventSink>,
    counters: Arc<BatchCounters>,
    next_batch_id: u64,
}

impl<T, S> BatchLoop<T, S>
where
    T: Send + 'static,
    S: StateStore<T>,
{
    async fn run(mut self) {
        debug!(pool = %self.pool, "batch loop started");
        while let Some(batch) = self.collect().await {
            self.execute(batch).await;
        }
        debug!(pool = %self.pool, "batch loop exited");
    }

    /// Build the next batch. `None` once the pending queue is closed and drained.
    async fn collect(&mut self) -> Option<Batch<T>> {
        let master = loop {
            let op = self.op_rx.recv().await?;
            if op.token.is_cancelled() {
                self.drop_cancelled(op);
                continue;
            }
            break op;
        };

        let mut batch = Batch::new(master);
        let window = Arc::clone(&self.window);
        let mut window_closed = window.wait();

        loop {
            tokio::select! {
                biased;
                () = &mut window_closed => break,
                next = self.op_rx.recv() => match next {
                    Some(op) => self.admit(&mut batch, op),
                    None => return Some(batch),
                },
            }
        }

        // Operations admitted before the window closed still join this batch;
        // later arrivals wait for the next one.
        for _ in 0..self.op_rx.len() {
            match self.op_rx.try_recv() {
                Ok(op) => self.admit(&mut batch, op),
                Err(_) => break,
            }
        }
        Some(batch)
    }

    fn admit(&self, batch: &mut Batch<T>, op: BatchedOp<T>) {
        if op.token.is_cancelled() {
            self.drop_cancelled(op);
        } else {
            batch.push(op);
        }
    }

    fn drop_cancelled(&self, op: BatchedOp<T>) {
        self.counters
            .operations_cancelled
            .fetch_add(1, Ordering::Relaxed);
        debug!(pool = %self.pool, priority = ?op.priority, "dropping cancelled operation");
        op.result.finish(Err(SchedulerError::Cancelled));
    }

    async fn execute(&mut self, mut batch: Batch<T>) {
        let ctx = BatchContext {
            batch_id: self.next_batch_id,
            pool: self.pool.clone(),
            master_token: batch.master_token.clone(),
            opened_at_ms: batch.opened_at_ms,
        };
        self.next_batch_id += 1;

        let size = batch.len();
        let started = Instant::now();
        let mut events = EventBuffer::new(self.pool.clone());

        let outcome = {
            let ctx_ref = &ctx;
            let ops = &mut batch;
            let events_ref = &mut events;
            let durable_sink = Arc::clone(&self.durable_sink);
            let body: TransactionBody<'_, T> = Box::new(move |state: &mut T| {
                for op in ops.ops_mut() {
                    op.apply(ctx_ref, state, events_ref);
                }
                if events_ref.is_empty() {
                    return Ok(());
                }
                durable_sink
                    .lock()
                    .record_batch(events_ref.events())
                    .map_err(|e| SchedulerError::Flush(e.to_string()))
            });
            self.store.run(&ctx, body).await
        };

        let mut failed = 0_u64;
        match outcome {
            Ok(()) => {
                for op in batch.into_ops() {
                    let result = op.err.map_or(Ok(()), Err);
                    if result.is_err() {
                        failed += 1;
                    }
                    op.result.finish(result);
                }
                self.flush_telemetry(&events);
            }
            Err(err) => {
                warn!(
                    pool = %self.pool,
                    batch_id = ctx.batch_id,
                    batch_size = size,
                    error = %err,
                    "batch failed as a whole"
                );
                self.counters.batch_failures.fetch_add(1, Ordering::Relaxed);
                for op in batch.into_ops() {
                    failed += 1;
                    op.result.finish(Err(err.clone()));
                }
            }
        }

        let size = size as u64;
        self.counters.batches_executed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .operations_executed
            .fetch_add(size, Ordering::Relaxed);
        self.counters
            .operations_failed
            .fetch_add(failed, Ordering::Relaxed);
        self.counters.last_batch_size.store(size, Ordering::Relaxed);

        info!(
            pool = %self.pool,
            batch_id = ctx.batch_id,
            batch_size = size,
            failed,
            events = events.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch executed"
        );
    }

    fn flush_telemetry(&self, events: &EventBuffer) {
        let Some(sink) = self.telemetry_sink.as_ref() else {
            return;
        };
        if events.is_empty() {
            return;
        }
        if let Err(e) = sink.lock().record_batch(events.events()) {
            warn!(pool = %self.pool, error = %e, "telemetry flush failed");
        }
    }
}
