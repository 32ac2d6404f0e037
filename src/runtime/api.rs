//! Caller-facing pool API.
//!
//! A [`SchedulerPool`] pairs one batch collector with the pool state it
//! mutates. Every entry point is expressed as a batched operation so that
//! concurrent RPC handlers share transactions.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::PoolConfig;
use crate::core::{
    operation, Assignment, BatchCollector, BatcherStats, Cancellation, CollectorOptions,
    IdleWorker, InMemoryEventSink, Operation, OperationHandle, Reconciler, Scheduler,
    SchedulerError, SharedEventSink, StateStore, TaskEvent, TaskUpdate,
};
use crate::util::clock::TimestampMs;
use crate::util::serde::Priority;

/// Everything a pool's batch transaction reads and writes.
#[derive(Debug, Clone, Default)]
pub struct PoolState<S> {
    /// Scheduling policy state.
    pub scheduler: S,
    /// Pending per-worker decisions.
    pub reconciler: Reconciler,
}

impl<S> PoolState<S> {
    /// Pair a scheduler with a reconciler.
    pub const fn new(scheduler: S, reconciler: Reconciler) -> Self {
        Self {
            scheduler,
            reconciler,
        }
    }
}

/// One scheduling pool: a batch collector over a [`PoolState`].
pub struct SchedulerPool<S>
where
    S: Scheduler + 'static,
{
    collector: BatchCollector<PoolState<S>>,
    telemetry: Option<Arc<Mutex<InMemoryEventSink>>>,
}

impl<S> SchedulerPool<S>
where
    S: Scheduler + 'static,
{
    /// Start a pool over `store` with explicit collector options.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<St>(store: Arc<St>, options: CollectorOptions) -> Self
    where
        St: StateStore<PoolState<S>>,
    {
        Self {
            collector: BatchCollector::new(store, options),
            telemetry: None,
        }
    }

    /// Start a pool from configuration, keeping the most recent
    /// `event_buffer_limit` events in an in-memory telemetry sink.
    pub fn from_config<St>(
        name: &str,
        store: Arc<St>,
        config: &PoolConfig,
        durable_sink: SharedEventSink,
    ) -> Self
    where
        St: StateStore<PoolState<S>>,
    {
        let telemetry = Arc::new(Mutex::new(InMemoryEventSink::new(config.event_buffer_limit)));
        let telemetry_sink: SharedEventSink = telemetry.clone();
        let options = CollectorOptions::from_config(name, config)
            .with_durable_sink(durable_sink)
            .with_telemetry_sink(telemetry_sink);
        Self {
            collector: BatchCollector::new(store, options),
            telemetry: Some(telemetry),
        }
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.collector.pool()
    }

    /// Enqueue an arbitrary operation against the pool state.
    pub async fn enqueue_operation(
        &self,
        token: &CancellationToken,
        op: Operation<PoolState<S>>,
        priority: Priority,
    ) -> OperationHandle {
        self.collector.enqueue_operation(token, op, priority).await
    }

    /// Offer work to a batch of polling workers.
    ///
    /// Returns one assignment per worker that has a pending decision.
    /// Repeating the call before the assignment is acknowledged returns the
    /// same assignment.
    ///
    /// # Errors
    ///
    /// Cancellation, a scheduler clock error, or a batch-wide failure.
    pub async fn assign_tasks(
        &self,
        token: &CancellationToken,
        workers: Vec<IdleWorker>,
        now: TimestampMs,
    ) -> Result<Vec<Assignment>, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        let op = operation(move |_ctx, state: &mut PoolState<S>, events| {
            let PoolState {
                scheduler,
                reconciler,
            } = state;
            let assignments = reconciler.assign_tasks(scheduler, now, &workers, events)?;
            let _ = tx.send(assignments);
            Ok(())
        });

        self.collector
            .enqueue_operation(token, op, Priority::Assign)
            .await
            .wait()
            .await?;
        let assignments = rx
            .await
            .map_err(|_| SchedulerError::Abandoned)?;
        debug!(pool = %self.name(), assignments = assignments.len(), "assign_tasks complete");
        Ok(assignments)
    }

    /// Apply task lifecycle updates.
    ///
    /// # Errors
    ///
    /// Cancellation, an invalid update, or a batch-wide failure.
    pub async fn notify(
        &self,
        token: &CancellationToken,
        updates: Vec<TaskUpdate>,
    ) -> Result<(), SchedulerError> {
        let op = operation(move |_ctx, state: &mut PoolState<S>, events| {
            let PoolState {
                scheduler,
                reconciler,
            } = state;
            reconciler.notify(scheduler, &updates, events)
        });
        self.collector
            .enqueue_operation(token, op, Priority::Notify)
            .await
            .wait()
            .await
    }

    /// Running requests that workers should abort.
    ///
    /// # Errors
    ///
    /// Cancellation or a batch-wide failure.
    pub async fn cancellations(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<Cancellation>, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        let op = operation(move |_ctx, state: &mut PoolState<S>, _events| {
            let _ = tx.send(state.reconciler.cancellations());
            Ok(())
        });
        self.collector
            .enqueue_operation(token, op, Priority::Notify)
            .await
            .wait()
            .await?;
        rx.await
            .map_err(|_| SchedulerError::Abandoned)
    }

    /// Events retained by the configured telemetry sink, oldest first.
    #[must_use]
    pub fn telemetry_events(&self) -> Vec<TaskEvent> {
        self.telemetry
            .as_ref()
            .map(|sink| sink.lock().events())
            .unwrap_or_default()
    }

    /// Batch statistics.
    #[must_use]
    pub fn stats(&self) -> BatcherStats {
        self.collector.stats()
    }

    /// Stop accepting operations and wait for queued ones to finish.
    pub async fn close(&self) {
        self.collector.close().await;
    }
}
