//! The scheduling-policy capability consumed by the reconciler.
//!
//! Which request goes to which worker (fair-share accounting, preemption
//! heuristics) is decided behind this trait. The reconciler only applies
//! the decisions it returns and folds lifecycle events back into it.

use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::util::clock::TimestampMs;
use crate::util::serde::{AccountId, LabelSet, RequestId, WorkerId};

/// A request admitted into the scheduling queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Account the request is charged against.
    pub account_id: AccountId,
    /// When the request was enqueued; FIFO key.
    pub enqueue_time_ms: TimestampMs,
    /// Provisionable labels the request prefers.
    pub labels: LabelSet,
}

/// Kind of decision produced by a scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Start a request on an idle worker.
    IdleWorker,
    /// Abort the running request on a worker and start another in its place.
    PreemptWorker,
}

/// One decision from [`Scheduler::run_once`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerDecision {
    /// Decision kind.
    pub kind: DecisionKind,
    /// Worker the decision targets.
    pub worker_id: WorkerId,
    /// Request to start on the worker.
    pub request_id: RequestId,
    /// Running request to abort; only meaningful for preemption.
    pub task_to_abort: Option<RequestId>,
    /// Scheduler time at which the decision was made.
    pub time_ms: TimestampMs,
}

/// Stateful scheduling policy for one pool.
///
/// Implementations are mutated only from inside a batch transaction, so
/// methods take `&mut self` and need no internal locking.
pub trait Scheduler: Send {
    /// Advance the scheduler's logical clock.
    ///
    /// # Errors
    ///
    /// `SchedulerError::UpdateOrder` when `t` is older than the current clock.
    fn update_time(&mut self, t: TimestampMs) -> Result<(), SchedulerError>;

    /// Declare a worker idle with the given labels, as of `t`.
    fn mark_idle(&mut self, worker_id: &WorkerId, labels: &LabelSet, t: TimestampMs);

    /// Run one scheduling pass over all idle workers and waiting requests.
    fn run_once(&mut self) -> Vec<SchedulerDecision>;

    /// Admit a new request into the queue, as of `t`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidRequest` for an empty request id.
    fn add_request(
        &mut self,
        request_id: &RequestId,
        request: TaskRequest,
        t: TimestampMs,
    ) -> Result<(), SchedulerError>;

    /// Record, authoritatively as of `t`, that a request runs on a worker.
    fn notify_request_running(&mut self, request_id: &RequestId, worker_id: &WorkerId, t: TimestampMs);

    /// Record, authoritatively as of `t`, that a request is neither queued nor running.
    fn abort_request(&mut self, request_id: &RequestId, t: TimestampMs);
}
