//! Request and result values exchanged with workers and callers.

use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::util::clock::TimestampMs;
use crate::util::serde::{AccountId, LabelSet, RequestId, WorkerId};

/// A worker polling for work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleWorker {
    /// Worker identifier.
    pub id: WorkerId,
    /// Provisionable labels the worker currently has.
    pub labels: LabelSet,
}

impl IdleWorker {
    /// Create an idle worker record.
    pub fn new(id: impl Into<WorkerId>, labels: LabelSet) -> Self {
        Self {
            id: id.into(),
            labels,
        }
    }
}

/// A request that a worker should start running.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    /// Worker receiving the request.
    pub worker_id: WorkerId,
    /// Request to start.
    pub request_id: RequestId,
}

/// A running request that a worker should abort.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cancellation {
    /// Worker running the request.
    pub worker_id: WorkerId,
    /// Request to abort.
    pub request_id: RequestId,
}

/// Lifecycle transition described by a [`TaskUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskUpdateKind {
    /// The request was created and is waiting for a worker.
    New,
    /// The request is confirmed running on a worker.
    Assigned,
    /// The request was cancelled.
    Interrupted,
}

/// A task lifecycle event reported by the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdate {
    /// What happened.
    pub kind: TaskUpdateKind,
    /// Request the event is about.
    pub request_id: RequestId,
    /// Worker running the request, required for `Assigned`.
    #[serde(default)]
    pub worker_id: Option<WorkerId>,
    /// Account charged for the request.
    #[serde(default)]
    pub account_id: AccountId,
    /// Provisionable labels the request needs.
    #[serde(default)]
    pub labels: LabelSet,
    /// When the request was first enqueued.
    pub enqueue_time_ms: TimestampMs,
    /// When the event happened.
    pub time_ms: TimestampMs,
}

impl TaskUpdate {
    /// A `New` update for a freshly enqueued request.
    pub fn new_request(
        request_id: impl Into<RequestId>,
        account_id: impl Into<AccountId>,
        labels: LabelSet,
        enqueue_time_ms: TimestampMs,
    ) -> Self {
        Self {
            kind: TaskUpdateKind::New,
            request_id: request_id.into(),
            worker_id: None,
            account_id: account_id.into(),
            labels,
            enqueue_time_ms,
            time_ms: enqueue_time_ms,
        }
    }

    /// An `Assigned` update confirming `request_id` runs on `worker_id`.
    pub fn assigned(
        request_id: impl Into<RequestId>,
        worker_id: impl Into<WorkerId>,
        time_ms: TimestampMs,
    ) -> Self {
        Self {
            kind: TaskUpdateKind::Assigned,
            request_id: request_id.into(),
            worker_id: Some(worker_id.into()),
            account_id: AccountId::default(),
            labels: LabelSet::new(),
            enqueue_time_ms: 0,
            time_ms,
        }
    }

    /// An `Interrupted` update for a cancelled request.
    pub fn interrupted(request_id: impl Into<RequestId>, time_ms: TimestampMs) -> Self {
        Self {
            kind: TaskUpdateKind::Interrupted,
            request_id: request_id.into(),
            worker_id: None,
            account_id: AccountId::default(),
            labels: LabelSet::new(),
            enqueue_time_ms: 0,
            time_ms,
        }
    }

    /// Reject updates that cannot be applied.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidRequest` for an empty request id, or an
    /// `Assigned` update without a worker id.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.request_id.is_empty() {
            return Err(SchedulerError::InvalidRequest("empty request id".into()));
        }
        if self.kind == TaskUpdateKind::Assigned
            && self.worker_id.as_ref().is_none_or(WorkerId::is_empty)
        {
            return Err(SchedulerError::InvalidRequest(format!(
                "assigned update for {} has no worker id",
                self.request_id
            )));
        }
        Ok(())
    }
}
