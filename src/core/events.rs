//! Scheduling event records and sinks.
//!
//! Operations append [`TaskEvent`]s to the batch's [`EventBuffer`]. Once all
//! operations in a batch have run, the buffer is flushed to the durable sink
//! inside the transaction and to the telemetry sink after commit.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::util::clock::{now_ms, TimestampMs};
use crate::util::serde::{RequestId, WorkerId};

/// What happened to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// Request entered the scheduling queue.
    Enqueued,
    /// Request was offered to an idle worker.
    Assigned,
    /// Request was offered to a worker in place of a running request.
    Preempted,
    /// Worker confirmed the request is running.
    Acknowledged,
    /// Request was cancelled.
    Interrupted,
}

/// A scheduling event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Event identifier.
    pub event_id: String,
    /// Pool the event belongs to.
    pub pool: String,
    /// Related request.
    pub request_id: RequestId,
    /// Related worker, if any.
    pub worker_id: Option<WorkerId>,
    /// Event kind.
    pub kind: TaskEventKind,
    /// Time the event describes.
    pub time_ms: TimestampMs,
    /// Time the record was created.
    pub created_at_ms: TimestampMs,
}

/// Events collected while a single batch executes.
#[derive(Debug, Default)]
pub struct EventBuffer {
    pool: String,
    events: Vec<TaskEvent>,
}

impl EventBuffer {
    /// Create an empty buffer for the given pool.
    pub fn new(pool: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            events: Vec::new(),
        }
    }

    /// Append an event.
    pub fn add(
        &mut self,
        kind: TaskEventKind,
        request_id: &RequestId,
        worker_id: Option<&WorkerId>,
        time_ms: TimestampMs,
    ) {
        self.events.push(TaskEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            pool: self.pool.clone(),
            request_id: request_id.clone(),
            worker_id: worker_id.cloned(),
            kind,
            time_ms,
            created_at_ms: now_ms(),
        });
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> &[TaskEvent] {
        &self.events
    }

    /// Number of events recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when no event was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Destination for flushed batches of events.
pub trait EventSink: Send {
    /// Record one batch's events.
    ///
    /// # Errors
    ///
    /// Implementation-specific; a durable sink's error fails the batch.
    fn record_batch(&mut self, events: &[TaskEvent]) -> Result<(), SchedulerError>;
}

/// An event sink shared between the batch loop and its owner.
pub type SharedEventSink = Arc<Mutex<dyn EventSink>>;

/// In-memory event sink for testing and dev.
pub struct InMemoryEventSink {
    events: VecDeque<TaskEvent>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.iter().cloned().collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn record_batch(&mut self, events: &[TaskEvent]) -> Result<(), SchedulerError> {
        for event in events {
            if self.events.len() >= self.max_events {
                self.events.pop_front();
            }
            self.events.push_back(event.clone());
        }
        Ok(())
    }
}

/// Sink that drops everything; the default durable sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn record_batch(&mut self, _events: &[TaskEvent]) -> Result<(), SchedulerError> {
        Ok(())
    }
}
