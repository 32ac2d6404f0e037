//! Batch coordination, worker-queue reconciliation and the scheduling capability.

pub mod batcher;
pub mod error;
pub mod events;
pub mod operation;
pub mod reconciler;
pub mod scheduler;
pub mod store;
pub mod types;

pub use batcher::{
    BatchCollector, BatchWindow, BatcherStats, CollectorOptions, ManualWindow, TimerWindow,
};
pub use error::{AppResult, SchedulerError};
pub use events::{
    EventBuffer, EventSink, InMemoryEventSink, NullEventSink, SharedEventSink, TaskEvent,
    TaskEventKind,
};
pub use operation::{operation, BatchContext, Operation, OperationHandle};
pub use reconciler::{Reconciler, WorkerQueue};
pub use scheduler::{DecisionKind, Scheduler, SchedulerDecision, TaskRequest};
pub use store::{StateStore, TransactionBody};
pub use types::{Assignment, Cancellation, IdleWorker, TaskUpdate, TaskUpdateKind};
