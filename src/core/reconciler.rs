//! Worker-queue reconciler.
//!
//! Tracks, per worker, the one scheduling decision that has been offered but
//! not yet acknowledged. Repeated polls from a worker return that decision
//! verbatim until an `Assigned` update confirms it, so clients may retry
//! freely. Lifecycle updates are folded into the [`Scheduler`] here as well.
//!
//! The reconciler is plain data mutated through `&mut self`; it lives inside
//! the pool state that only the active batch transaction can touch.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::core::events::{EventBuffer, TaskEventKind};
use crate::core::scheduler::{DecisionKind, Scheduler, SchedulerDecision, TaskRequest};
use crate::core::types::{Assignment, Cancellation, IdleWorker, TaskUpdate, TaskUpdateKind};
use crate::core::SchedulerError;
use crate::util::clock::TimestampMs;
use crate::util::serde::{RequestId, WorkerId};

/// The pending, unacknowledged decision for one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerQueue {
    /// Scheduler time at which the decision was made.
    pub enqueue_time_ms: TimestampMs,
    /// Request the worker should run.
    pub task_to_assign: RequestId,
    /// Running request the worker should abort first; set only by preemption.
    pub task_to_abort: Option<RequestId>,
}

/// Per-worker decision slots for one pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconciler {
    worker_queues: HashMap<WorkerId, WorkerQueue>,
    sort_updates_by_time: bool,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    /// Empty reconciler that applies updates in event-time order.
    #[must_use]
    pub fn new() -> Self {
        Self {
            worker_queues: HashMap::new(),
            sort_updates_by_time: true,
        }
    }

    /// Choose whether [`notify`](Self::notify) sorts updates by event time
    /// before applying them, or applies them in delivery order.
    #[must_use]
    pub const fn with_update_sorting(mut self, sort_by_time: bool) -> Self {
        self.sort_updates_by_time = sort_by_time;
        self
    }

    /// Handle a poll from a batch of idle workers.
    ///
    /// Workers without a pending decision are marked idle, one scheduling
    /// pass runs for the whole batch, and every new decision replaces the
    /// target worker's slot. Each polling worker then gets whatever its slot
    /// holds; workers with an empty slot get nothing.
    ///
    /// # Errors
    ///
    /// Propagates a scheduler clock error (`SchedulerError::UpdateOrder`).
    ///
    /// # Panics
    ///
    /// If the scheduler returns a decision whose abort target does not match
    /// its kind. That is a bug in the scheduling policy, not a runtime
    /// condition.
    pub fn assign_tasks<S>(
        &mut self,
        scheduler: &mut S,
        now: TimestampMs,
        workers: &[IdleWorker],
        events: &mut EventBuffer,
    ) -> Result<Vec<Assignment>, SchedulerError>
    where
        S: Scheduler + ?Sized,
    {
        scheduler.update_time(now)?;

        for worker in workers {
            if !self.worker_queues.contains_key(&worker.id) {
                scheduler.mark_idle(&worker.id, &worker.labels, now);
            }
        }

        for decision in scheduler.run_once() {
            self.install(decision, events);
        }

        Ok(workers
            .iter()
            .filter_map(|worker| {
                self.worker_queues.get(&worker.id).map(|queue| Assignment {
                    worker_id: worker.id.clone(),
                    request_id: queue.task_to_assign.clone(),
                })
            })
            .collect())
    }

    fn install(&mut self, decision: SchedulerDecision, events: &mut EventBuffer) {
        let kind = match (decision.kind, decision.task_to_abort.is_some()) {
            (DecisionKind::IdleWorker, false) => TaskEventKind::Assigned,
            (DecisionKind::PreemptWorker, true) => TaskEventKind::Preempted,
            (kind, has_abort) => panic!(
                "inconsistent scheduler decision for worker {}: kind {kind:?} with abort target present = {has_abort}",
                decision.worker_id
            ),
        };

        debug!(
            worker_id = %decision.worker_id,
            request_id = %decision.request_id,
            task_to_abort = ?decision.task_to_abort,
            "installing decision"
        );
        events.add(
            kind,
            &decision.request_id,
            Some(&decision.worker_id),
            decision.time_ms,
        );
        self.worker_queues.insert(
            decision.worker_id,
            WorkerQueue {
                enqueue_time_ms: decision.time_ms,
                task_to_assign: decision.request_id,
                task_to_abort: decision.task_to_abort,
            },
        );
    }

    /// Fold task lifecycle updates into the scheduler and the worker slots.
    ///
    /// An update never regresses a slot: an acknowledgement older than the
    /// decision sitting in the slot leaves the slot alone.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidRequest` if any update is malformed, in which
    /// case nothing is applied; otherwise errors from the scheduler.
    pub fn notify<S>(
        &mut self,
        scheduler: &mut S,
        updates: &[TaskUpdate],
        events: &mut EventBuffer,
    ) -> Result<(), SchedulerError>
    where
        S: Scheduler + ?Sized,
    {
        for update in updates {
            update.validate()?;
        }

        let mut ordered: Vec<&TaskUpdate> = updates.iter().collect();
        if self.sort_updates_by_time {
            ordered.sort_by_key(|u| u.time_ms);
        }

        for update in ordered {
            match update.kind {
                TaskUpdateKind::New => {
                    scheduler.add_request(
                        &update.request_id,
                        TaskRequest {
                            account_id: update.account_id.clone(),
                            enqueue_time_ms: update.enqueue_time_ms,
                            labels: update.labels.clone(),
                        },
                        update.time_ms,
                    )?;
                    events.add(TaskEventKind::Enqueued, &update.request_id, None, update.time_ms);
                }
                TaskUpdateKind::Assigned => {
                    let Some(worker_id) = update.worker_id.as_ref() else {
                        continue;
                    };
                    scheduler.notify_request_running(&update.request_id, worker_id, update.time_ms);
                    self.acknowledge(worker_id, &update.request_id, update.time_ms);
                    events.add(
                        TaskEventKind::Acknowledged,
                        &update.request_id,
                        Some(worker_id),
                        update.time_ms,
                    );
                }
                TaskUpdateKind::Interrupted => {
                    scheduler.abort_request(&update.request_id, update.time_ms);
                    self.clear_abort_target(&update.request_id, update.time_ms);
                    events.add(
                        TaskEventKind::Interrupted,
                        &update.request_id,
                        update.worker_id.as_ref(),
                        update.time_ms,
                    );
                }
            }
        }
        Ok(())
    }

    fn acknowledge(&mut self, worker_id: &WorkerId, request_id: &RequestId, t: TimestampMs) {
        let Some(queue) = self.worker_queues.get(worker_id) else {
            trace!(%worker_id, %request_id, "acknowledgement for worker without pending decision");
            return;
        };
        if t < queue.enqueue_time_ms {
            debug!(
                %worker_id,
                %request_id,
                update_time_ms = %t,
                enqueue_time_ms = %queue.enqueue_time_ms,
                "ignoring acknowledgement older than pending decision"
            );
            return;
        }
        debug!(%worker_id, %request_id, "clearing acknowledged decision");
        self.worker_queues.remove(worker_id);
    }

    fn clear_abort_target(&mut self, request_id: &RequestId, t: TimestampMs) {
        for (worker_id, queue) in &mut self.worker_queues {
            if queue.task_to_abort.as_ref() == Some(request_id) && t >= queue.enqueue_time_ms {
                debug!(%worker_id, %request_id, "abort target confirmed stopped");
                queue.task_to_abort = None;
            }
        }
    }

    /// Worker/request pairs whose worker should abort the request, ordered by worker.
    #[must_use]
    pub fn cancellations(&self) -> Vec<Cancellation> {
        let mut out: Vec<Cancellation> = self
            .worker_queues
            .iter()
            .filter_map(|(worker_id, queue)| {
                queue.task_to_abort.as_ref().map(|request_id| Cancellation {
                    worker_id: worker_id.clone(),
                    request_id: request_id.clone(),
                })
            })
            .collect();
        out.sort();
        out
    }

    /// The pending decision for a worker, if any.
    #[must_use]
    pub fn worker_queue(&self, worker_id: &WorkerId) -> Option<&WorkerQueue> {
        self.worker_queues.get(worker_id)
    }

    /// Number of workers with a pending decision.
    #[must_use]
    pub fn len(&self) -> usize {
        self.worker_queues.len()
    }

    /// True when no worker has a pending decision.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.worker_queues.is_empty()
    }
}
