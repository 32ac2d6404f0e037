//! Label-aware FIFO scheduler.
//!
//! Matches waiting requests to idle workers oldest-first. Workers that
//! already carry every provisionable label a request wants are served in a
//! first pass; remaining idle workers take whatever is oldest in a second
//! pass. There is no quota accounting and no preemption.
//!
//! Every piece of state remembers the last time an external authority
//! confirmed it, and notifications older than that are ignored. This keeps
//! the scheduler convergent under out-of-order delivery.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

use crate::core::{DecisionKind, Scheduler, SchedulerDecision, SchedulerError, TaskRequest};
use crate::util::clock::TimestampMs;
use crate::util::serde::{LabelSet, RequestId, WorkerId};

#[derive(Debug, Clone)]
struct RequestEntry {
    request: TaskRequest,
    confirmed_ms: TimestampMs,
}

impl RequestEntry {
    fn confirm(&mut self, t: TimestampMs) {
        self.confirmed_ms = self.confirmed_ms.max(t);
    }
}

#[derive(Debug, Clone)]
struct WorkerEntry {
    labels: LabelSet,
    running: Option<(RequestId, RequestEntry)>,
    confirmed_ms: TimestampMs,
}

impl WorkerEntry {
    fn latest_confirmed(&self) -> TimestampMs {
        self.running
            .as_ref()
            .map_or(self.confirmed_ms, |(_, r)| r.confirmed_ms.max(self.confirmed_ms))
    }

    fn is_idle(&self) -> bool {
        self.running.is_none()
    }
}

/// In-memory FIFO scheduling policy for one pool.
#[derive(Debug, Clone, Default)]
pub struct FifoScheduler {
    queued: HashMap<RequestId, RequestEntry>,
    workers: BTreeMap<WorkerId, WorkerEntry>,
    running_on: HashMap<RequestId, WorkerId>,
    now_ms: TimestampMs,
}

impl FifoScheduler {
    /// Empty scheduler with its clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current logical time.
    #[must_use]
    pub const fn now_ms(&self) -> TimestampMs {
        self.now_ms
    }

    /// Number of requests waiting for a worker.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// True if the request is waiting for a worker.
    #[must_use]
    pub fn is_queued(&self, request_id: &RequestId) -> bool {
        self.queued.contains_key(request_id)
    }

    /// Worker the request runs on, if it is running.
    #[must_use]
    pub fn running_worker(&self, request_id: &RequestId) -> Option<&WorkerId> {
        self.running_on.get(request_id)
    }

    /// True if the worker is known and idle.
    #[must_use]
    pub fn is_idle(&self, worker_id: &WorkerId) -> bool {
        self.workers.get(worker_id).is_some_and(WorkerEntry::is_idle)
    }

    fn request_confirmed(&self, request_id: &RequestId) -> Option<TimestampMs> {
        if let Some(worker_id) = self.running_on.get(request_id) {
            return self
                .workers
                .get(worker_id)
                .and_then(|w| w.running.as_ref())
                .map(|(_, r)| r.confirmed_ms);
        }
        self.queued.get(request_id).map(|r| r.confirmed_ms)
    }

    /// Remove a worker along with whatever it was running.
    fn remove_worker(&mut self, worker_id: &WorkerId) -> Option<(RequestId, RequestEntry)> {
        let running = self.workers.remove(worker_id)?.running;
        if let Some((request_id, _)) = running.as_ref() {
            self.running_on.remove(request_id);
        }
        running
    }

    /// Drop a worker whose reported request is unknown, unless its own state
    /// was confirmed after `t`.
    fn remove_inconsistent_worker(&mut self, worker_id: &WorkerId, t: TimestampMs, cause: &RequestId) {
        let Some(worker) = self.workers.get(worker_id) else {
            trace!(request_id = %cause, %worker_id, "running notification for unknown request and worker");
            return;
        };
        if t < worker.latest_confirmed() {
            trace!(request_id = %cause, %worker_id, "worker state newer than unknown running request");
            return;
        }
        if let Some((displaced, _)) = self.remove_worker(worker_id) {
            debug!(%worker_id, %displaced, request_id = %cause, "worker running unknown request, dropping it and its request");
        } else {
            debug!(%worker_id, request_id = %cause, "worker running unknown request, dropping it");
        }
    }

    /// Detach a running request from its worker, leaving the worker idle.
    fn detach(&mut self, request_id: &RequestId) -> Option<RequestEntry> {
        let worker_id = self.running_on.remove(request_id)?;
        let worker = self.workers.get_mut(&worker_id)?;
        worker.running.take().map(|(_, r)| r)
    }

    fn queue_order(&self) -> Vec<RequestId> {
        let mut order: Vec<(&RequestId, &RequestEntry)> = self.queued.iter().collect();
        order.sort_by(|(a_id, a), (b_id, b)| {
            a.request
                .enqueue_time_ms
                .cmp(&b.request.enqueue_time_ms)
                .then_with(|| a_id.cmp(b_id))
        });
        order.into_iter().map(|(id, _)| id.clone()).collect()
    }

    fn start(&mut self, worker_id: &WorkerId, request_id: RequestId) -> Option<SchedulerDecision> {
        let entry = self.queued.remove(&request_id)?;
        let worker = self.workers.get_mut(worker_id)?;
        worker.running = Some((request_id.clone(), entry));
        self.running_on.insert(request_id.clone(), worker_id.clone());
        Some(SchedulerDecision {
            kind: DecisionKind::IdleWorker,
            worker_id: worker_id.clone(),
            request_id,
            task_to_abort: None,
            time_ms: self.now_ms,
        })
    }
}

impl Scheduler for FifoScheduler {
    fn update_time(&mut self, t: TimestampMs) -> Result<(), SchedulerError> {
        if t < self.now_ms {
            return Err(SchedulerError::UpdateOrder {
                previous: self.now_ms,
                next: t,
            });
        }
        self.now_ms = t;
        Ok(())
    }

    fn mark_idle(&mut self, worker_id: &WorkerId, labels: &LabelSet, t: TimestampMs) {
        let Some(worker) = self.workers.get_mut(worker_id) else {
            trace!(%worker_id, "new idle worker");
            self.workers.insert(
                worker_id.clone(),
                WorkerEntry {
                    labels: labels.clone(),
                    running: None,
                    confirmed_ms: t,
                },
            );
            return;
        };

        if t < worker.latest_confirmed() {
            debug!(%worker_id, idle_time_ms = %t, "ignoring stale idle notification");
            return;
        }

        worker.labels.clone_from(labels);
        worker.confirmed_ms = t;
        if let Some((request_id, _)) = worker.running.take() {
            debug!(%worker_id, %request_id, "worker idle, running request completed");
            self.running_on.remove(&request_id);
        }
    }

    fn run_once(&mut self) -> Vec<SchedulerDecision> {
        let mut decisions = Vec::new();
        let mut pending = self.queue_order();
        if pending.is_empty() {
            return decisions;
        }

        let idle: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, w)| w.is_idle())
            .map(|(id, _)| id.clone())
            .collect();
        let mut unmatched = Vec::with_capacity(idle.len());

        for worker_id in idle {
            let worker_labels = &self.workers[&worker_id].labels;
            let pick = pending.iter().position(|request_id| {
                self.queued[request_id]
                    .request
                    .labels
                    .is_subset(worker_labels)
            });
            match pick {
                Some(i) => {
                    let request_id = pending.remove(i);
                    decisions.extend(self.start(&worker_id, request_id));
                }
                None => unmatched.push(worker_id),
            }
        }

        for worker_id in unmatched {
            if pending.is_empty() {
                break;
            }
            let request_id = pending.remove(0);
            decisions.extend(self.start(&worker_id, request_id));
        }

        debug!(decisions = decisions.len(), queued = self.queued.len(), "scheduling pass complete");
        decisions
    }

    fn add_request(
        &mut self,
        request_id: &RequestId,
        request: TaskRequest,
        t: TimestampMs,
    ) -> Result<(), SchedulerError> {
        if request_id.is_empty() {
            return Err(SchedulerError::InvalidRequest("empty request id".into()));
        }

        if let Some(entry) = self.queued.get_mut(request_id) {
            entry.confirm(t);
            return Ok(());
        }

        if let Some(worker_id) = self.running_on.get(request_id).cloned() {
            let worker_confirmed = self.workers.get(&worker_id).map_or(0, |w| w.confirmed_ms);
            let request_confirmed = self.request_confirmed(request_id).unwrap_or_default();
            if t < request_confirmed || t < worker_confirmed {
                trace!(%request_id, "ignoring stale request notification");
                return Ok(());
            }
            debug!(%request_id, %worker_id, "request reported waiting while believed running, requeueing");
            self.remove_worker(&worker_id);
        }

        self.queued.insert(
            request_id.clone(),
            RequestEntry {
                request,
                confirmed_ms: t,
            },
        );
        Ok(())
    }

    fn notify_request_running(&mut self, request_id: &RequestId, worker_id: &WorkerId, t: TimestampMs) {
        match self.request_confirmed(request_id) {
            None => {
                self.remove_inconsistent_worker(worker_id, t, request_id);
                return;
            }
            Some(confirmed) if t < confirmed => {
                trace!(%request_id, %worker_id, "ignoring stale running notification");
                return;
            }
            Some(_) => {}
        }
        if let Some(worker) = self.workers.get(worker_id) {
            if t < worker.latest_confirmed()
                && worker.running.as_ref().is_none_or(|(id, _)| id != request_id)
            {
                trace!(%request_id, %worker_id, "worker state newer than running notification");
                return;
            }
        }

        if self.running_on.get(request_id) == Some(worker_id) {
            if let Some(worker) = self.workers.get_mut(worker_id) {
                worker.confirmed_ms = worker.confirmed_ms.max(t);
                if let Some((_, entry)) = worker.running.as_mut() {
                    entry.confirm(t);
                }
            }
            return;
        }

        let Some(mut entry) = self
            .queued
            .remove(request_id)
            .or_else(|| self.detach(request_id))
        else {
            return;
        };
        entry.confirm(t);

        let worker = self
            .workers
            .entry(worker_id.clone())
            .or_insert_with(|| WorkerEntry {
                labels: LabelSet::new(),
                running: None,
                confirmed_ms: t,
            });
        worker.confirmed_ms = worker.confirmed_ms.max(t);
        if let Some((displaced, _)) = worker.running.replace((request_id.clone(), entry)) {
            debug!(%worker_id, %displaced, %request_id, "running notification displaced request");
            self.running_on.remove(&displaced);
        }
        self.running_on.insert(request_id.clone(), worker_id.clone());
    }

    fn abort_request(&mut self, request_id: &RequestId, t: TimestampMs) {
        if let Some(entry) = self.queued.get(request_id) {
            if t >= entry.confirmed_ms {
                debug!(%request_id, "queued request aborted");
                self.queued.remove(request_id);
            }
            return;
        }

        let Some(worker_id) = self.running_on.get(request_id).cloned() else {
            trace!(%request_id, "abort for unknown request");
            return;
        };
        let stale = self
            .workers
            .get(&worker_id)
            .is_none_or(|w| t < w.latest_confirmed());
        if stale {
            trace!(%request_id, %worker_id, "ignoring stale abort");
            return;
        }
        debug!(%request_id, %worker_id, "running request aborted, worker freed");
        self.detach(request_id);
        if let Some(worker) = self.workers.get_mut(&worker_id) {
            worker.confirmed_ms = t;
        }
    }
}
