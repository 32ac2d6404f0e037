//! In-memory transactional state store.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::{BatchContext, SchedulerError, StateStore, TransactionBody};

/// Holds one value of `T` and runs transactions against a working copy.
///
/// The copy replaces the committed value only when the body succeeds, so a
/// failed batch leaves no trace.
#[derive(Debug)]
pub struct InMemoryStateStore<T> {
    state: Mutex<T>,
    fail_next: Mutex<Option<String>>,
    commits: AtomicU64,
}

impl<T> InMemoryStateStore<T>
where
    T: Clone + Send + 'static,
{
    /// Store seeded with `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            state: Mutex::new(initial),
            fail_next: Mutex::new(None),
            commits: AtomicU64::new(0),
        }
    }

    /// Inspect the committed state.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.state.lock())
    }

    /// Make the next transaction fail at commit with `reason`.
    pub fn fail_next_commit(&self, reason: impl Into<String>) {
        *self.fail_next.lock() = Some(reason.into());
    }

    /// Number of committed transactions.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<T> StateStore<T> for InMemoryStateStore<T>
where
    T: Clone + Send + 'static,
{
    async fn run<'a>(
        &'a self,
        ctx: &'a BatchContext,
        body: TransactionBody<'a, T>,
    ) -> Result<(), SchedulerError> {
        let mut working = self.state.lock().clone();

        if let Err(e) = body(&mut working) {
            debug!(pool = %ctx.pool, batch_id = ctx.batch_id, error = %e, "transaction rolled back");
            return Err(e);
        }

        if let Some(reason) = self.fail_next.lock().take() {
            warn!(pool = %ctx.pool, batch_id = ctx.batch_id, %reason, "commit failed");
            return Err(SchedulerError::Transaction(reason));
        }

        *self.state.lock() = working;
        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
