//! Batched operations, their execution context and result handles.

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::{EventBuffer, SchedulerError};
use crate::util::clock::TimestampMs;

/// A unit of work applied to scheduler state inside a batch transaction.
///
/// The closure captures its caller-specific parameters. Its returned error
/// is reported to that caller only.
pub type Operation<T> = Box<
    dyn FnOnce(&BatchContext, &mut T, &mut EventBuffer) -> Result<(), SchedulerError> + Send,
>;

/// Box a closure as an [`Operation`].
pub fn operation<T, F>(f: F) -> Operation<T>
where
    F: FnOnce(&BatchContext, &mut T, &mut EventBuffer) -> Result<(), SchedulerError>
        + Send
        + 'static,
{
    Box::new(f)
}

/// Context a batch executes under.
///
/// Derived from the batch master: its cancellation token decides the
/// batch's execution context, not whether admitted operations run.
#[derive(Debug, Clone)]
pub struct BatchContext {
    /// Monotonic batch number within the collector.
    pub batch_id: u64,
    /// Pool the batch belongs to.
    pub pool: String,
    /// Cancellation token of the batch master.
    pub master_token: CancellationToken,
    /// When the batch's construction window opened.
    pub opened_at_ms: TimestampMs,
}

/// Receiving side of an operation's single-use result channel.
///
/// Yields exactly one outcome. A sender dropped without reporting, as when
/// the batch loop dies mid-batch, reads as `SchedulerError::Abandoned`.
#[derive(Debug)]
#[must_use = "an operation's outcome is only observable through its handle"]
pub struct OperationHandle {
    rx: oneshot::Receiver<Result<(), SchedulerError>>,
}

impl OperationHandle {
    pub(crate) fn channel() -> (ResultSender, Self) {
        let (tx, rx) = oneshot::channel();
        (ResultSender { tx }, Self { rx })
    }

    /// A handle that has already failed with `err`.
    pub(crate) fn failed(err: SchedulerError) -> Self {
        let (tx, handle) = Self::channel();
        tx.finish(Err(err));
        handle
    }

    /// Wait for the operation's outcome.
    ///
    /// # Errors
    ///
    /// The error the operation (or its batch) failed with.
    pub async fn wait(self) -> Result<(), SchedulerError> {
        self.rx.await.unwrap_or(Err(SchedulerError::Abandoned))
    }

    /// Non-blocking check of the outcome; `None` while still pending.
    pub fn try_result(&mut self) -> Option<Result<(), SchedulerError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(SchedulerError::Abandoned)),
            Err(oneshot::error::TryRecvError::Empty) => None,
        }
    }
}

/// Writing side of an operation's result channel. Never blocks.
#[derive(Debug)]
pub(crate) struct ResultSender {
    tx: oneshot::Sender<Result<(), SchedulerError>>,
}

impl ResultSender {
    /// Report the outcome exactly once.
    pub(crate) fn finish(self, result: Result<(), SchedulerError>) {
        // Receiver may already be gone; the outcome is then unobserved.
        let _ = self.tx.send(result);
    }
}
