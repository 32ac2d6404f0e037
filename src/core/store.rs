//! Transactional state store abstraction.

use async_trait::async_trait;

use crate::core::{BatchContext, SchedulerError};

/// Body of a transaction: mutates state and reports whether to commit.
pub type TransactionBody<'a, T> = Box<dyn FnOnce(&mut T) -> Result<(), SchedulerError> + Send + 'a>;

/// Transactional persistence for one pool's scheduler state.
///
/// Only the batch executor calls into the store, one batch at a time.
#[async_trait]
pub trait StateStore<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    /// Execute `body` exactly once inside a transaction.
    ///
    /// # Errors
    ///
    /// The body's own error (nothing is committed), or a store-level
    /// error if the transaction could not be committed.
    async fn run<'a>(
        &'a self,
        ctx: &'a BatchContext,
        body: TransactionBody<'a, T>,
    ) -> Result<(), SchedulerError>;
}
