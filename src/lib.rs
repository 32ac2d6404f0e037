//! # qscheduler core
//!
//! Coordination core of a quota task scheduler for a fleet of worker bots.
//!
//! The crate sits between RPC handlers and a pluggable scheduling policy.
//! It solves two problems:
//!
//! - **Batching**: many concurrent callers mutate the same pool state. Their
//!   operations are coalesced into batches, and each batch runs as one
//!   transaction against a [`StateStore`](core::StateStore). Within a batch,
//!   lifecycle notifications are applied before assignment requests, and
//!   each caller gets back only its own operation's result.
//! - **Reconciliation**: a worker may poll many times before it confirms an
//!   assignment. The [`Reconciler`](core::Reconciler) keeps one pending
//!   decision per worker and returns it on every poll until an `Assigned`
//!   update acknowledges it.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use qscheduler_core::config::PoolConfig;
//! use qscheduler_core::core::{IdleWorker, NullEventSink, Reconciler, TaskUpdate};
//! use qscheduler_core::infra::{FifoScheduler, InMemoryStateStore};
//! use qscheduler_core::runtime::{PoolState, SchedulerPool};
//! use qscheduler_core::util::serde::LabelSet;
//! use tokio_util::sync::CancellationToken;
//!
//! let store = Arc::new(InMemoryStateStore::new(PoolState::new(
//!     FifoScheduler::new(),
//!     Reconciler::new(),
//! )));
//! let pool = SchedulerPool::from_config(
//!     "default",
//!     store,
//!     &PoolConfig::default(),
//!     Arc::new(parking_lot::Mutex::new(NullEventSink)),
//! );
//!
//! let token = CancellationToken::new();
//! pool.notify(&token, vec![TaskUpdate::new_request("r1", "acct", LabelSet::new(), 1)]).await?;
//! let assignments = pool
//!     .assign_tasks(&token, vec![IdleWorker::new("w1", LabelSet::new())], 2)
//!     .await?;
//! pool.close().await;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Batching, reconciliation and the scheduling capability.
pub mod core;
/// Configuration models for pools.
pub mod config;
/// Builders to construct pools from configuration.
pub mod builders;
/// In-memory state store and reference scheduling policy.
pub mod infra;
/// Caller-facing pool API.
pub mod runtime;
/// Shared utilities.
pub mod util;
