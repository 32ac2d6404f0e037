//! Caller-facing pool API.

pub mod api;

pub use api::{PoolState, SchedulerPool};
