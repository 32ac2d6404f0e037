//! Configuration models for scheduler pools.

pub mod pool;

pub use pool::{
    PoolConfig, SchedulerConfig, DEFAULT_BATCH_WINDOW_MS, DEFAULT_EVENT_BUFFER_LIMIT,
    DEFAULT_MAX_PENDING_OPERATIONS,
};
