//! Scheduling policy implementations.

pub mod fifo;

pub use fifo::FifoScheduler;
