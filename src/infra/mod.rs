//! Infrastructure adapters: state stores and scheduling policies.

pub mod scheduler;
pub mod store;

pub use scheduler::FifoScheduler;
pub use store::InMemoryStateStore;
