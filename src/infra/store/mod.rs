//! State store backends.

pub mod memory;

pub use memory::InMemoryStateStore;
