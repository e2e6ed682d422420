//! Event log implementations.
//!
//! Both stores assign positions starting at 1 under a single writer lock, so the position order
//! is the append order.

pub mod file;
pub mod in_memory;

pub use file::FileEventStore;
pub use in_memory::InMemoryEventStore;
