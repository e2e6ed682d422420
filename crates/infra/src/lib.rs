//! Infrastructure layer: dispatch engine, replay, event logs, config.

pub mod config;
pub mod dispatcher;
pub mod event_store;
pub mod replay;

pub use config::{ConfigError, EngineConfig};
pub use dispatcher::DispatchEngine;
pub use event_store::{FileEventStore, InMemoryEventStore};
pub use replay::{ReplayController, ReplayReport};
