//! `encore-events`: contracts and mechanics of event dispatch (no IO).
//!
//! - [`Event`] / [`AnyEvent`]: typed events and their object-safe view
//! - [`EventHandler`] / [`HandlerResolver`]: one handler per concrete event type
//! - [`StreamProcessorRegistry`]: stream-scoped callbacks with persistent [`StreamState`]
//! - [`RaiseContext`]: how handlers and processors raise nested events
//! - [`EventStore`] / [`EventTypeRegistry`]: the log boundary

pub mod context;
pub mod error;
pub mod event;
pub mod handler;
pub mod processor;
pub mod registry;
pub mod store;

pub use context::{Dispatch, EngineMode, Execution, RaiseContext};
pub use error::{DispatchError, HANDLER_CAPABILITY, StateError, StoreError};
pub use event::{AnyEvent, Event, EventType, SharedEvent};
pub use handler::{ErasedHandler, EventHandler, HandlerRegistry, HandlerResolver, Handles};
pub use processor::{ProcessorFn, StreamProcessorRegistry, StreamState};
pub use registry::EventTypeRegistry;
pub use store::{EventStore, StoredRecord};
