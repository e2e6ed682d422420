use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// A typed occurrence raised through the dispatch engine.
///
/// Events are:
/// - **immutable** once raised (treat them as facts)
/// - **routed** to processors by their `stream`
/// - **serializable**, so durable stores can persist them and decode them back through an
///   [`EventTypeRegistry`](crate::EventTypeRegistry)
///
/// The concrete Rust type is the event's identity: handlers are bound one-to-one to it.
pub trait Event: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    /// Stream identifier used to route the event to stream processors.
    fn stream(&self) -> &str;

    /// Writable timestamp slot populated by the engine before dispatch.
    ///
    /// Return `Some` only for a `DateTime<Utc>` field the engine is allowed to overwrite.
    /// Events without such a field keep the default and are never touched.
    fn timestamp_mut(&mut self) -> Option<&mut DateTime<Utc>> {
        None
    }
}

/// Runtime identity of a concrete event type.
///
/// Equality is by `TypeId`; `name` is the simple (unqualified) type name used in error messages
/// and as the default stored type name.
#[derive(Copy, Clone)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
}

impl EventType {
    pub fn of<E: Event>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: simple_type_name(std::any::type_name::<E>()),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// `my_app::events::OrderPlaced<u32>` -> `OrderPlaced`
fn simple_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Object-safe view over any [`Event`].
///
/// Blanket-implemented; user code never implements this directly.
pub trait AnyEvent: fmt::Debug + Send + Sync + 'static {
    fn event_type(&self) -> EventType;

    /// Same as [`Event::stream`].
    fn stream_id(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    fn to_json(&self) -> Result<JsonValue, serde_json::Error>;

    /// Write `now` into the event's timestamp slot. Returns `false` if it has none.
    fn stamp(&mut self, now: DateTime<Utc>) -> bool;
}

impl<E: Event> AnyEvent for E {
    fn event_type(&self) -> EventType {
        EventType::of::<E>()
    }

    fn stream_id(&self) -> &str {
        self.stream()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_json(&self) -> Result<JsonValue, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn stamp(&mut self, now: DateTime<Utc>) -> bool {
        match self.timestamp_mut() {
            Some(slot) => {
                *slot = now;
                true
            }
            None => false,
        }
    }
}

impl dyn AnyEvent {
    pub fn is<E: Event>(&self) -> bool {
        self.as_any().is::<E>()
    }

    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }
}

/// The immutable, shareable form of a raised event (what the log holds and replay re-drives).
pub type SharedEvent = Arc<dyn AnyEvent>;
