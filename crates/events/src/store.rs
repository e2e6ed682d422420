//! Append-only event log boundary.
//!
//! The engine needs only two operations: append one event, and read a snapshot of the whole
//! log in append order. Implementations live in the infra crate.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use encore_core::EventId;

use crate::error::StoreError;
use crate::event::SharedEvent;

/// An event together with its position in the log.
///
/// Positions start at 1, increase by one per append, and are never reused. Records are never
/// reordered or mutated after append.
#[derive(Clone)]
pub struct StoredRecord {
    pub position: u64,
    pub event_id: EventId,
    /// When the log accepted the event (storage time, not business time).
    pub recorded_at: DateTime<Utc>,
    pub event: SharedEvent,
}

impl StoredRecord {
    pub fn event_type_name(&self) -> &'static str {
        self.event.event_type().name()
    }

    pub fn stream(&self) -> &str {
        self.event.stream_id()
    }
}

impl fmt::Debug for StoredRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredRecord")
            .field("position", &self.position)
            .field("event_id", &self.event_id)
            .field("recorded_at", &self.recorded_at)
            .field("event", &self.event)
            .finish()
    }
}

/// Append-only, totally ordered event log.
///
/// ## Append Semantics
///
/// `append()` assigns the next position and makes the record visible to later `read_all()`
/// calls. A failure is fatal to the raise that triggered it.
///
/// ## Read Semantics
///
/// `read_all()` returns every record in position order as a snapshot taken at call time.
/// Appends racing with a read are not ordered relative to it; callers that need that must
/// serialize access themselves.
pub trait EventStore: Send + Sync {
    fn append(&self, event: SharedEvent) -> Result<StoredRecord, StoreError>;

    fn read_all(&self) -> Result<Vec<StoredRecord>, StoreError>;

    /// Number of records in the log.
    fn len(&self) -> Result<u64, StoreError> {
        Ok(self.read_all()?.len() as u64)
    }

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(&self, event: SharedEvent) -> Result<StoredRecord, StoreError> {
        (**self).append(event)
    }

    fn read_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        (**self).read_all()
    }

    fn len(&self) -> Result<u64, StoreError> {
        (**self).len()
    }
}
