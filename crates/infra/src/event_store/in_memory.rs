use std::sync::RwLock;

use chrono::Utc;

use encore_core::EventId;
use encore_events::{EventStore, SharedEvent, StoreError, StoredRecord};

/// In-memory append-only event log.
///
/// Intended for tests/dev and for hosts that rebuild their history elsewhere.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    records: RwLock<Vec<StoredRecord>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, event: SharedEvent) -> Result<StoredRecord, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;

        let record = StoredRecord {
            position: records.len() as u64 + 1,
            event_id: EventId::new(),
            recorded_at: Utc::now(),
            event,
        };
        records.push(record.clone());
        Ok(record)
    }

    fn read_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.clone())
    }

    fn len(&self) -> Result<u64, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.len() as u64)
    }
}
