//! Explicit stored-name → event type mapping.
//!
//! Durable stores persist events as `(type name, JSON payload)`. Turning that back into a typed
//! event needs a decoder per name, supplied by the host application at startup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::StoreError;
use crate::event::{Event, EventType, SharedEvent};

type Decoder = Arc<dyn Fn(JsonValue) -> Result<SharedEvent, serde_json::Error> + Send + Sync>;

#[derive(Default, Clone)]
pub struct EventTypeRegistry {
    decoders: HashMap<String, Decoder>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `E` under its simple type name.
    pub fn register<E: Event>(&mut self) -> Result<&mut Self, StoreError> {
        self.register_event_type(EventType::of::<E>().name(), |payload| {
            serde_json::from_value::<E>(payload).map(|event| Arc::new(event) as SharedEvent)
        })
    }

    /// Register an arbitrary decoder under `name`. Names must be unique.
    pub fn register_event_type<F>(
        &mut self,
        name: impl Into<String>,
        decoder: F,
    ) -> Result<&mut Self, StoreError>
    where
        F: Fn(JsonValue) -> Result<SharedEvent, serde_json::Error> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.decoders.contains_key(&name) {
            return Err(StoreError::DuplicateEventType(name));
        }
        self.decoders.insert(name, Arc::new(decoder));
        Ok(self)
    }

    pub fn decode(&self, name: &str, payload: JsonValue) -> Result<SharedEvent, StoreError> {
        let decoder = self
            .decoders
            .get(name)
            .ok_or_else(|| StoreError::UnknownEventType(name.to_string()))?;
        decoder(payload).map_err(|e| StoreError::Serialization {
            event_type: name.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for EventTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTypeRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct AccountOpened {
        owner: String,
    }

    impl Event for AccountOpened {
        fn stream(&self) -> &str {
            "accounts"
        }
    }

    #[test]
    fn decodes_registered_types_by_simple_name() {
        let mut registry = EventTypeRegistry::new();
        registry.register::<AccountOpened>().unwrap();

        let event = registry
            .decode("AccountOpened", serde_json::json!({ "owner": "ada" }))
            .unwrap();
        assert_eq!(
            event.downcast_ref::<AccountOpened>(),
            Some(&AccountOpened {
                owner: "ada".to_string()
            })
        );
    }

    #[test]
    fn unknown_names_fail() {
        let registry = EventTypeRegistry::new();
        let err = registry
            .decode("Nope", serde_json::Value::Null)
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownEventType(name) if name == "Nope"));
    }

    #[test]
    fn malformed_payloads_fail_with_the_type_name() {
        let mut registry = EventTypeRegistry::new();
        registry.register::<AccountOpened>().unwrap();

        let err = registry
            .decode("AccountOpened", serde_json::json!({ "owner": 42 }))
            .unwrap_err();
        assert!(matches!(err, StoreError::Serialization { ref event_type, .. } if event_type == "AccountOpened"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = EventTypeRegistry::new();
        registry.register::<AccountOpened>().unwrap();

        let err = registry.register::<AccountOpened>().unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEventType(name) if name == "AccountOpened"));
        assert_eq!(registry.names(), vec!["AccountOpened"]);
    }
}
