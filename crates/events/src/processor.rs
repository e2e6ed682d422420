//! Stream-scoped processors with persistent state.
//!
//! - Any number of callbacks per stream, run in registration order
//! - One [`StreamState`] per stream, created lazily, shared by every callback on that stream
//!   and never cleared for the lifetime of the registry (replays included)
//!
//! Callbacks may raise further events. Nothing here holds a lock while a callback runs, so a
//! nested raise routed back to the same stream sees and mutates the very same state.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::context::RaiseContext;
use crate::error::{DispatchError, StateError};
use crate::event::AnyEvent;

/// Processor callback: `(state, event, ctx) -> completion`.
pub type ProcessorFn =
    Arc<dyn Fn(&StreamState, &dyn AnyEvent, &RaiseContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Mutable key/value container owned by one stream.
///
/// Cloning yields another handle to the same container. Each operation locks only for its own
/// duration.
#[derive(Clone, Default)]
pub struct StreamState {
    entries: Arc<Mutex<HashMap<String, JsonValue>>>,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed read. `Ok(None)` when the key is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StateError> {
        let Some(raw) = self.get_raw(key) else {
            return Ok(None);
        };
        serde_json::from_value(raw)
            .map(Some)
            .map_err(|source| StateError::Decode {
                key: key.to_string(),
                source,
            })
    }

    pub fn get_raw(&self, key: &str) -> Option<JsonValue> {
        self.lock().get(key).cloned()
    }

    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<(), StateError> {
        let key = key.into();
        let encoded = serde_json::to_value(value).map_err(|source| StateError::Encode {
            key: key.clone(),
            source,
        })?;
        self.lock().insert(key, encoded);
        Ok(())
    }

    /// Read-modify-write of one key, starting from `default` if absent. Returns the new value.
    ///
    /// The container stays locked while `f` runs; `f` must not touch this state.
    pub fn update<T, F>(&self, key: &str, default: T, f: F) -> Result<T, StateError>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnOnce(T) -> T,
    {
        let mut entries = self.lock();
        let current = match entries.get(key) {
            Some(raw) => {
                serde_json::from_value(raw.clone()).map_err(|source| StateError::Decode {
                    key: key.to_string(),
                    source,
                })?
            }
            None => default,
        };
        let next = f(current);
        let encoded = serde_json::to_value(next.clone()).map_err(|source| StateError::Encode {
            key: key.to_string(),
            source,
        })?;
        entries.insert(key.to_string(), encoded);
        Ok(next)
    }

    pub fn remove(&self, key: &str) -> Option<JsonValue> {
        self.lock().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// `true` if both handles point at the same container.
    pub fn ptr_eq(&self, other: &StreamState) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    // Plain data: a panic mid-update cannot leave a broken invariant behind.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, JsonValue>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.lock().iter()).finish()
    }
}

/// Maps stream ids to ordered processor callbacks and their shared state.
#[derive(Default)]
pub struct StreamProcessorRegistry {
    processors: RwLock<HashMap<String, Vec<ProcessorFn>>>,
    states: Mutex<HashMap<String, StreamState>>,
}

impl StreamProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` to the ordered list for `stream`.
    pub fn register<F>(&self, stream: impl Into<String>, callback: F)
    where
        F: Fn(&StreamState, &dyn AnyEvent, &RaiseContext<'_>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(stream.into())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Run every processor registered for `stream`, in registration order.
    ///
    /// The first failing callback aborts the run; its error is returned unchanged if it came
    /// from a nested raise.
    pub fn run(
        &self,
        stream: &str,
        event: &dyn AnyEvent,
        ctx: &RaiseContext<'_>,
    ) -> Result<(), DispatchError> {
        let callbacks = self.callbacks(stream);
        if callbacks.is_empty() {
            return Ok(());
        }

        let state = self.state_for(stream);
        for callback in callbacks {
            callback(&state, event, ctx).map_err(DispatchError::from_processor)?;
        }
        Ok(())
    }

    /// State for `stream`, if any processor on it has run.
    pub fn state(&self, stream: &str) -> Option<StreamState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream)
            .cloned()
    }

    pub fn processor_count(&self, stream: &str) -> usize {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream)
            .map_or(0, Vec::len)
    }

    pub fn streams(&self) -> Vec<String> {
        let mut streams: Vec<String> = self
            .processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        streams.sort();
        streams
    }

    // Snapshot so callbacks can raise (or register) without holding the lock.
    fn callbacks(&self, stream: &str) -> Vec<ProcessorFn> {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }

    fn state_for(&self, stream: &str) -> StreamState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(stream.to_string())
            .or_default()
            .clone()
    }
}

impl fmt::Debug for StreamProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamProcessorRegistry")
            .field("streams", &self.streams())
            .finish_non_exhaustive()
    }
}
