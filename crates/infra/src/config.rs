//! Engine configuration.
//!
//! Values come from code (`Default` + `with_*` builders) or from the environment at the edge of
//! the process via [`EngineConfig::from_env`].

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use encore_events::{EventStore, EventTypeRegistry, StoreError};

use crate::event_store::{FileEventStore, InMemoryEventStore};

/// Env var holding the maximum raise nesting depth (`0` disables the bound).
pub const MAX_DEPTH_ENV: &str = "ENCORE_MAX_DEPTH";
/// Env var holding the path of the JSON-lines event log (unset: in-memory log).
pub const EVENT_LOG_ENV: &str = "ENCORE_EVENT_LOG";

const DEFAULT_MAX_DEPTH: usize = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

/// Dispatch engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deepest allowed nesting of raises; `None` means unbounded.
    pub max_depth: Option<usize>,
    /// Location of a durable event log; `None` keeps the log in memory.
    pub event_log: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: Some(DEFAULT_MAX_DEPTH),
            event_log: None,
        }
    }
}

impl EngineConfig {
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_event_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.event_log = Some(path.into());
        self
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup (the environment, a map in tests, ...).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(MAX_DEPTH_ENV) {
            let depth: usize = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber {
                    var: MAX_DEPTH_ENV,
                    value: raw.clone(),
                })?;
            config.max_depth = (depth > 0).then_some(depth);
        }

        if let Some(path) = lookup(EVENT_LOG_ENV).filter(|p| !p.trim().is_empty()) {
            config.event_log = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Open the event log this configuration points at.
    ///
    /// The registry is only consulted by the durable log, to decode stored events.
    pub fn open_store(&self, registry: EventTypeRegistry) -> Result<Arc<dyn EventStore>, StoreError> {
        match &self.event_log {
            Some(path) => {
                info!(path = %path.display(), "using file event log");
                Ok(Arc::new(FileEventStore::open(path, registry)?))
            }
            None => {
                info!("using in-memory event log");
                Ok(Arc::new(InMemoryEventStore::new()))
            }
        }
    }
}
