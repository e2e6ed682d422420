//! Error model for dispatch, storage and processor state.

use thiserror::Error;

/// Name of the handler capability, as it appears in contract-mismatch messages.
pub const HANDLER_CAPABILITY: &str = "EventHandler";

/// Event log operation error.
///
/// These are **infrastructure errors**: any of them is fatal to the `raise` or replay that
/// triggered the storage access.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event log io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("event serialization failed for {event_type}: {reason}")]
    Serialization {
        event_type: String,
        reason: String,
    },

    #[error("corrupt event log at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("unknown event type '{0}' (not registered)")]
    UnknownEventType(String),

    #[error("event type '{0}' is already registered")]
    DuplicateEventType(String),

    #[error("event log lock poisoned")]
    LockPoisoned,
}

/// Failure reading or writing a value in a [`StreamState`](crate::StreamState).
#[derive(Debug, Error)]
pub enum StateError {
    #[error("stream state key '{key}' could not be encoded: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("stream state key '{key}' holds an incompatible value: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Error surfaced by `raise` and `replay_all`.
///
/// Errors raised by user handlers and processors are carried as-is (`Handler` / `Processor`
/// are transparent) and travel unchanged through every enclosing `raise`: a nested
/// `DispatchError` that bubbles out of a handler via `?` is recovered, not wrapped again.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The resolver returned a handler whose capability is not the raised event's type.
    #[error(
        "Cannot handle {event_type}. Handler returned from Factory does not implement {capability}<{event_type}>",
        capability = HANDLER_CAPABILITY
    )]
    HandlerContractMismatch {
        event_type: &'static str,
        /// The event type the returned handler actually declares.
        found: &'static str,
    },

    #[error("event store failure: {0}")]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Handler(anyhow::Error),

    #[error(transparent)]
    Processor(anyhow::Error),

    #[error("raising {event_type} exceeded the maximum nesting depth of {limit}")]
    RecursionLimit { event_type: &'static str, limit: usize },
}

impl DispatchError {
    /// Classify an error returned by a handler.
    pub fn from_handler(err: anyhow::Error) -> Self {
        Self::recover_nested(err).unwrap_or_else(DispatchError::Handler)
    }

    /// Classify an error returned by a stream processor.
    pub fn from_processor(err: anyhow::Error) -> Self {
        Self::recover_nested(err).unwrap_or_else(DispatchError::Processor)
    }

    // Only a bare nested error is unwrapped; context added on top of it belongs to the user.
    fn recover_nested(err: anyhow::Error) -> Result<Self, anyhow::Error> {
        let outermost_is_dispatch = err
            .chain()
            .next()
            .is_some_and(|e| e.is::<DispatchError>());
        if outermost_is_dispatch {
            err.downcast::<DispatchError>()
        } else {
            Err(err)
        }
    }

    /// The user error carried by a `Handler` or `Processor` failure.
    pub fn user_error(&self) -> Option<&anyhow::Error> {
        match self {
            DispatchError::Handler(err) | DispatchError::Processor(err) => Some(err),
            _ => None,
        }
    }
}
