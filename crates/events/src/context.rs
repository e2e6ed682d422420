//! Execution context threaded through every (possibly nested) `raise`.
//!
//! Mode and depth travel with the call instead of living on the engine, so a nested raise
//! inherits exactly the mode of the raise tree it belongs to.

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::event::{AnyEvent, Event};

/// Whether raised events are persisted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// Append to the log, then handle and process.
    #[default]
    Normal,
    /// Re-drive handlers and processors without appending anything.
    Replaying,
}

/// Mode plus nesting depth of one dispatch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Execution {
    mode: EngineMode,
    depth: usize,
}

impl Execution {
    /// A top-level raise or replay step.
    pub fn root(mode: EngineMode) -> Self {
        Self { mode, depth: 0 }
    }

    /// The execution of an event raised from inside this one.
    pub fn nested(self) -> Self {
        Self {
            mode: self.mode,
            depth: self.depth + 1,
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Something that can dispatch a freshly raised event.
///
/// Implemented by the engine; handlers and processors only see it through [`RaiseContext`].
pub trait Dispatch {
    fn dispatch(&self, event: Box<dyn AnyEvent>, execution: Execution)
    -> Result<(), DispatchError>;
}

/// Handed to every handler and processor invocation.
///
/// `raise` runs the new event to completion (persist if `Normal`, handle, process, and any
/// further nesting) before returning.
pub struct RaiseContext<'a> {
    dispatcher: &'a dyn Dispatch,
    execution: Execution,
}

impl<'a> RaiseContext<'a> {
    pub fn new(dispatcher: &'a dyn Dispatch, execution: Execution) -> Self {
        Self {
            dispatcher,
            execution,
        }
    }

    pub fn raise<E: Event>(&self, event: E) -> Result<(), DispatchError> {
        self.dispatcher
            .dispatch(Box::new(event), self.execution.nested())
    }

    pub fn mode(&self) -> EngineMode {
        self.execution.mode()
    }

    pub fn is_replaying(&self) -> bool {
        self.execution.mode() == EngineMode::Replaying
    }

    /// 0 for a top-level raise, +1 per level of nesting.
    pub fn depth(&self) -> usize {
        self.execution.depth()
    }
}

impl core::fmt::Debug for RaiseContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RaiseContext")
            .field("execution", &self.execution)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Noted(u8);

    impl Event for Noted {
        fn stream(&self) -> &str {
            "notes"
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Execution)>>,
    }

    impl Dispatch for Recorder {
        fn dispatch(
            &self,
            event: Box<dyn AnyEvent>,
            execution: Execution,
        ) -> Result<(), DispatchError> {
            self.seen
                .lock()
                .unwrap()
                .push((event.event_type().name().to_string(), execution));
            Ok(())
        }
    }

    #[test]
    fn nested_raises_inherit_mode_and_increase_depth() {
        let recorder = Recorder::default();
        let ctx = RaiseContext::new(&recorder, Execution::root(EngineMode::Replaying));

        assert!(ctx.is_replaying());
        assert_eq!(ctx.depth(), 0);

        ctx.raise(Noted(1)).unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "Noted");
        assert_eq!(seen[0].1.mode(), EngineMode::Replaying);
        assert_eq!(seen[0].1.depth(), 1);
    }

    #[test]
    fn default_mode_is_normal() {
        assert_eq!(EngineMode::default(), EngineMode::Normal);
        assert_eq!(
            serde_json::to_string(&EngineMode::Replaying).unwrap(),
            "\"replaying\""
        );
    }
}
