//! Dispatch engine: raise → persist → handle → process.
//!
//! ## Execution Flow
//!
//! For every raised event, synchronously and in this order:
//!
//! ```text
//! raise(event)
//!   ↓
//! 0. Stamp the timestamp slot (if the event has one) from the engine clock
//!   ↓
//! 1. Append to the event store            (Normal mode only; failure aborts everything)
//!   ↓
//! 2. Resolve + validate + invoke handler  (no handler is fine; mismatch is an error)
//!   ↓
//! 3. Run stream processors for event.stream, in registration order
//! ```
//!
//! A handler or processor may raise further events through its [`RaiseContext`]. Such a nested
//! raise runs all three steps to completion, depth-first, before control returns to the code
//! that raised it. The mode of the top-level call is inherited by every nested raise, so
//! nothing raised during a replay is ever appended.
//!
//! ## Concurrency
//!
//! The engine keeps no per-call mutable state: mode and depth travel in [`Execution`]. It is
//! `Sync` when its store and resolver are, but ordering between two overlapping top-level calls
//! is not defined. Callers with several producers must serialize their raises (one worker, or a
//! mutex around the engine).

use std::sync::Arc;

use tracing::{debug, trace, warn};

use encore_core::{Clock, SystemClock};
use encore_events::{
    AnyEvent, Dispatch, DispatchError, EngineMode, Event, EventStore, Execution, HandlerResolver,
    RaiseContext, SharedEvent, StreamProcessorRegistry, StreamState,
};

use crate::config::EngineConfig;
use crate::replay::{ReplayController, ReplayReport};

/// In-process event dispatch and replay engine.
///
/// ## Generic Parameters
///
/// - `S`: event log (see [`EventStore`])
/// - `R`: handler resolver (see [`HandlerResolver`])
pub struct DispatchEngine<S, R> {
    store: S,
    resolver: R,
    processors: StreamProcessorRegistry,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl<S, R> DispatchEngine<S, R> {
    pub fn new(store: S, resolver: R) -> Self {
        Self {
            store,
            resolver,
            processors: StreamProcessorRegistry::new(),
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    /// Replace the time source used for timestamp population.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a processor callback for `stream`. All callbacks for a stream run, in
    /// registration order, on every event routed to it.
    pub fn register_processor_for_stream<F>(&self, stream: impl Into<String>, callback: F)
    where
        F: Fn(&StreamState, &dyn AnyEvent, &RaiseContext<'_>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.processors.register(stream, callback);
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Processor state for `stream`, once a processor on it has run.
    pub fn stream_state(&self, stream: &str) -> Option<StreamState> {
        self.processors.state(stream)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

impl<S, R> DispatchEngine<S, R>
where
    S: EventStore,
    R: HandlerResolver,
{
    /// Raise an event in `Normal` mode: persist it, handle it, process it.
    ///
    /// Returns once the event and everything it raised (transitively) has been fully resolved,
    /// or with the first error encountered anywhere in that tree.
    pub fn raise<E: Event>(&self, event: E) -> Result<(), DispatchError> {
        self.raise_with_mode(event, EngineMode::Normal)
    }

    /// Raise an event as the root of a raise tree running in `mode`.
    pub fn raise_with_mode<E: Event>(&self, event: E, mode: EngineMode) -> Result<(), DispatchError> {
        self.dispatch(Box::new(event), Execution::root(mode))
    }

    /// Re-drive the whole log through handlers and processors without appending anything.
    pub fn replay_all(&self) -> Result<ReplayReport, DispatchError> {
        ReplayController::new(self).replay_all()
    }

    /// Steps 1–3 for an event that is already in its final (immutable) form.
    pub(crate) fn dispatch_shared(
        &self,
        event: SharedEvent,
        execution: Execution,
    ) -> Result<(), DispatchError> {
        let event_type = event.event_type();

        if let Some(limit) = self.config.max_depth {
            if execution.depth() > limit {
                warn!(event_type = event_type.name(), limit, "raise nesting limit exceeded");
                return Err(DispatchError::RecursionLimit {
                    event_type: event_type.name(),
                    limit,
                });
            }
        }

        if execution.mode() == EngineMode::Normal {
            let record = self.store.append(Arc::clone(&event))?;
            debug!(
                event_type = event_type.name(),
                stream = event.stream_id(),
                position = record.position,
                depth = execution.depth(),
                "event appended"
            );
        } else {
            debug!(
                event_type = event_type.name(),
                stream = event.stream_id(),
                depth = execution.depth(),
                "event re-driven without append"
            );
        }

        let ctx = RaiseContext::new(self, execution);
        self.handle(&*event, &ctx)?;
        self.processors.run(event.stream_id(), &*event, &ctx)
    }

    fn handle(&self, event: &dyn AnyEvent, ctx: &RaiseContext<'_>) -> Result<(), DispatchError> {
        let event_type = event.event_type();

        let Some(handler) = self.resolver.resolve(event_type) else {
            trace!(event_type = event_type.name(), "no handler resolved");
            return Ok(());
        };

        let capability = handler.capability();
        if capability != event_type {
            warn!(
                event_type = event_type.name(),
                handler_capability = capability.name(),
                "resolver returned a handler for a different event type"
            );
            return Err(DispatchError::HandlerContractMismatch {
                event_type: event_type.name(),
                found: capability.name(),
            });
        }

        handler
            .handle_event(event, ctx)
            .map_err(DispatchError::from_handler)
    }
}

impl<S, R> Dispatch for DispatchEngine<S, R>
where
    S: EventStore,
    R: HandlerResolver,
{
    /// Entry point for freshly raised events (top-level or nested).
    fn dispatch(
        &self,
        mut event: Box<dyn AnyEvent>,
        execution: Execution,
    ) -> Result<(), DispatchError> {
        if event.stamp(self.clock.now()) {
            trace!(event_type = event.event_type().name(), "timestamp populated");
        }
        self.dispatch_shared(SharedEvent::from(event), execution)
    }
}

impl<S, R> core::fmt::Debug for DispatchEngine<S, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("processors", &self.processors)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Serialize};

    use encore_core::ManualClock;
    use encore_events::{ErasedHandler, EventType, HandlerRegistry, StoreError, StoredRecord};

    use crate::event_store::InMemoryEventStore;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Deposited {
        account: String,
        amount: i64,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    }

    impl Event for Deposited {
        fn stream(&self) -> &str {
            &self.account
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Audited {
        note: String,
        at: DateTime<Utc>,
    }

    impl Event for Audited {
        fn stream(&self) -> &str {
            "audit"
        }

        fn timestamp_mut(&mut self) -> Option<&mut DateTime<Utc>> {
            Some(&mut self.at)
        }
    }

    fn deposit(account: &str, amount: i64) -> Deposited {
        Deposited {
            account: account.to_string(),
            amount,
            at: None,
        }
    }

    #[test]
    fn raise_appends_then_handles_then_processes() {
        let steps = Arc::new(Mutex::new(Vec::new()));
        let mut handlers = HandlerRegistry::new();
        let handler_steps = steps.clone();
        handlers.register::<Deposited, _>(
            move |e: &Deposited, _ctx: &RaiseContext<'_>| -> anyhow::Result<()> {
                handler_steps.lock().unwrap().push(format!("handle {}", e.amount));
                Ok(())
            },
        );

        let engine = DispatchEngine::new(InMemoryEventStore::new(), handlers);
        let processor_steps = steps.clone();
        engine.register_processor_for_stream("acc-1", move |_state, event, _ctx| {
            let e = event.downcast_ref::<Deposited>().unwrap();
            processor_steps.lock().unwrap().push(format!("process {}", e.amount));
            Ok(())
        });

        engine.raise(deposit("acc-1", 10)).unwrap();

        assert_eq!(engine.store().len().unwrap(), 1);
        assert_eq!(
            *steps.lock().unwrap(),
            vec!["handle 10".to_string(), "process 10".to_string()]
        );
    }

    #[test]
    fn missing_handler_still_runs_processors() {
        let engine = DispatchEngine::new(InMemoryEventStore::new(), HandlerRegistry::new());
        engine.register_processor_for_stream("acc-1", |state, _event, _ctx| {
            state.update("count", 0u32, |n| n + 1)?;
            Ok(())
        });

        engine.raise(deposit("acc-1", 5)).unwrap();

        let state = engine.stream_state("acc-1").unwrap();
        assert_eq!(state.get::<u32>("count").unwrap(), Some(1));
    }

    #[test]
    fn timestamp_comes_from_the_engine_clock() {
        let at = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 0).unwrap();
        let engine = DispatchEngine::new(InMemoryEventStore::new(), HandlerRegistry::new())
            .with_clock(ManualClock::new(at));

        engine
            .raise(Audited {
                note: "x".into(),
                at: DateTime::<Utc>::MIN_UTC,
            })
            .unwrap();
        engine.raise(deposit("acc-1", 1)).unwrap();

        let records = engine.store().read_all().unwrap();
        assert_eq!(records[0].event.downcast_ref::<Audited>().unwrap().at, at);
        // No timestamp slot: untouched.
        assert_eq!(records[1].event.downcast_ref::<Deposited>().unwrap().at, None);
    }

    struct FailingStore;

    impl EventStore for FailingStore {
        fn append(&self, _event: SharedEvent) -> Result<StoredRecord, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        fn read_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn append_failure_skips_handler_and_processors() {
        let touched = Arc::new(Mutex::new(false));
        let mut handlers = HandlerRegistry::new();
        let handler_touched = touched.clone();
        handlers.register::<Deposited, _>(
            move |_e: &Deposited, _ctx: &RaiseContext<'_>| -> anyhow::Result<()> {
                *handler_touched.lock().unwrap() = true;
                Ok(())
            },
        );
        let engine = DispatchEngine::new(FailingStore, handlers);
        let processor_touched = touched.clone();
        engine.register_processor_for_stream("acc-1", move |_state, _event, _ctx| {
            *processor_touched.lock().unwrap() = true;
            Ok(())
        });

        let err = engine.raise(deposit("acc-1", 1)).unwrap_err();
        assert!(matches!(err, DispatchError::Storage(StoreError::Io(_))));
        assert!(!*touched.lock().unwrap());
        assert!(engine.stream_state("acc-1").is_none());
    }

    /// Always answers with a handler for `Audited`, whatever it was asked for.
    struct WrongResolver;

    impl HandlerResolver for WrongResolver {
        fn resolve(&self, _event_type: EventType) -> Option<Arc<dyn ErasedHandler>> {
            let mut registry = HandlerRegistry::new();
            registry.register::<Audited, _>(
                |_e: &Audited, _ctx: &RaiseContext<'_>| -> anyhow::Result<()> { Ok(()) },
            );
            registry.resolve(EventType::of::<Audited>())
        }
    }

    #[test]
    fn mismatched_handler_is_rejected_before_processing() {
        let engine = DispatchEngine::new(InMemoryEventStore::new(), WrongResolver);
        let processed = Arc::new(Mutex::new(false));
        let flag = processed.clone();
        engine.register_processor_for_stream("acc-1", move |_state, _event, _ctx| {
            *flag.lock().unwrap() = true;
            Ok(())
        });

        let err = engine.raise(deposit("acc-1", 1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot handle Deposited. Handler returned from Factory does not implement EventHandler<Deposited>"
        );
        assert!(matches!(
            err,
            DispatchError::HandlerContractMismatch { found: "Audited", .. }
        ));
        assert!(!*processed.lock().unwrap());
    }

    #[test]
    fn depth_limit_stops_runaway_recursion() {
        let engine = DispatchEngine::new(InMemoryEventStore::new(), HandlerRegistry::new())
            .with_config(EngineConfig::default().with_max_depth(Some(3)));
        engine.register_processor_for_stream("loop", |_state, _event, ctx| {
            ctx.raise(deposit("loop", 0))?;
            Ok(())
        });

        assert_eq!(engine.config().max_depth, Some(3));

        let err = engine.raise(deposit("loop", 0)).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::RecursionLimit { event_type: "Deposited", limit: 3 }
        ));
        // Depths 0..=3 were appended before the fifth raise was refused.
        assert_eq!(engine.store().len().unwrap(), 4);
    }

    #[test]
    fn replaying_mode_never_appends() {
        let engine = DispatchEngine::new(InMemoryEventStore::new(), HandlerRegistry::new());
        engine
            .raise_with_mode(deposit("acc-1", 1), EngineMode::Replaying)
            .unwrap();
        assert!(engine.store().is_empty().unwrap());
    }
}
