//! Handler capability and handler resolution.
//!
//! A handler is bound one-to-one to a concrete event type. The engine asks a
//! [`HandlerResolver`] for a handler on every raise and validates the result before invoking it:
//! the returned handler's declared capability must be exactly the raised event's type.
//!
//! [`HandlerRegistry`] is the in-process resolver: a static table of typed registrations, each
//! producing either a shared instance or a fresh one per resolve.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::warn;

use crate::context::RaiseContext;
use crate::error::{DispatchError, HANDLER_CAPABILITY};
use crate::event::{AnyEvent, Event, EventType};

/// Handles one concrete event type.
///
/// Returning an error aborts the current raise (the processor stage is skipped) and every
/// enclosing raise. Errors from nested `ctx.raise(..)` calls can be propagated with `?`; they
/// reach the top-level caller unchanged.
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    fn handle(&self, event: &E, ctx: &RaiseContext<'_>) -> anyhow::Result<()>;
}

impl<E, F> EventHandler<E> for F
where
    E: Event,
    F: Fn(&E, &RaiseContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, event: &E, ctx: &RaiseContext<'_>) -> anyhow::Result<()> {
        self(event, ctx)
    }
}

/// Type-erased handler as returned by a [`HandlerResolver`].
pub trait ErasedHandler: Send + Sync {
    /// The event type this handler declares it can handle.
    fn capability(&self) -> EventType;

    fn handle_event(&self, event: &dyn AnyEvent, ctx: &RaiseContext<'_>) -> anyhow::Result<()>;
}

/// Binds a typed [`EventHandler<E>`] to its capability `E`.
pub struct Handles<E, H> {
    handler: H,
    _event: PhantomData<fn(&E)>,
}

impl<E, H> Handles<E, H>
where
    E: Event,
    H: EventHandler<E>,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _event: PhantomData,
        }
    }
}

impl<E, H> ErasedHandler for Handles<E, H>
where
    E: Event,
    H: EventHandler<E>,
{
    fn capability(&self) -> EventType {
        EventType::of::<E>()
    }

    fn handle_event(&self, event: &dyn AnyEvent, ctx: &RaiseContext<'_>) -> anyhow::Result<()> {
        // The engine validates capability first; this only trips for callers that skip that.
        let Some(typed) = event.downcast_ref::<E>() else {
            return Err(DispatchError::HandlerContractMismatch {
                event_type: event.event_type().name(),
                found: self.capability().name(),
            }
            .into());
        };
        self.handler.handle(typed, ctx)
    }
}

impl<E, H> fmt::Debug for Handles<E, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Handles<{}>",
            std::any::type_name::<E>().rsplit("::").next().unwrap_or_default()
        )
    }
}

/// Resolves at most one handler for an event type.
///
/// The engine imposes nothing on how resolution works (static table, container, factory); it
/// only validates what comes back. Returning `None` means "no handler", which is not an error.
pub trait HandlerResolver: Send + Sync {
    fn resolve(&self, event_type: EventType) -> Option<Arc<dyn ErasedHandler>>;
}

impl<R> HandlerResolver for Arc<R>
where
    R: HandlerResolver + ?Sized,
{
    fn resolve(&self, event_type: EventType) -> Option<Arc<dyn ErasedHandler>> {
        (**self).resolve(event_type)
    }
}

type HandlerFactory = Arc<dyn Fn() -> Arc<dyn ErasedHandler> + Send + Sync>;

/// Static handler table keyed by event type.
///
/// Registrations are typed, so every entry's capability matches its key by construction.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    factories: HashMap<EventType, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared handler instance for `E`.
    ///
    /// A later registration for the same event type replaces this one.
    pub fn register<E, H>(&mut self, handler: H) -> &mut Self
    where
        E: Event,
        H: EventHandler<E>,
    {
        let shared: Arc<dyn ErasedHandler> = Arc::new(Handles::<E, H>::new(handler));
        self.insert(EventType::of::<E>(), Arc::new(move || Arc::clone(&shared)))
    }

    /// Register a factory that builds a fresh handler for `E` on every resolve.
    pub fn register_factory<E, H, F>(&mut self, factory: F) -> &mut Self
    where
        E: Event,
        H: EventHandler<E>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.insert(
            EventType::of::<E>(),
            Arc::new(move || Arc::new(Handles::<E, H>::new(factory())) as Arc<dyn ErasedHandler>),
        )
    }

    pub fn contains<E: Event>(&self) -> bool {
        self.factories.contains_key(&EventType::of::<E>())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    fn insert(&mut self, event_type: EventType, factory: HandlerFactory) -> &mut Self {
        if self.factories.insert(event_type, factory).is_some() {
            warn!(
                event_type = event_type.name(),
                capability = HANDLER_CAPABILITY,
                "handler re-registered; previous registration replaced"
            );
        }
        self
    }
}

impl HandlerResolver for HandlerRegistry {
    fn resolve(&self, event_type: EventType) -> Option<Arc<dyn ErasedHandler>> {
        self.factories.get(&event_type).map(|factory| factory())
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::{Deserialize, Serialize};

    use crate::context::{Dispatch, EngineMode, Execution};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TextAdded(String);

    impl Event for TextAdded {
        fn stream(&self) -> &str {
            "text"
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Cleared;

    impl Event for Cleared {
        fn stream(&self) -> &str {
            "text"
        }
    }

    struct NoDispatch;

    impl Dispatch for NoDispatch {
        fn dispatch(&self, _: Box<dyn AnyEvent>, _: Execution) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    struct Collect(Arc<Mutex<Vec<String>>>);

    struct Ignore;

    impl EventHandler<Cleared> for Ignore {
        fn handle(&self, _event: &Cleared, _ctx: &RaiseContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl EventHandler<TextAdded> for Collect {
        fn handle(&self, event: &TextAdded, _ctx: &RaiseContext<'_>) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(event.0.clone());
            Ok(())
        }
    }

    #[test]
    fn resolves_registered_handler_with_matching_capability() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        registry.register::<TextAdded, _>(Collect(seen.clone()));

        let handler = registry.resolve(EventType::of::<TextAdded>()).unwrap();
        assert_eq!(handler.capability(), EventType::of::<TextAdded>());

        let ctx = RaiseContext::new(&NoDispatch, Execution::root(EngineMode::Normal));
        handler
            .handle_event(&TextAdded("hello".into()), &ctx)
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn unregistered_types_resolve_to_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.resolve(EventType::of::<Cleared>()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn factories_build_a_fresh_handler_per_resolve() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let mut registry = HandlerRegistry::new();
        registry.register_factory::<Cleared, _, _>(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ignore
        });

        registry.resolve(EventType::of::<Cleared>()).unwrap();
        registry.resolve(EventType::of::<Cleared>()).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn re_registration_replaces_the_previous_handler() {
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        registry
            .register::<TextAdded, _>(Collect(first.clone()))
            .register::<TextAdded, _>(Collect(second.clone()));
        assert_eq!(registry.len(), 1);

        let ctx = RaiseContext::new(&NoDispatch, Execution::root(EngineMode::Normal));
        registry
            .resolve(EventType::of::<TextAdded>())
            .unwrap()
            .handle_event(&TextAdded("x".into()), &ctx)
            .unwrap();

        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[test]
    fn erased_handler_refuses_foreign_events() {
        let handler = Handles::<TextAdded, _>::new(Collect(Arc::new(Mutex::new(Vec::new()))));
        let ctx = RaiseContext::new(&NoDispatch, Execution::root(EngineMode::Normal));

        let err = handler.handle_event(&Cleared, &ctx).unwrap_err();
        let err = DispatchError::from_handler(err);
        assert_eq!(
            err.to_string(),
            "Cannot handle Cleared. Handler returned from Factory does not implement EventHandler<Cleared>"
        );
    }
}
