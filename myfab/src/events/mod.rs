//! Event dispatcher.
//!
//! An event binds a symbolic name to an ordered list of handlers.
//! Handlers are registered action names; triggering an event creates one
//! procedure with one job per handler and hands it to the executor.

pub mod error;

pub use error::Error;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::args::Args;
use crate::executor::{Executor, JobSpec, Procedure, Target};

/// An event. Only named events can be triggered from the wire layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    name: &'static str,
}

impl Event {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

// Extension points any installation may attach handlers to.
pub static SERVER_LOST: Lazy<Event> = Lazy::new(|| Event::new("SERVER_LOST"));
pub static SERVER_PROMOTED: Lazy<Event> = Lazy::new(|| Event::new("SERVER_PROMOTED"));
pub static SERVER_DEMOTED: Lazy<Event> = Lazy::new(|| Event::new("SERVER_DEMOTED"));

#[derive(Default)]
struct Registry {
    handlers: HashMap<String, Vec<String>>,
}

/// Maps events to their handler chains and turns triggers into
/// procedures.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<RwLock<Registry>>,
    executor: Executor,
}

impl Dispatcher {
    pub fn new(executor: Executor) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Registry::default())),
            executor,
        }
    }

    /// Attach a handler to an event. Handlers run in registration order.
    pub fn register(&self, event: &Event, handler: &str) -> Result<(), Error> {
        if !self.executor.registry().is_registered(handler) {
            return Err(Error::UnknownHandler(handler.into()));
        }

        let mut inner = self.inner.write();
        let handlers = inner.handlers.entry(event.name().into()).or_default();
        if handlers.iter().any(|registered| registered == handler) {
            return Err(Error::DuplicateHandler(event.name().into(), handler.into()));
        }

        debug!("registering handler `{}` for event `{}`", handler, event.name());
        handlers.push(handler.into());
        Ok(())
    }

    pub fn unregister(&self, event: &Event, handler: &str) -> Result<(), Error> {
        let mut inner = self.inner.write();
        let handlers = inner
            .handlers
            .get_mut(event.name())
            .ok_or_else(|| Error::UnknownEvent(event.name().into()))?;

        let before = handlers.len();
        handlers.retain(|registered| registered != handler);
        if handlers.len() == before {
            return Err(Error::NotRegistered(event.name().into(), handler.into()));
        }
        Ok(())
    }

    pub fn is_registered(&self, event: &Event, handler: &str) -> bool {
        self.inner
            .read()
            .handlers
            .get(event.name())
            .map(|handlers| handlers.iter().any(|registered| registered == handler))
            .unwrap_or(false)
    }

    /// Trigger an event by instance.
    pub async fn trigger(
        &self,
        synchronous: bool,
        event: &Event,
        lockables: BTreeSet<String>,
        args: Args,
    ) -> Result<Vec<Arc<Procedure>>, Error> {
        self.trigger_by_name(synchronous, event.name(), lockables, args)
            .await
    }

    /// Trigger an event by name; the wire layer's entry point.
    pub async fn trigger_by_name(
        &self,
        synchronous: bool,
        event: &str,
        lockables: BTreeSet<String>,
        args: Args,
    ) -> Result<Vec<Arc<Procedure>>, Error> {
        self.trigger_inner(synchronous, event, lockables, args, false)
            .await
    }

    /// Priority trigger: the failure-recovery path. Jumps the waiting
    /// line in the lock manager.
    pub async fn trigger_priority(
        &self,
        event: &Event,
        lockables: BTreeSet<String>,
        args: Args,
    ) -> Result<Vec<Arc<Procedure>>, Error> {
        self.trigger_inner(false, event.name(), lockables, args, true)
            .await
    }

    async fn trigger_inner(
        &self,
        synchronous: bool,
        event: &str,
        lockables: BTreeSet<String>,
        args: Args,
        priority: bool,
    ) -> Result<Vec<Arc<Procedure>>, Error> {
        let handlers = {
            let inner = self.inner.read();
            match inner.handlers.get(event) {
                Some(handlers) => handlers.clone(),
                None => return Err(Error::UnknownEvent(event.into())),
            }
        };

        debug!("triggering event `{}` ({} handler(s))", event, handlers.len());
        if handlers.is_empty() {
            return Ok(Vec::new());
        }

        let specs = handlers
            .iter()
            .map(|handler| {
                JobSpec::named(
                    handler.clone(),
                    format!("Triggered by event ({}).", event),
                    args.clone(),
                )
            })
            .collect();

        let procedure = self
            .executor
            .enqueue_jobs(Target::New, specs, lockables, priority)
            .await?;

        if synchronous {
            self.executor.wait_for_procedure(&procedure).await?;
        }
        Ok(vec![procedure])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::args::Value;
    use crate::context::Context;
    use crate::executor::{FnAction, JobContext, Outcome};
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static TEST_EVENT: Lazy<Event> = Lazy::new(|| Event::new("TEST_EVENT"));

    fn noop(name: &str, ctx: &Context) {
        ctx.executor()
            .registry()
            .register(
                name,
                FnAction::new(|_ctx: &mut JobContext| async { Ok(Outcome::none()) }.boxed()),
                None,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn registration_laws() {
        let ctx = Context::ephemeral().await;
        let dispatcher = ctx.dispatcher();

        // Handlers must be registered actions.
        assert!(dispatcher.register(&TEST_EVENT, "test.missing").is_err());

        noop("test.first", &ctx);
        noop("test.second", &ctx);

        dispatcher.register(&TEST_EVENT, "test.first").unwrap();
        dispatcher.register(&TEST_EVENT, "test.second").unwrap();
        assert!(dispatcher.is_registered(&TEST_EVENT, "test.first"));

        // No duplicates.
        assert!(dispatcher.register(&TEST_EVENT, "test.first").is_err());

        dispatcher.unregister(&TEST_EVENT, "test.first").unwrap();
        assert!(!dispatcher.is_registered(&TEST_EVENT, "test.first"));
        assert!(dispatcher.unregister(&TEST_EVENT, "test.first").is_err());
    }

    #[tokio::test]
    async fn trigger_runs_handlers_in_registration_order() {
        let ctx = Context::ephemeral().await;
        let dispatcher = ctx.dispatcher();

        let counter = Arc::new(AtomicUsize::new(0));
        let first_saw = Arc::new(AtomicUsize::new(usize::MAX));
        let second_saw = Arc::new(AtomicUsize::new(usize::MAX));

        for (name, saw) in [("test.order_a", &first_saw), ("test.order_b", &second_saw)] {
            let counter = counter.clone();
            let saw = saw.clone();
            ctx.executor()
                .registry()
                .register(
                    name,
                    FnAction::new(move |job_ctx: &mut JobContext| {
                        let counter = counter.clone();
                        let saw = saw.clone();
                        let arg = job_ctx.args.get(0).and_then(|v| Ok(v.as_str()?.to_string()));
                        async move {
                            assert_eq!(arg.unwrap(), "payload");
                            saw.store(counter.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
                            Ok(Outcome::none())
                        }
                        .boxed()
                    }),
                    None,
                )
                .unwrap();
        }

        dispatcher.register(&TEST_EVENT, "test.order_a").unwrap();
        dispatcher.register(&TEST_EVENT, "test.order_b").unwrap();

        let procedures = dispatcher
            .trigger(
                true,
                &TEST_EVENT,
                ["lock".to_string()].into_iter().collect(),
                Args::new().with("payload"),
            )
            .await
            .unwrap();

        assert_eq!(procedures.len(), 1);
        assert!(procedures[0].complete());
        assert_eq!(first_saw.load(Ordering::SeqCst), 0);
        assert_eq!(second_saw.load(Ordering::SeqCst), 1);

        // One job per handler, three statuses per job.
        assert_eq!(procedures[0].trail().len(), 6);
    }

    #[tokio::test]
    async fn unknown_event_errors() {
        let ctx = Context::ephemeral().await;
        let result = ctx
            .dispatcher()
            .trigger_by_name(false, "NO_SUCH_EVENT", BTreeSet::new(), Args::new())
            .await;
        assert!(matches!(result, Err(Error::UnknownEvent(_))));
    }

    #[tokio::test]
    async fn handler_result_lands_in_procedure() {
        let ctx = Context::ephemeral().await;
        let dispatcher = ctx.dispatcher();

        ctx.executor()
            .registry()
            .register(
                "test.answer",
                FnAction::new(|_ctx: &mut JobContext| {
                    async { Ok(Outcome::value(42i64)) }.boxed()
                }),
                None,
            )
            .unwrap();
        dispatcher.register(&TEST_EVENT, "test.answer").unwrap();

        let procedures = dispatcher
            .trigger(true, &TEST_EVENT, BTreeSet::new(), Args::new())
            .await
            .unwrap();
        assert_eq!(procedures[0].result(), Some(Value::Int(42)));
    }
}
