//! Service context: the wired-together daemon.
//!
//! Everything that used to be a process-wide singleton in systems like
//! this lives here as a value, so tests build as many contexts as they
//! like with stores of their choosing.

use std::sync::{Arc, Weak};

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use myfab_config::Config;

use crate::command::{self, CommandRegistry};
use crate::events::Dispatcher;
use crate::executor::{self, ActionRegistry, Executor, RecoveryReport};
use crate::failure::FailureDetector;
use crate::ha;
use crate::pool::ConnectionManager;
use crate::sharding::{MysqldumpSnapshotter, NullSnapshotter, Snapshotter};
use crate::store::StateStore;

#[derive(Debug, Error)]
pub enum Error {
    #[error("store: {0}")]
    Store(#[from] crate::store::Error),

    #[error("events: {0}")]
    Events(#[from] crate::events::Error),

    #[error("executor: {0}")]
    Executor(#[from] crate::executor::Error),

    #[error("command: {0}")]
    Command(#[from] crate::command::Error),

    #[error("server: {0}")]
    Server(#[from] crate::server::Error),
}

pub struct Context {
    self_ref: Weak<Context>,
    config: Config,
    store: StateStore,
    pool: ConnectionManager,
    registry: Arc<ActionRegistry>,
    dispatcher: Dispatcher,
    executor: Executor,
    detector: FailureDetector,
    commands: CommandRegistry,
    snapshotter: Arc<dyn Snapshotter>,
    fabric_uuid: Uuid,
}

impl Context {
    /// Build a context against the configured state store.
    pub fn new(config: Config) -> Result<Arc<Self>, Error> {
        let store = StateStore::from_config(&config.storage)?;
        let snapshotter = Arc::new(MysqldumpSnapshotter::new(
            std::env::temp_dir().join("myfab-backups"),
        ));
        Self::build(config, store, snapshotter)
    }

    /// Wire all services around the given store.
    pub fn build(
        config: Config,
        store: StateStore,
        snapshotter: Arc<dyn Snapshotter>,
    ) -> Result<Arc<Self>, Error> {
        let registry = Arc::new(ActionRegistry::new());
        let executor = Executor::new(store.clone(), registry.clone(), config.executor.executors);
        let dispatcher = Dispatcher::new(executor.clone());
        let detector = FailureDetector::new(config.failure_tracking.clone());
        let commands = CommandRegistry::new();

        // Handlers register before anything can trigger or recover.
        ha::register(&registry, &dispatcher)?;
        crate::sharding::actions::register(&registry, &dispatcher)?;
        command::register_all(&commands)?;

        Ok(Arc::new_cyclic(|self_ref| Context {
            self_ref: self_ref.clone(),
            config,
            store,
            pool: ConnectionManager::new(),
            registry,
            dispatcher,
            executor,
            detector,
            commands,
            snapshotter,
            fabric_uuid: Uuid::new_v4(),
        }))
    }

    /// A context with no backing store, executor running. What most
    /// tests want.
    pub async fn ephemeral() -> Arc<Self> {
        let ctx = Self::ephemeral_stopped().await;
        ctx.executor
            .start(&ctx)
            .expect("fresh executor cannot already be running");
        ctx
    }

    /// A context with no backing store and no workers.
    pub async fn ephemeral_stopped() -> Arc<Self> {
        Self::build(
            Config::default(),
            StateStore::ephemeral(),
            Arc::new(NullSnapshotter),
        )
        .expect("registration over fresh registries cannot collide")
    }

    /// Bring the daemon up: workers, crash recovery, failure detection.
    pub async fn start(self: &Arc<Self>) -> Result<RecoveryReport, Error> {
        self.executor.start(self)?;
        let report = executor::recover(&self.executor).await?;
        self.detector.start(self).await?;
        info!("myfab ({}) is up", self.fabric_uuid);
        Ok(report)
    }

    pub async fn shutdown(&self) {
        self.detector.shutdown();
        self.executor.shutdown().await;
        info!("myfab ({}) has shut down", self.fabric_uuid);
    }

    /// Strong handle to this context, for background tasks. `None` only
    /// while the last reference is being dropped.
    pub fn shared(&self) -> Option<Arc<Context>> {
        self.self_ref.upgrade()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn pool(&self) -> &ConnectionManager {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn detector(&self) -> &FailureDetector {
        &self.detector
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn snapshotter(&self) -> &Arc<dyn Snapshotter> {
        &self.snapshotter
    }

    /// This daemon's stable identity, the header of every response.
    pub fn fabric_uuid(&self) -> Uuid {
        self.fabric_uuid
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::args::Args;

    #[tokio::test]
    async fn core_handlers_are_wired() {
        let ctx = Context::ephemeral().await;
        assert!(ctx.registry().is_registered("ha.promote"));
        assert!(ctx.registry().is_registered("sharding.define_mapping"));
        let commands = ctx.commands().list();
        assert!(commands.contains(&("group".to_string(), "promote".to_string())));
        assert!(commands.contains(&("threat".to_string(), "report_failure".to_string())));
    }

    #[tokio::test]
    async fn unknown_command_lands_in_error_field() {
        let ctx = Context::ephemeral().await;
        let response = ctx
            .commands()
            .dispatch(&ctx, "group", "no_such_command", Args::new())
            .await;
        assert!(response.error.as_deref().unwrap_or_default().contains("unknown"));
        assert_eq!(response.fabric_uuid, ctx.fabric_uuid());
    }
}
