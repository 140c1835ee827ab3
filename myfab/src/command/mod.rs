//! Command registry.
//!
//! The wire layers map `group.command(args…)` calls onto this registry.
//! A command either answers synchronously from the state store or
//! triggers an event, returning the resulting procedure's description.

pub mod error;
pub mod group;
pub mod manage;
pub mod response;
pub mod sharding;
pub mod threat;

pub use error::Error;
pub use response::{procedure_result_set, CommandResult, FabricResponse, ResultSet};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::args::Args;
use crate::context::Context;
use crate::events::Event;
use crate::executor::Procedure;

#[async_trait]
pub trait Command: Send + Sync {
    /// Command group, e.g. `group`, `sharding`, `threat`.
    fn group(&self) -> &'static str;
    fn name(&self) -> &'static str;
    async fn execute(&self, ctx: &Context, args: Args) -> Result<CommandResult, Error>;
}

#[derive(Default)]
pub struct CommandRegistry {
    inner: RwLock<BTreeMap<String, Arc<dyn Command>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, command: Arc<dyn Command>) -> Result<(), Error> {
        let key = format!("{}.{}", command.group(), command.name());
        let mut inner = self.inner.write();
        if inner.contains_key(&key) {
            return Err(Error::DuplicateCommand(key));
        }
        inner.insert(key, command);
        Ok(())
    }

    /// Registered `(group, name)` pairs, sorted. What
    /// `INFORMATION_SCHEMA.ROUTINES` and `SHOW CREATE PROCEDURE` list.
    pub fn list(&self) -> Vec<(String, String)> {
        self.inner
            .read()
            .values()
            .map(|command| (command.group().to_string(), command.name().to_string()))
            .collect()
    }

    /// Execute a command, folding failures into the response's error
    /// field (its last line, per the wire contract).
    pub async fn dispatch(
        &self,
        ctx: &Context,
        group: &str,
        name: &str,
        args: Args,
    ) -> FabricResponse {
        let key = format!("{}.{}", group, name);
        debug!("dispatching command `{}`", key);

        let command = { self.inner.read().get(&key).cloned() };
        let result = match command {
            Some(command) => command.execute(ctx, args).await,
            None => Err(Error::UnknownCommand(key)),
        };

        match result {
            Ok(result) => FabricResponse {
                fabric_uuid: ctx.fabric_uuid(),
                ttl: ctx.config().protocol.mysql.ttl,
                error: None,
                results: result.results,
            },
            Err(err) => {
                let message = err.to_string();
                let last_line = message.lines().last().unwrap_or_default().to_string();
                FabricResponse {
                    fabric_uuid: ctx.fabric_uuid(),
                    ttl: ctx.config().protocol.mysql.ttl,
                    error: Some(last_line),
                    results: Vec::new(),
                }
            }
        }
    }
}

/// Trigger `event` and package the procedure as a command result.
/// `synchronous` comes from the caller's keyword argument and defaults
/// to true.
pub(crate) async fn trigger_command(
    ctx: &Context,
    event: &Event,
    lockables: BTreeSet<String>,
    args: Args,
) -> Result<CommandResult, Error> {
    let synchronous = args
        .kw("synchronous")
        .map(|value| value.as_bool())
        .transpose()?
        .unwrap_or(true);

    let procedures: Vec<Arc<Procedure>> = ctx
        .dispatcher()
        .trigger(synchronous, event, lockables, args)
        .await?;
    Ok(CommandResult::single(procedure_result_set(&procedures)))
}

pub(crate) fn lockset(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Install the full command set.
pub fn register_all(registry: &CommandRegistry) -> Result<(), Error> {
    group::register(registry)?;
    sharding::register(registry)?;
    threat::register(registry)?;
    manage::register(registry)?;
    Ok(())
}
