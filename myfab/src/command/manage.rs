//! `manage.*`: daemon introspection.

use std::sync::Arc;

use async_trait::async_trait;

use crate::args::{Args, Value};
use crate::context::Context;

use super::{Command, CommandRegistry, CommandResult, Error, ResultSet};

pub fn register(registry: &CommandRegistry) -> Result<(), Error> {
    registry.register(Arc::new(Ping))?;
    registry.register(Arc::new(LookupFabrics))?;
    Ok(())
}

pub struct Ping;

#[async_trait]
impl Command for Ping {
    fn group(&self) -> &'static str {
        "manage"
    }

    fn name(&self) -> &'static str {
        "ping"
    }

    async fn execute(&self, _ctx: &Context, _args: Args) -> Result<CommandResult, Error> {
        Ok(CommandResult::single(
            ResultSet::new(&["message"]).row(vec![Value::Str("pong".into())]),
        ))
    }
}

/// The addresses clients may cache for this daemon.
pub struct LookupFabrics;

#[async_trait]
impl Command for LookupFabrics {
    fn group(&self) -> &'static str {
        "manage"
    }

    fn name(&self) -> &'static str {
        "lookup_fabrics"
    }

    async fn execute(&self, ctx: &Context, _args: Args) -> Result<CommandResult, Error> {
        let protocol = &ctx.config().protocol;
        Ok(CommandResult::single(
            ResultSet::new(&["protocol", "address"])
                .row(vec![
                    Value::Str("xmlrpc".into()),
                    Value::Str(protocol.xmlrpc.address.clone()),
                ])
                .row(vec![
                    Value::Str("mysql".into()),
                    Value::Str(protocol.mysql.address.clone()),
                ]),
        ))
    }
}
