//! `threat.*`: application-side failure reports.
//!
//! These run synchronously rather than as procedures: a report must
//! never queue behind the long-running procedure it is about to break.

use std::sync::Arc;

use async_trait::async_trait;

use crate::args::{Args, Value};
use crate::context::Context;
use crate::failure::escalate;
use crate::server::{Error as ServerError, ErrorLog, Server};

use super::{Command, CommandRegistry, CommandResult, Error, ResultSet};

pub fn register(registry: &CommandRegistry) -> Result<(), Error> {
    registry.register(Arc::new(ReportError))?;
    registry.register(Arc::new(ReportFailure))?;
    Ok(())
}

fn reporter_arg(args: &Args) -> Result<String, Error> {
    Ok(match args.get(1) {
        Ok(value) if !value.is_null() => value.as_str()?.to_string(),
        _ => "unknown".to_string(),
    })
}

fn marked(uuid: uuid::Uuid, faulty: bool) -> CommandResult {
    CommandResult::single(
        ResultSet::new(&["server_uuid", "faulty"])
            .row(vec![Value::Uuid(uuid), Value::Bool(faulty)]),
    )
}

/// A client saw an error against a server. Contributes to the
/// escalation thresholds only.
pub struct ReportError;

#[async_trait]
impl Command for ReportError {
    fn group(&self) -> &'static str {
        "threat"
    }

    fn name(&self) -> &'static str {
        "report_error"
    }

    async fn execute(&self, ctx: &Context, args: Args) -> Result<CommandResult, Error> {
        let uuid = args.get(0)?.as_uuid()?;
        let reporter = reporter_arg(&args)?;
        let message = match args.get(2) {
            Ok(value) if !value.is_null() => value.as_str()?.to_string(),
            _ => "reported error".to_string(),
        };

        let mut persister = ctx.store().connect().await?;
        let server = Server::fetch(&mut persister, uuid)
            .await?
            .ok_or(ServerError::ServerNotFound(uuid))?;

        ErrorLog::add(&mut persister, uuid, &reporter, &message).await?;

        let config = &ctx.config().failure_tracking;
        let window =
            ErrorLog::window(&mut persister, uuid, config.notification_interval).await?;
        let faulty = window.exceeds(config.notifications, config.notification_clients);
        if faulty {
            escalate(ctx, &mut persister, &server).await?;
        }
        Ok(marked(uuid, faulty))
    }
}

/// A client declares a server dead. Marks it faulty immediately and,
/// when it was the primary, fails the group over with priority.
pub struct ReportFailure;

#[async_trait]
impl Command for ReportFailure {
    fn group(&self) -> &'static str {
        "threat"
    }

    fn name(&self) -> &'static str {
        "report_failure"
    }

    async fn execute(&self, ctx: &Context, args: Args) -> Result<CommandResult, Error> {
        let uuid = args.get(0)?.as_uuid()?;
        let reporter = reporter_arg(&args)?;

        let mut persister = ctx.store().connect().await?;
        let server = Server::fetch(&mut persister, uuid)
            .await?
            .ok_or(ServerError::ServerNotFound(uuid))?;

        ErrorLog::add(&mut persister, uuid, &reporter, "reported failure").await?;
        escalate(ctx, &mut persister, &server).await?;
        Ok(marked(uuid, true))
    }
}
