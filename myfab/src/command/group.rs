//! `group.*`: group administration and high availability.

use std::sync::Arc;

use async_trait::async_trait;

use crate::args::{Args, Value};
use crate::context::Context;
use crate::ha;
use crate::server::{Group, Server};

use super::{lockset, trigger_command, Command, CommandRegistry, CommandResult, Error, ResultSet};

pub fn register(registry: &CommandRegistry) -> Result<(), Error> {
    registry.register(Arc::new(Create))?;
    registry.register(Arc::new(Update))?;
    registry.register(Arc::new(Destroy))?;
    registry.register(Arc::new(Activate))?;
    registry.register(Arc::new(Deactivate))?;
    registry.register(Arc::new(Promote))?;
    registry.register(Arc::new(Demote))?;
    registry.register(Arc::new(Add))?;
    registry.register(Arc::new(Remove))?;
    registry.register(Arc::new(LookupGroups))?;
    registry.register(Arc::new(LookupServers))?;
    registry.register(Arc::new(LookupUuid))?;
    Ok(())
}

macro_rules! group_command {
    ($kind:ident, $name:literal, $event:expr) => {
        pub struct $kind;

        #[async_trait]
        impl Command for $kind {
            fn group(&self) -> &'static str {
                "group"
            }

            fn name(&self) -> &'static str {
                $name
            }

            async fn execute(&self, ctx: &Context, args: Args) -> Result<CommandResult, Error> {
                let group_id = args.get(0)?.as_str()?.to_string();
                trigger_command(ctx, $event, lockset(&[&group_id]), args).await
            }
        }
    };
}

group_command!(Create, "create", &ha::GROUP_CREATE);
group_command!(Update, "update", &ha::GROUP_UPDATE);
group_command!(Destroy, "destroy", &ha::GROUP_DESTROY);
group_command!(Activate, "activate", &ha::GROUP_ACTIVATE);
group_command!(Deactivate, "deactivate", &ha::GROUP_DEACTIVATE);
group_command!(Promote, "promote", &ha::GROUP_PROMOTE);
group_command!(Demote, "demote", &ha::GROUP_DEMOTE);
group_command!(Add, "add", &ha::SERVER_ADD);
group_command!(Remove, "remove", &ha::SERVER_REMOVE);

pub struct LookupGroups;

#[async_trait]
impl Command for LookupGroups {
    fn group(&self) -> &'static str {
        "group"
    }

    fn name(&self) -> &'static str {
        "lookup_groups"
    }

    async fn execute(&self, ctx: &Context, _args: Args) -> Result<CommandResult, Error> {
        let mut persister = ctx.store().connect().await?;
        let groups = Group::groups(&mut persister).await?;

        let mut set = ResultSet::new(&["group_id", "description", "master_uuid", "active"]);
        for group in groups {
            set.push(vec![
                Value::Str(group.group_id),
                Value::from(group.description),
                Value::from(group.master),
                Value::Bool(group.active),
            ]);
        }
        Ok(CommandResult::single(set))
    }
}

pub struct LookupServers;

#[async_trait]
impl Command for LookupServers {
    fn group(&self) -> &'static str {
        "group"
    }

    fn name(&self) -> &'static str {
        "lookup_servers"
    }

    async fn execute(&self, ctx: &Context, args: Args) -> Result<CommandResult, Error> {
        let group_id = args.get(0)?.as_str()?.to_string();

        let mut persister = ctx.store().connect().await?;
        let group = Group::require(&mut persister, &group_id).await?;
        let servers = Server::in_group(&mut persister, &group_id).await?;

        let mut set = ResultSet::new(&[
            "server_uuid",
            "address",
            "status",
            "mode",
            "weight",
            "is_master",
        ]);
        for server in servers {
            set.push(vec![
                Value::Uuid(server.uuid),
                Value::Str(server.address),
                Value::Str(server.status.as_str().into()),
                Value::Str(server.mode.as_str().into()),
                Value::Str(server.weight.to_string()),
                Value::Bool(group.master == Some(server.uuid)),
            ]);
        }
        Ok(CommandResult::single(set))
    }
}

pub struct LookupUuid;

#[async_trait]
impl Command for LookupUuid {
    fn group(&self) -> &'static str {
        "group"
    }

    fn name(&self) -> &'static str {
        "lookup_uuid"
    }

    async fn execute(&self, _ctx: &Context, args: Args) -> Result<CommandResult, Error> {
        let address = args.get(0)?.as_str()?.to_string();
        let user = args.get(1)?.as_str()?.to_string();
        let password = args.get(2)?.as_str()?.to_string();

        let uuid = Server::discover_uuid(&address, &user, &password).await?;
        Ok(CommandResult::single(
            ResultSet::new(&["uuid"]).row(vec![Value::Uuid(uuid)]),
        ))
    }
}
