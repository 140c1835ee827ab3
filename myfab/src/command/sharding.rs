//! `sharding.*`: mapping definition, shard maintenance, lookups.

use std::sync::Arc;

use async_trait::async_trait;

use crate::args::{Args, Value};
use crate::context::Context;
use crate::sharding::{self, actions, LookupHint, ShardMapping, ShardTable};

use super::{lockset, trigger_command, Command, CommandRegistry, CommandResult, Error, ResultSet};

pub fn register(registry: &CommandRegistry) -> Result<(), Error> {
    registry.register(Arc::new(DefineMapping))?;
    registry.register(Arc::new(AddTable))?;
    registry.register(Arc::new(RemoveTable))?;
    registry.register(Arc::new(AddShard))?;
    registry.register(Arc::new(EnableShard))?;
    registry.register(Arc::new(DisableShard))?;
    registry.register(Arc::new(PruneShard))?;
    registry.register(Arc::new(SplitShard))?;
    registry.register(Arc::new(MoveShard))?;
    registry.register(Arc::new(ListMappings))?;
    registry.register(Arc::new(LookupTable))?;
    registry.register(Arc::new(LookupServers))?;
    Ok(())
}

/// Shard DDL serializes under one token; concurrent splits of unrelated
/// mappings are rare enough not to matter.
const SHARDING_LOCK: &str = "sharding";

macro_rules! sharding_command {
    ($kind:ident, $name:literal, $event:expr) => {
        pub struct $kind;

        #[async_trait]
        impl Command for $kind {
            fn group(&self) -> &'static str {
                "sharding"
            }

            fn name(&self) -> &'static str {
                $name
            }

            async fn execute(&self, ctx: &Context, args: Args) -> Result<CommandResult, Error> {
                trigger_command(ctx, $event, lockset(&[SHARDING_LOCK]), args).await
            }
        }
    };
}

sharding_command!(DefineMapping, "define", &actions::SHARDING_DEFINE);
sharding_command!(AddTable, "add_table", &actions::SHARDING_ADD_TABLE);
sharding_command!(RemoveTable, "remove_table", &actions::SHARDING_REMOVE_TABLE);
sharding_command!(AddShard, "add_shard", &actions::SHARDING_ADD_SHARD);
sharding_command!(EnableShard, "enable_shard", &actions::SHARDING_ENABLE_SHARD);
sharding_command!(DisableShard, "disable_shard", &actions::SHARDING_DISABLE_SHARD);
sharding_command!(PruneShard, "prune_shard", &actions::SHARDING_PRUNE);

pub struct SplitShard;

#[async_trait]
impl Command for SplitShard {
    fn group(&self) -> &'static str {
        "sharding"
    }

    fn name(&self) -> &'static str {
        "split_shard"
    }

    async fn execute(&self, ctx: &Context, args: Args) -> Result<CommandResult, Error> {
        let destination = args.get(1)?.as_str()?.to_string();
        trigger_command(
            ctx,
            &actions::SHARDING_SPLIT,
            lockset(&[SHARDING_LOCK, &destination]),
            args,
        )
        .await
    }
}

pub struct MoveShard;

#[async_trait]
impl Command for MoveShard {
    fn group(&self) -> &'static str {
        "sharding"
    }

    fn name(&self) -> &'static str {
        "move_shard"
    }

    async fn execute(&self, ctx: &Context, args: Args) -> Result<CommandResult, Error> {
        let destination = args.get(1)?.as_str()?.to_string();
        let args = args.with_kw("move", true);
        trigger_command(
            ctx,
            &actions::SHARDING_MOVE,
            lockset(&[SHARDING_LOCK, &destination]),
            args,
        )
        .await
    }
}

pub struct ListMappings;

#[async_trait]
impl Command for ListMappings {
    fn group(&self) -> &'static str {
        "sharding"
    }

    fn name(&self) -> &'static str {
        "list_definitions"
    }

    async fn execute(&self, ctx: &Context, _args: Args) -> Result<CommandResult, Error> {
        let mut persister = ctx.store().connect().await?;
        let mappings = ShardMapping::list(&mut persister).await?;

        let mut set = ResultSet::new(&["mapping_id", "type_name", "global_group_id"]);
        for mapping in mappings {
            set.push(vec![
                Value::from(mapping.shard_mapping_id),
                Value::Str(mapping.type_name.as_str().into()),
                Value::Str(mapping.global_group_id),
            ]);
        }
        Ok(CommandResult::single(set))
    }
}

pub struct LookupTable;

#[async_trait]
impl Command for LookupTable {
    fn group(&self) -> &'static str {
        "sharding"
    }

    fn name(&self) -> &'static str {
        "lookup_table"
    }

    async fn execute(&self, ctx: &Context, args: Args) -> Result<CommandResult, Error> {
        let table_name = args.get(0)?.as_str()?.to_string();

        let mut persister = ctx.store().connect().await?;
        let table = ShardTable::require(&mut persister, &table_name).await?;
        let mapping = ShardMapping::require(&mut persister, table.shard_mapping_id).await?;

        Ok(CommandResult::single(
            ResultSet::new(&[
                "mapping_id",
                "table_name",
                "column_name",
                "type_name",
                "global_group_id",
            ])
            .row(vec![
                Value::from(table.shard_mapping_id),
                Value::Str(table.table_name),
                Value::Str(table.column_name),
                Value::Str(mapping.type_name.as_str().into()),
                Value::Str(mapping.global_group_id),
            ]),
        ))
    }
}

/// Route a key to its shard's servers. The command applications hit on
/// every cache miss.
pub struct LookupServers;

#[async_trait]
impl Command for LookupServers {
    fn group(&self) -> &'static str {
        "sharding"
    }

    fn name(&self) -> &'static str {
        "lookup_servers"
    }

    async fn execute(&self, ctx: &Context, args: Args) -> Result<CommandResult, Error> {
        let table_name = args.get(0)?.as_str()?.to_string();
        let key = args.get(1)?;
        let key = match key {
            Value::Str(key) => key.clone(),
            Value::Int(key) => key.to_string(),
            other => other.as_str()?.to_string(),
        };
        let hint = match args.get(2) {
            Ok(value) if !value.is_null() => match value.as_str()?.to_uppercase().as_str() {
                "GLOBAL" => LookupHint::Global,
                _ => LookupHint::Local,
            },
            _ => LookupHint::Local,
        };

        let mut persister = ctx.store().connect().await?;
        let lookup = sharding::lookup(&mut persister, &table_name, &key, hint).await?;

        let mut set = ResultSet::new(&[
            "server_uuid",
            "address",
            "status",
            "mode",
            "shard_id",
            "group_id",
            "no_primary",
        ]);
        for server in &lookup.servers {
            set.push(vec![
                Value::Uuid(server.uuid),
                Value::Str(server.address.clone()),
                Value::Str(server.status.as_str().into()),
                Value::Str(server.mode.as_str().into()),
                Value::from(lookup.shard_id.map(|id| id as i64)),
                Value::Str(lookup.group_id.clone()),
                Value::Bool(lookup.no_primary),
            ]);
        }
        Ok(CommandResult::single(set))
    }
}
