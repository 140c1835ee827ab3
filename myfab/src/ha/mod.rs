//! High-availability procedures: group administration, role changes,
//! failover, membership.
//!
//! Every mutating operation is an action scheduled through the executor
//! under the group's lockable name. Multi-step operations chain their
//! jobs so each step commits (and checkpoints) before the next starts.

pub mod candidate;
pub mod demote;
pub mod failover;
pub mod group;
pub mod membership;
pub mod promote;

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use uuid::Uuid;

use crate::events::{Dispatcher, Event};
use crate::executor::{ActionRegistry, JobError};
use crate::pool::ConnectionManager;
use crate::server::{Server, ServerStatus};
use crate::store::Persister;

/// Replication waits during role changes.
pub const RPL_TIMEOUT: Duration = Duration::from_secs(30);

pub static GROUP_CREATE: Lazy<Event> = Lazy::new(|| Event::new("GROUP_CREATE"));
pub static GROUP_UPDATE: Lazy<Event> = Lazy::new(|| Event::new("GROUP_UPDATE"));
pub static GROUP_DESTROY: Lazy<Event> = Lazy::new(|| Event::new("GROUP_DESTROY"));
pub static GROUP_ACTIVATE: Lazy<Event> = Lazy::new(|| Event::new("GROUP_ACTIVATE"));
pub static GROUP_DEACTIVATE: Lazy<Event> = Lazy::new(|| Event::new("GROUP_DEACTIVATE"));
pub static GROUP_PROMOTE: Lazy<Event> = Lazy::new(|| Event::new("GROUP_PROMOTE"));
pub static GROUP_DEMOTE: Lazy<Event> = Lazy::new(|| Event::new("GROUP_DEMOTE"));
pub static GROUP_FAILOVER: Lazy<Event> = Lazy::new(|| Event::new("GROUP_FAILOVER"));
pub static SERVER_ADD: Lazy<Event> = Lazy::new(|| Event::new("SERVER_ADD"));
pub static SERVER_REMOVE: Lazy<Event> = Lazy::new(|| Event::new("SERVER_REMOVE"));

/// Register every HA action and bind it to its event.
pub fn register(registry: &ActionRegistry, dispatcher: &Dispatcher) -> Result<(), crate::events::Error> {
    registry.register("ha.group_create", Arc::new(group::GroupCreate), None)?;
    registry.register("ha.group_update", Arc::new(group::GroupUpdate), None)?;
    registry.register("ha.group_destroy", Arc::new(group::GroupDestroy), None)?;
    registry.register("ha.group_activate", Arc::new(group::GroupActivate), None)?;
    registry.register("ha.group_deactivate", Arc::new(group::GroupDeactivate), None)?;

    registry.register("ha.server_add", Arc::new(membership::AddServer), None)?;
    registry.register("ha.server_remove", Arc::new(membership::RemoveServer), None)?;

    registry.register("ha.promote", Arc::new(promote::Promote), None)?;
    registry.register(
        "ha.promote_switch",
        Arc::new(promote::PromoteSwitch),
        Some(Arc::new(promote::PromoteRestore)),
    )?;
    registry.register("ha.promote_rejoin", Arc::new(promote::PromoteRejoin), None)?;

    registry.register("ha.demote", Arc::new(demote::Demote), None)?;
    registry.register("ha.demote_wait", Arc::new(demote::DemoteWait), None)?;

    registry.register("ha.failover", Arc::new(failover::Failover), None)?;

    dispatcher.register(&GROUP_CREATE, "ha.group_create")?;
    dispatcher.register(&GROUP_UPDATE, "ha.group_update")?;
    dispatcher.register(&GROUP_DESTROY, "ha.group_destroy")?;
    dispatcher.register(&GROUP_ACTIVATE, "ha.group_activate")?;
    dispatcher.register(&GROUP_DEACTIVATE, "ha.group_deactivate")?;
    dispatcher.register(&GROUP_PROMOTE, "ha.promote")?;
    dispatcher.register(&GROUP_DEMOTE, "ha.demote")?;
    dispatcher.register(&GROUP_FAILOVER, "ha.failover")?;
    dispatcher.register(&SERVER_ADD, "ha.server_add")?;
    dispatcher.register(&SERVER_REMOVE, "ha.server_remove")?;
    Ok(())
}

/// Group member with PRIMARY status, if any.
pub(crate) async fn find_primary(
    persister: &mut Persister,
    group_id: &str,
) -> Result<Option<Server>, crate::server::Error> {
    let members = Server::in_group(persister, group_id).await?;
    Ok(members
        .into_iter()
        .find(|server| server.status == ServerStatus::Primary))
}

/// Members that should replicate from the primary: everyone active
/// except the primary itself and faulty or spare servers.
pub(crate) fn replicating_members(members: &[Server], primary: Uuid) -> Vec<&Server> {
    members
        .iter()
        .filter(|server| {
            server.uuid != primary
                && matches!(
                    server.status,
                    ServerStatus::Secondary | ServerStatus::Primary
                )
        })
        .collect()
}

/// A connection to a member, by way of the pool.
pub(crate) async fn member_connection(
    pool: &ConnectionManager,
    server: &Server,
) -> Result<crate::pool::Guard, JobError> {
    Ok(pool.get(server).await?)
}
