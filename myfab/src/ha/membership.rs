//! Adding and removing servers.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::executor::{Action, JobContext, JobError, Outcome};
use crate::replication::{self, ALL_THREADS};
use crate::server::{
    Error as ServerError, ErrorLog, Group, Server, ServerConnection, ServerMode, ServerStatus,
    REQUIRED_PRIVILEGES,
};

use super::{find_primary, RPL_TIMEOUT};

pub struct AddServer;

#[async_trait]
impl Action for AddServer {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let group_id = job.args.get(0)?.as_str()?.to_string();
        let address = job.args.get(1)?.as_str()?.to_string();
        let user = job.args.get(2)?.as_str()?.to_string();
        let password = job.args.get(3)?.as_str()?.to_string();

        Group::require(job.persister, &group_id).await?;

        // Identity first: the server names itself.
        let mut conn = ServerConnection::connect(&address, &user, &password).await?;
        let uuid = conn.server_uuid().await?;

        if Server::fetch(job.persister, uuid).await?.is_some() {
            conn.disconnect().await;
            return Err(ServerError::ServerExists(uuid, group_id).into());
        }

        if !conn.has_privileges(REQUIRED_PRIVILEGES).await? {
            conn.disconnect().await;
            return Err(ServerError::MissingPrivileges {
                user,
                missing: REQUIRED_PRIVILEGES.join(", "),
            }
            .into());
        }

        let mut server = Server::new(uuid, &address, &user, &password);
        server.group_id = Some(group_id.clone());
        server.mode = ServerMode::ReadOnly;
        server.status = ServerStatus::Secondary;
        Server::add(job.persister, &server).await?;

        // Start replicating from the current primary, when there is one.
        if let Some(primary) = find_primary(job.persister, &group_id).await? {
            conn.set_read_only(true).await?;
            replication::switch_master(
                &mut conn,
                &primary,
                &primary.user,
                &primary.password,
                true,
                None,
                None,
            )
            .await?;
            replication::start_slave(&mut conn, ALL_THREADS, true, RPL_TIMEOUT).await?;
        }
        conn.disconnect().await;

        info!("added server ({}) to group ({})", uuid, group_id);
        Ok(Outcome::value(uuid))
    }
}

pub struct RemoveServer;

#[async_trait]
impl Action for RemoveServer {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let group_id = job.args.get(0)?.as_str()?.to_string();
        let uuid = job.args.get(1)?.as_uuid()?;

        let group = Group::require(job.persister, &group_id).await?;
        if !Group::contains_server(job.persister, &group_id, uuid).await? {
            return Err(ServerError::NotAMember(group_id, uuid).into());
        }
        if group.master == Some(uuid) {
            return Err(ServerError::IsPrimary(uuid, group_id).into());
        }

        let server = Server::fetch(job.persister, uuid)
            .await?
            .ok_or(ServerError::ServerNotFound(uuid))?;

        // Tear replication down politely; a dead server is removed
        // anyway.
        match ServerConnection::connect(&server.address, &server.user, &server.password).await
        {
            Ok(mut conn) => {
                let _ = replication::stop_slave(&mut conn, ALL_THREADS, true, RPL_TIMEOUT).await;
                let _ = replication::reset_slave(&mut conn, true).await;
                conn.disconnect().await;
            }
            Err(err) => {
                warn!("removing unreachable server ({}): {}", uuid, err);
            }
        }

        Server::remove(job.persister, uuid).await?;
        ErrorLog::remove(job.persister, uuid).await?;
        job.ctx.pool().purge(&server).await?;

        info!("removed server ({}) from group ({})", uuid, group_id);
        Ok(Outcome::none())
    }
}
