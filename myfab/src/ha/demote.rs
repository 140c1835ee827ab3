//! Demote: retire the primary without appointing a successor.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::args::Args;
use crate::executor::{Action, JobContext, JobError, JobSpec, Outcome};
use crate::replication::{self, ALL_THREADS};
use crate::server::{Error as ServerError, Group, Server, ServerMode, ServerStatus};

use super::{member_connection, replicating_members, RPL_TIMEOUT};

pub struct Demote;

#[async_trait]
impl Action for Demote {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let group_id = job.args.get(0)?.as_str()?.to_string();
        let update_only = job
            .args
            .kw("update_only")
            .map(|value| value.as_bool())
            .transpose()?
            .unwrap_or(false);

        let group = Group::require(job.persister, &group_id).await?;
        let primary_uuid = group
            .master
            .ok_or_else(|| ServerError::NoPrimary(group_id.clone()))?;
        let primary = Server::fetch(job.persister, primary_uuid)
            .await?
            .ok_or(ServerError::ServerNotFound(primary_uuid))?;

        if update_only {
            Server::update_role(
                job.persister,
                primary_uuid,
                ServerMode::ReadOnly,
                ServerStatus::Secondary,
            )
            .await?;
            Group::set_master(job.persister, &group_id, None).await?;
            return Ok(Outcome::none());
        }

        // Stop writes, note where the binary log ends; the second job
        // waits for the slaves to get there.
        let (file, position) = {
            let mut conn = member_connection(job.ctx.pool(), &primary).await?;
            conn.set_read_only(true).await?;
            match replication::get_master_status(&mut conn).await? {
                Some(status) => (status.file, status.position),
                None => (String::new(), 0),
            }
        };

        info!("demoting primary ({}) of group ({})", primary_uuid, group_id);
        Ok(Outcome::none().then(JobSpec::named(
            "ha.demote_wait",
            "Waiting for the slaves to drain, then stopping them.",
            Args::new()
                .with(group_id.as_str())
                .with(primary_uuid)
                .with(file.as_str())
                .with(position as i64),
        )))
    }
}

pub struct DemoteWait;

#[async_trait]
impl Action for DemoteWait {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let group_id = job.args.get(0)?.as_str()?.to_string();
        let primary_uuid = job.args.get(1)?.as_uuid()?;
        let file = job.args.get(2)?.as_str()?.to_string();
        let position = job.args.get(3)?.as_int()? as u64;

        let members = Server::in_group(job.persister, &group_id).await?;
        for member in replicating_members(&members, primary_uuid) {
            let mut conn = match member_connection(job.ctx.pool(), member).await {
                Ok(conn) => conn,
                Err(err) => {
                    warn!("skipping unreachable member ({}): {}", member.uuid, err);
                    continue;
                }
            };
            if !file.is_empty() {
                if let Err(err) =
                    replication::wait_for_slave(&mut conn, &file, position, RPL_TIMEOUT).await
                {
                    warn!(
                        "member ({}) did not reach the primary's position: {}",
                        member.uuid, err
                    );
                }
            }
            replication::stop_slave(&mut conn, ALL_THREADS, true, RPL_TIMEOUT).await?;
        }

        Server::update_role(
            job.persister,
            primary_uuid,
            ServerMode::ReadOnly,
            ServerStatus::Secondary,
        )
        .await?;
        Group::set_master(job.persister, &group_id, None).await?;

        info!("group ({}) has no primary now", group_id);
        Ok(Outcome::none())
    }
}
