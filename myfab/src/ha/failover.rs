//! Failover: replace a failed primary.
//!
//! Priority-enqueued by the failure detector (which has already broken
//! conflicting procedures). The failed server is fenced off, the most
//! caught-up secondary takes over through the promote tail.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::args::{Args, Value};
use crate::executor::{Action, JobContext, JobError, JobSpec, Outcome};
use crate::replication::{self, GtidSet};
use crate::server::{Error as ServerError, Group, Server, ServerMode, ServerStatus};

use super::candidate::{choose_failover, Candidate};

pub struct Failover;

#[async_trait]
impl Action for Failover {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let group_id = job.args.get(0)?.as_str()?.to_string();
        let failed = match job.args.get(1) {
            Ok(value) if !value.is_null() => Some(value.as_uuid()?),
            _ => None,
        };

        let group = Group::require(job.persister, &group_id).await?;
        let failed = failed
            .or(group.master)
            .ok_or_else(|| ServerError::NoPrimary(group_id.clone()))?;

        // Fence the failed server.
        if let Some(server) = Server::fetch(job.persister, failed).await? {
            Server::update_role(
                job.persister,
                failed,
                ServerMode::Offline,
                ServerStatus::Faulty,
            )
            .await?;
            if let Err(err) = job.ctx.pool().purge(&server).await {
                warn!("could not purge connections of ({}): {}", failed, err);
            }
        }
        if group.master == Some(failed) {
            Group::set_master(job.persister, &group_id, None).await?;
        }

        // The most caught-up alive secondary takes over.
        let members = Server::in_group(job.persister, &group_id).await?;
        let mut candidates = Vec::new();
        for member in &members {
            if member.status != ServerStatus::Secondary || member.uuid == failed {
                continue;
            }
            let Ok(mut conn) = job.ctx.pool().get(member).await else {
                continue;
            };
            if !conn.is_alive().await {
                continue;
            }
            let executed = replication::get_master_status(&mut conn)
                .await?
                .map(|status| status.executed_gtid_set)
                .unwrap_or_default();
            candidates.push(Candidate {
                uuid: member.uuid,
                weight: member.weight,
                executed: GtidSet::parse(&executed)?,
            });
        }

        let candidate = choose_failover(&candidates)
            .ok_or_else(|| JobError::msg("no secondary is alive to fail over to"))?;

        info!(
            "failing group ({}) over from ({}) to ({})",
            group_id, failed, candidate
        );
        Ok(Outcome::none().then(JobSpec::named(
            "ha.promote_switch",
            "Switching the group over to the failover candidate.",
            Args::new()
                .with(group_id.as_str())
                .with(candidate)
                .with(Value::Null),
        )))
    }
}
