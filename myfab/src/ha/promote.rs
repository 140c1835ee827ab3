//! Promote: appoint a new primary.
//!
//! Three chained jobs. The first validates the group and picks the
//! candidate, demoting the current primary to read-only; the second
//! performs the switch (the step carrying a compensation that restores
//! the previous primary pointer); the third re-points the remaining
//! members at the new primary.

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::args::{Args, Value};
use crate::executor::{Action, JobContext, JobError, JobSpec, Outcome};
use crate::replication::{self, GtidSet, ALL_THREADS};
use crate::server::{
    Error as ServerError, Group, Server, ServerMode, ServerStatus,
};

use super::candidate::{choose, Candidate};
use super::{member_connection, replicating_members, RPL_TIMEOUT};

pub struct Promote;

#[async_trait]
impl Action for Promote {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let group_id = job.args.get(0)?.as_str()?.to_string();
        let requested = match job.args.get(1) {
            Ok(value) if !value.is_null() => Some(value.as_uuid()?),
            _ => None,
        };
        let update_only = job
            .args
            .kw("update_only")
            .map(|value| value.as_bool())
            .transpose()?
            .unwrap_or(false);

        let group = Group::require(job.persister, &group_id).await?;
        let members = Server::in_group(job.persister, &group_id).await?;
        let old_primary = members
            .iter()
            .find(|server| server.status == ServerStatus::Primary)
            .cloned();

        if update_only {
            // Disaster recovery: rewrite the state store, touch no
            // server.
            let candidate = requested.ok_or_else(|| {
                JobError::msg("--update-only promote requires an explicit candidate")
            })?;
            if !Group::contains_server(job.persister, &group_id, candidate).await? {
                return Err(ServerError::NotAMember(group_id, candidate).into());
            }
            if let Some(old) = &old_primary {
                Server::update_role(
                    job.persister,
                    old.uuid,
                    ServerMode::ReadOnly,
                    ServerStatus::Secondary,
                )
                .await?;
            }
            Server::update_role(
                job.persister,
                candidate,
                ServerMode::ReadWrite,
                ServerStatus::Primary,
            )
            .await?;
            Group::set_master(job.persister, &group_id, Some(candidate)).await?;
            return Ok(Outcome::value(candidate));
        }

        let candidate = match requested {
            Some(uuid) => {
                if !Group::contains_server(job.persister, &group_id, uuid).await? {
                    return Err(ServerError::NotAMember(group_id, uuid).into());
                }
                uuid
            }
            None => pick_candidate(job, &members, old_primary.as_ref()).await?,
        };

        let candidate_server = members
            .iter()
            .find(|server| server.uuid == candidate)
            .ok_or(ServerError::ServerNotFound(candidate))?;

        // Candidate health gates the whole procedure.
        {
            let mut conn = member_connection(job.ctx.pool(), candidate_server).await?;
            let issues = replication::check_slave_issues(&mut conn).await?;
            let blocking: Vec<String> = issues
                .iter()
                // A candidate that is not yet a slave at all (fresh
                // group) has no threads to report on.
                .filter(|(issue, _)| old_primary.is_some() || !issue.ends_with("_thread"))
                .map(|(issue, detail)| format!("{}: {}", issue, detail))
                .collect();
            if !blocking.is_empty() {
                return Err(JobError::msg(format!(
                    "candidate ({}) is not promotable: {}",
                    candidate,
                    blocking.join("; ")
                )));
            }
        }

        // Step (a): the old primary stops accepting writes.
        if let Some(old) = &old_primary {
            let mut conn = member_connection(job.ctx.pool(), old).await?;
            conn.set_read_only(true).await?;
            Server::update_role(
                job.persister,
                old.uuid,
                ServerMode::ReadOnly,
                ServerStatus::Secondary,
            )
            .await?;
        }

        info!(
            "promoting ({}) to primary of group ({})",
            candidate, group.group_id
        );
        Ok(Outcome::none().then(JobSpec::named(
            "ha.promote_switch",
            "Switching the group over to the candidate.",
            Args::new()
                .with(group_id.as_str())
                .with(candidate)
                .with(Value::from(old_primary.map(|server| server.uuid))),
        )))
    }
}

/// Steps (b)-(d): detach the candidate from replication and make it the
/// read-write primary.
pub struct PromoteSwitch;

#[async_trait]
impl Action for PromoteSwitch {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let group_id = job.args.get(0)?.as_str()?.to_string();
        let candidate = job.args.get(1)?.as_uuid()?;
        let old_primary = job.args.get(2)?;

        let server = Server::fetch(job.persister, candidate)
            .await?
            .ok_or(ServerError::ServerNotFound(candidate))?;

        {
            let mut conn = member_connection(job.ctx.pool(), &server).await?;
            // Drain what the candidate already received before cutting
            // the old replication link.
            if replication::get_slave_status(&mut conn).await?.is_some() {
                let _ = replication::stop_slave(&mut conn, &[replication::Thread::Io], true, RPL_TIMEOUT)
                    .await;
                let retrieved = replication::get_slave_status(&mut conn)
                    .await?
                    .map(|status| status.retrieved_gtid_set)
                    .unwrap_or_default();
                if !retrieved.is_empty() {
                    let _ = replication::wait_for_slave_gtid(&mut conn, &retrieved, RPL_TIMEOUT)
                        .await;
                }
                replication::stop_slave(&mut conn, ALL_THREADS, true, RPL_TIMEOUT).await?;
                replication::reset_slave(&mut conn, true).await?;
            }
            conn.set_read_only(false).await?;
        }

        Server::update_role(
            job.persister,
            candidate,
            ServerMode::ReadWrite,
            ServerStatus::Primary,
        )
        .await?;
        Group::set_master(job.persister, &group_id, Some(candidate)).await?;

        Ok(Outcome::value(candidate).then(JobSpec::named(
            "ha.promote_rejoin",
            "Re-pointing members at the new primary.",
            Args::new()
                .with(group_id.as_str())
                .with(candidate)
                .with(old_primary.clone()),
        )))
    }
}

/// Compensation of [`PromoteSwitch`]: restore the previous primary
/// pointer. Replication state is left for operators or a retry; only
/// the pointer is rolled back.
pub struct PromoteRestore;

#[async_trait]
impl Action for PromoteRestore {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let group_id = job.args.get(0)?.as_str()?.to_string();
        let old_primary = match job.args.get(2) {
            Ok(value) if !value.is_null() => Some(value.as_uuid()?),
            _ => None,
        };

        Group::set_master(job.persister, &group_id, old_primary).await?;
        if let Some(old) = old_primary {
            Server::update_role(
                job.persister,
                old,
                ServerMode::ReadWrite,
                ServerStatus::Primary,
            )
            .await?;
        }
        Ok(Outcome::none())
    }
}

/// Step (e): every other active member replicates from the new primary.
pub struct PromoteRejoin;

#[async_trait]
impl Action for PromoteRejoin {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let group_id = job.args.get(0)?.as_str()?.to_string();
        let candidate = job.args.get(1)?.as_uuid()?;

        let members = Server::in_group(job.persister, &group_id).await?;
        let primary = members
            .iter()
            .find(|server| server.uuid == candidate)
            .ok_or(ServerError::ServerNotFound(candidate))?
            .clone();

        for member in replicating_members(&members, candidate) {
            let mut conn = member_connection(job.ctx.pool(), member).await?;
            conn.set_read_only(true).await?;
            let _ = replication::stop_slave(&mut conn, ALL_THREADS, true, RPL_TIMEOUT).await;
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
            Server::update_role(
                job.persister,
                member.uuid,
                ServerMode::ReadOnly,
                ServerStatus::Secondary,
            )
            .await?;
        }

        info!("group ({}) now follows ({})", group_id, candidate);
        Ok(Outcome::value(candidate))
    }
}

/// Ask every alive secondary for its executed GTID set and pick the
/// closest superset of the primary's.
async fn pick_candidate(
    job: &mut JobContext<'_>,
    members: &[Server],
    old_primary: Option<&Server>,
) -> Result<Uuid, JobError> {
    let primary_executed = match old_primary {
        Some(primary) => {
            let mut conn = member_connection(job.ctx.pool(), primary).await?;
            let status = replication::get_master_status(&mut conn).await?;
            GtidSet::parse(&status.map(|status| status.executed_gtid_set).unwrap_or_default())?
        }
        None => GtidSet::default(),
    };

    let mut candidates = Vec::new();
    for member in members {
        if member.status != ServerStatus::Secondary {
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

    choose(&primary_executed, &candidates)
        .ok_or_else(|| JobError::msg("no promotable secondary is alive"))
}
