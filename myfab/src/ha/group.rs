//! Group administration actions.

use async_trait::async_trait;

use crate::executor::{Action, JobContext, JobError, Outcome};
use crate::server::Group;

pub struct GroupCreate;

#[async_trait]
impl Action for GroupCreate {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let group_id = job.args.get(0)?.as_str()?.to_string();
        let description = match job.args.get(1) {
            Ok(value) if !value.is_null() => Some(value.as_str()?.to_string()),
            _ => None,
        };

        Group::add(job.persister, &group_id, description.as_deref()).await?;
        tracing::info!("added group ({})", group_id);
        Ok(Outcome::value(group_id))
    }
}

pub struct GroupUpdate;

#[async_trait]
impl Action for GroupUpdate {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let group_id = job.args.get(0)?.as_str()?.to_string();
        let description = match job.args.get(1) {
            Ok(value) if !value.is_null() => Some(value.as_str()?.to_string()),
            _ => None,
        };

        Group::require(job.persister, &group_id).await?;
        Group::update_description(job.persister, &group_id, description.as_deref()).await?;
        Ok(Outcome::none())
    }
}

pub struct GroupDestroy;

#[async_trait]
impl Action for GroupDestroy {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let group_id = job.args.get(0)?.as_str()?.to_string();

        Group::require(job.persister, &group_id).await?;
        job.ctx.detector().unwatch(&group_id);
        Group::remove(job.persister, &group_id).await?;
        tracing::info!("removed group ({})", group_id);
        Ok(Outcome::none())
    }
}

/// Turn failure detection on for a group.
pub struct GroupActivate;

#[async_trait]
impl Action for GroupActivate {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let group_id = job.args.get(0)?.as_str()?.to_string();

        Group::require(job.persister, &group_id).await?;
        Group::set_active(job.persister, &group_id, true).await?;
        job.ctx.detector().watch(job.ctx, &group_id);
        Ok(Outcome::none())
    }
}

pub struct GroupDeactivate;

#[async_trait]
impl Action for GroupDeactivate {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let group_id = job.args.get(0)?.as_str()?.to_string();

        Group::require(job.persister, &group_id).await?;
        Group::set_active(job.persister, &group_id, false).await?;
        job.ctx.detector().unwatch(&group_id);
        Ok(Outcome::none())
    }
}
