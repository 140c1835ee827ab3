//! Crash recovery.
//!
//! Reads the checkpoint log at startup and puts every interrupted
//! procedure back on the executor: jobs that never started are
//! rescheduled as-is; a job that started but did not finish is either
//! rescheduled (idempotent action) or compensated. An action whose name
//! no longer resolves is left untouched with a warning; no data-changing
//! recovery is attempted for it.

use std::collections::{BTreeMap, HashSet};

use tracing::{info, warn};
use uuid::Uuid;

use crate::args::Args;

use super::checkpoint::Checkpoint;
use super::job::JobSpec;
use super::{Error, Executor};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RecoveryReport {
    /// Procedures rescheduled as-is.
    pub rescheduled: usize,
    /// Procedures recovered through their compensation.
    pub compensated: usize,
    /// Procedures left in place because their action is gone.
    pub skipped: usize,
}

/// Run recovery. Call after handlers are registered and before external
/// requests are admitted.
pub async fn recover(executor: &Executor) -> Result<RecoveryReport, Error> {
    let mut report = RecoveryReport::default();
    if !executor.store().durable() {
        return Ok(report);
    }

    let mut persister = executor.store().connect().await?;

    let unfinished = Checkpoint::unfinished(&mut persister).await?;
    let scheduled = Checkpoint::scheduled(&mut persister).await?;

    // All not-yet-finished rows, per procedure, in sequence order.
    let mut by_procedure: BTreeMap<Uuid, Vec<Checkpoint>> = BTreeMap::new();
    for checkpoint in scheduled {
        by_procedure
            .entry(checkpoint.proc_uuid)
            .or_default()
            .push(checkpoint);
    }

    let interrupted: HashSet<Uuid> = unfinished.iter().map(|chk| chk.proc_uuid).collect();

    // Procedures with a started-but-unfinished job.
    for checkpoint in unfinished {
        let Some(registered) = executor.registry().resolve(&checkpoint.action_fqn) else {
            warn!(
                "procedure ({}) cannot be recovered: action `{}` does not resolve; \
                 leaving its checkpoint in place",
                checkpoint.proc_uuid, checkpoint.action_fqn
            );
            report.skipped += 1;
            by_procedure.remove(&checkpoint.proc_uuid);
            continue;
        };

        let proc_uuid = checkpoint.proc_uuid;
        let lockables = checkpoint.lockables.clone();
        let rest = by_procedure.remove(&proc_uuid).unwrap_or_default();

        if registered.undo.is_some() {
            // Compensate and stop: the rest of the procedure is dropped,
            // completion removes all its rows.
            info!(
                "compensating interrupted procedure ({}) via `{}`",
                proc_uuid, checkpoint.action_fqn
            );
            executor
                .reschedule_procedure(
                    proc_uuid,
                    vec![(
                        checkpoint.job_uuid,
                        JobSpec::compensation(
                            checkpoint.action_fqn.clone(),
                            format!("Compensation of ({}).", checkpoint.action_fqn),
                            checkpoint.args.clone(),
                        ),
                    )],
                    lockables,
                )
                .await?;
            report.compensated += 1;
        } else {
            // Idempotent action: run the interrupted job again, then the
            // jobs that never started.
            info!("rescheduling interrupted procedure ({})", proc_uuid);
            let mut jobs = Vec::new();
            for chk in rest {
                if chk.job_uuid == checkpoint.job_uuid || chk.started.is_none() {
                    jobs.push(reschedule_spec(chk)?);
                }
            }
            if jobs.is_empty() {
                jobs.push(reschedule_spec(checkpoint)?);
            }
            executor
                .reschedule_procedure(proc_uuid, jobs, lockables)
                .await?;
            report.rescheduled += 1;
        }
    }

    // Procedures whose jobs were scheduled but never started.
    for (proc_uuid, checkpoints) in by_procedure {
        if interrupted.contains(&proc_uuid) {
            continue;
        }
        if let Some(missing) = checkpoints
            .iter()
            .find(|chk| !executor.registry().is_registered(&chk.action_fqn))
        {
            warn!(
                "procedure ({}) cannot be recovered: action `{}` does not resolve; \
                 leaving its checkpoint in place",
                proc_uuid, missing.action_fqn
            );
            report.skipped += 1;
            continue;
        }

        let lockables = checkpoints
            .first()
            .map(|chk| chk.lockables.clone())
            .unwrap_or_default();
        let jobs = checkpoints
            .into_iter()
            .map(reschedule_spec)
            .collect::<Result<Vec<_>, _>>()?;

        info!("rescheduling never-started procedure ({})", proc_uuid);
        executor
            .reschedule_procedure(proc_uuid, jobs, lockables)
            .await?;
        report.rescheduled += 1;
    }

    // Rows whose procedure completed but was never removed.
    Checkpoint::cleanup(&mut persister).await?;

    info!(
        "recovery complete: {} rescheduled, {} compensated, {} skipped",
        report.rescheduled, report.compensated, report.skipped
    );
    Ok(report)
}

fn reschedule_spec(checkpoint: Checkpoint) -> Result<(Uuid, JobSpec), Error> {
    let args: Args = checkpoint.args;
    Ok((
        checkpoint.job_uuid,
        JobSpec::named(
            checkpoint.action_fqn.clone(),
            format!("Recovered execution of ({}).", checkpoint.action_fqn),
            args,
        ),
    ))
}
