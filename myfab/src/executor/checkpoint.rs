//! Checkpoint log: the durable form of a job.
//!
//! Each row records a job's identity, action name, encoded arguments,
//! lockable objects and start/finish timestamps, with a monotonically
//! increasing sequence per procedure. Recovery reads this table to
//! decide what to resume or compensate.

use std::collections::BTreeSet;

use chrono::Utc;
use mysql_async::Row;
use uuid::Uuid;

use crate::args::Args;
use crate::store::{Error, Persister};

const INSERT_CHECKPOINT: &str = "INSERT INTO checkpoints(proc_uuid, job_uuid, sequence, \
     action_fqn, param_args, param_kwargs, lockables) \
     SELECT ?, ?, COALESCE(MAX(sequence), 0) + 1, ?, ?, ?, ? \
     FROM checkpoints WHERE proc_uuid = ?";

const UPDATE_START_CHECKPOINT: &str =
    "UPDATE checkpoints SET started = ? WHERE proc_uuid = ? AND job_uuid = ?";

const UPDATE_FINISH_CHECKPOINT: &str =
    "UPDATE checkpoints SET finished = ? WHERE proc_uuid = ? AND job_uuid = ?";

const DELETE_CHECKPOINTS: &str = "DELETE FROM checkpoints WHERE proc_uuid = ?";

const QUERY_CHECKPOINTS: &str = "SELECT proc_uuid, job_uuid, sequence, action_fqn, param_args, \
     param_kwargs, lockables, started, finished \
     FROM checkpoints WHERE proc_uuid = ? ORDER BY sequence";

/// For each procedure with a started-but-unfinished job, its
/// highest-sequence row.
const QUERY_UNFINISHED_CHECKPOINTS: &str =
    "SELECT chk_info.proc_uuid, chk_info.job_uuid, chk_info.sequence, \
     chk_info.action_fqn, chk_info.param_args, chk_info.param_kwargs, \
     chk_info.lockables, chk_info.started, chk_info.finished FROM \
     (SELECT proc_uuid, MAX(sequence) AS sequence FROM checkpoints \
      WHERE started IS NOT NULL AND finished IS NULL GROUP BY proc_uuid) \
     AS chk_core INNER JOIN \
     (SELECT proc_uuid, job_uuid, sequence, action_fqn, param_args, \
      param_kwargs, lockables, started, finished FROM checkpoints) AS chk_info \
     ON chk_info.proc_uuid = chk_core.proc_uuid AND \
     chk_info.sequence = chk_core.sequence";

const QUERY_SCHEDULED_CHECKPOINTS: &str =
    "SELECT proc_uuid, job_uuid, sequence, action_fqn, param_args, param_kwargs, \
     lockables, started, finished FROM checkpoints WHERE finished IS NULL \
     ORDER BY proc_uuid, sequence";

/// Procedures whose every row finished: completed but never removed,
/// i.e. the daemon died between finish and remove.
const QUERY_FINISHED_CHECKPOINTS: &str =
    "SELECT DISTINCT proc_uuid FROM checkpoints WHERE proc_uuid IN \
     (SELECT DISTINCT chk_info.proc_uuid FROM checkpoints AS chk_info \
      WHERE chk_info.finished IS NOT NULL) AND proc_uuid NOT IN \
     (SELECT DISTINCT chk_info.proc_uuid FROM checkpoints AS chk_info \
      WHERE chk_info.finished IS NULL)";

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub proc_uuid: Uuid,
    pub job_uuid: Uuid,
    pub action_fqn: String,
    pub args: Args,
    pub lockables: BTreeSet<String>,
    pub started: Option<f64>,
    pub finished: Option<f64>,
    pub sequence: Option<u32>,
}

impl Checkpoint {
    pub fn new(
        proc_uuid: Uuid,
        job_uuid: Uuid,
        action_fqn: String,
        args: Args,
        lockables: BTreeSet<String>,
    ) -> Self {
        Self {
            proc_uuid,
            job_uuid,
            action_fqn,
            args,
            lockables,
            started: None,
            finished: None,
            sequence: None,
        }
    }

    /// Insert the row, allocating the next sequence in the procedure.
    pub async fn schedule(&self, persister: &mut Persister) -> Result<(), Error> {
        let (param_args, param_kwargs) = self.args.encode()?;
        let lockables: Vec<&String> = self.lockables.iter().collect();
        let lockables =
            rmp_serde::to_vec(&lockables).map_err(crate::args::Error::from)?;

        persister
            .exec_drop(
                INSERT_CHECKPOINT,
                (
                    self.proc_uuid.to_string(),
                    self.job_uuid.to_string(),
                    self.action_fqn.clone(),
                    param_args,
                    param_kwargs,
                    lockables,
                    self.proc_uuid.to_string(),
                ),
            )
            .await
    }

    /// Stamp `started`.
    pub async fn begin(&mut self, persister: &mut Persister) -> Result<(), Error> {
        let started = now();
        persister
            .exec_drop(
                UPDATE_START_CHECKPOINT,
                (
                    started,
                    self.proc_uuid.to_string(),
                    self.job_uuid.to_string(),
                ),
            )
            .await?;
        self.started = Some(started);
        Ok(())
    }

    /// Stamp `finished`.
    pub async fn finish(&mut self, persister: &mut Persister) -> Result<(), Error> {
        let finished = now();
        persister
            .exec_drop(
                UPDATE_FINISH_CHECKPOINT,
                (
                    finished,
                    self.proc_uuid.to_string(),
                    self.job_uuid.to_string(),
                ),
            )
            .await?;
        self.finished = Some(finished);
        Ok(())
    }

    /// Delete every row of a completed procedure.
    pub async fn remove(persister: &mut Persister, proc_uuid: Uuid) -> Result<(), Error> {
        persister
            .exec_drop(DELETE_CHECKPOINTS, (proc_uuid.to_string(),))
            .await
    }

    pub async fn fetch(persister: &mut Persister, proc_uuid: Uuid) -> Result<Vec<Self>, Error> {
        let rows = persister
            .exec_stmt(QUERY_CHECKPOINTS, (proc_uuid.to_string(),))
            .await?;
        rows.into_iter().map(Self::from_row).collect()
    }

    pub async fn unfinished(persister: &mut Persister) -> Result<Vec<Self>, Error> {
        let rows = persister.exec_stmt(QUERY_UNFINISHED_CHECKPOINTS, ()).await?;
        rows.into_iter().map(Self::from_row).collect()
    }

    pub async fn scheduled(persister: &mut Persister) -> Result<Vec<Self>, Error> {
        let rows = persister.exec_stmt(QUERY_SCHEDULED_CHECKPOINTS, ()).await?;
        rows.into_iter().map(Self::from_row).collect()
    }

    /// Drop rows for procedures that finished but were never removed.
    pub async fn cleanup(persister: &mut Persister) -> Result<(), Error> {
        let rows = persister.exec_stmt(QUERY_FINISHED_CHECKPOINTS, ()).await?;
        for row in rows {
            let proc_uuid: String = row.get(0).ok_or(Error::MissingColumn(0))?;
            persister.exec_drop(DELETE_CHECKPOINTS, (proc_uuid,)).await?;
        }
        Ok(())
    }

    fn from_row(row: Row) -> Result<Self, Error> {
        let proc_uuid: String = row.get(0).ok_or(Error::MissingColumn(0))?;
        let job_uuid: String = row.get(1).ok_or(Error::MissingColumn(1))?;
        let sequence: u32 = row.get(2).ok_or(Error::MissingColumn(2))?;
        let action_fqn: String = row.get(3).ok_or(Error::MissingColumn(3))?;
        let param_args: Vec<u8> = row.get(4).unwrap_or_default();
        let param_kwargs: Vec<u8> = row.get(5).unwrap_or_default();
        let lockables: Vec<u8> = row.get(6).unwrap_or_default();
        let started: Option<f64> = row.get(7).unwrap_or(None);
        let finished: Option<f64> = row.get(8).unwrap_or(None);

        let args = Args::decode(&param_args, &param_kwargs)?;
        let lockables: Vec<String> = if lockables.is_empty() {
            Vec::new()
        } else {
            rmp_serde::from_slice(&lockables).map_err(crate::args::Error::from)?
        };

        Ok(Self {
            proc_uuid: Uuid::parse_str(&proc_uuid)
                .map_err(|err| Error::Schema(err.to_string()))?,
            job_uuid: Uuid::parse_str(&job_uuid)
                .map_err(|err| Error::Schema(err.to_string()))?,
            action_fqn,
            args,
            lockables: lockables.into_iter().collect(),
            started: started.filter(|ts| *ts > 0.0),
            finished: finished.filter(|ts| *ts > 0.0),
            sequence: Some(sequence),
        })
    }
}

/// Current time as a fractional epoch, the checkpoint column format.
fn now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lockables_round_trip() {
        let lockables: Vec<String> = vec!["group-1".into(), "lock".into()];
        let encoded = rmp_serde::to_vec(&lockables).unwrap();
        let decoded: Vec<String> = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(lockables, decoded);
    }

    #[test]
    fn timestamps_are_fractional_seconds() {
        let ts = now();
        assert!(ts > 1_600_000_000.0);
        assert!(ts.fract() >= 0.0);
    }
}
