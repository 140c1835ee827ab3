//! A procedure is the unit of work a client observes: one or more jobs,
//! executed in order on a single worker, durably checkpointed.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::args::Value;

use super::job::{Job, JobStatus};
use super::Error;

pub struct Procedure {
    uuid: Uuid,
    lockables: BTreeSet<String>,
    inner: Mutex<Inner>,
    done: Notify,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    complete: bool,
    aborted: bool,
    result: Option<Value>,
    trail: Vec<JobStatus>,
    pending: VecDeque<Job>,
    executed: Vec<Uuid>,
}

impl Procedure {
    pub fn new(lockables: BTreeSet<String>) -> Arc<Self> {
        Self::with_uuid(Uuid::new_v4(), lockables)
    }

    /// Recovery path: rebuild a procedure under its original uuid.
    pub fn with_uuid(uuid: Uuid, lockables: BTreeSet<String>) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            lockables,
            inner: Mutex::new(Inner::default()),
            done: Notify::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn lockables(&self) -> &BTreeSet<String> {
        &self.lockables
    }

    /// Fired by `break_conflicts`; the owning worker aborts the current
    /// job when it observes the token.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn complete(&self) -> bool {
        self.inner.lock().complete
    }

    /// The procedure was killed by a broken lock.
    pub fn aborted(&self) -> bool {
        self.inner.lock().aborted
    }

    /// Result of the last job that produced one. Meaningful only once
    /// complete.
    pub fn result(&self) -> Option<Value> {
        self.inner.lock().result.clone()
    }

    /// Statuses of every executed job, oldest first.
    pub fn trail(&self) -> Vec<JobStatus> {
        self.inner.lock().trail.clone()
    }

    /// The whole procedure succeeded: every job in the trail did.
    pub fn success(&self) -> bool {
        let inner = self.inner.lock();
        inner.complete && inner.trail.iter().all(|status| status.success)
    }

    /// Block until the last job has executed.
    pub async fn wait(&self) {
        loop {
            let notified = self.done.notified();
            tokio::pin!(notified);
            // Register before checking, or a completion between the
            // check and the await is lost.
            notified.as_mut().enable();
            if self.inner.lock().complete {
                return;
            }
            notified.await;
        }
    }

    /// Queue one more job. Fails once the procedure completed.
    pub(crate) fn push_job(&self, job: Job) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.complete {
            return Err(Error::ProcedureComplete(self.uuid));
        }
        inner.pending.push_back(job);
        Ok(())
    }

    pub(crate) fn push_jobs(&self, jobs: Vec<Job>) -> Result<(), Error> {
        for job in jobs {
            self.push_job(job)?;
        }
        Ok(())
    }

    pub(crate) fn next_job(&self) -> Option<Job> {
        self.inner.lock().pending.pop_front()
    }

    /// Fold an executed job back into the procedure. Returns true when
    /// this was the last scheduled job and the procedure is now complete.
    pub(crate) fn job_executed(
        &self,
        job_uuid: Uuid,
        statuses: Vec<JobStatus>,
        result: Option<Value>,
    ) -> bool {
        let mut inner = self.inner.lock();
        debug_assert!(!inner.complete);

        inner.executed.push(job_uuid);
        inner.trail.extend(statuses);
        if let Some(result) = result {
            inner.result = Some(result);
        }

        if inner.pending.is_empty() {
            inner.complete = true;
            self.done.notify_waiters();
            true
        } else {
            false
        }
    }

    /// Drop all pending jobs and complete immediately. Lock-broken path.
    pub(crate) fn abort(&self) {
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.aborted = true;
        if !inner.complete {
            inner.complete = true;
            self.done.notify_waiters();
        }
    }
}

impl std::fmt::Debug for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Procedure")
            .field("uuid", &self.uuid)
            .field("lockables", &self.lockables)
            .field("complete", &self.complete())
            .finish()
    }
}
