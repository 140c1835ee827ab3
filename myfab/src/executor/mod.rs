//! Procedure executor.
//!
//! Workers pull runnable procedures from the lock manager and execute
//! their jobs in order. Every job runs inside one state-store
//! transaction; recoverable jobs are checkpointed before and after so a
//! restart can resume or compensate whatever was in flight.

pub mod checkpoint;
pub mod error;
pub mod job;
pub mod procedure;
pub mod recovery;
pub mod registry;

pub use checkpoint::Checkpoint;
pub use error::Error;
pub use job::{
    Action, ActionCall, FnAction, Job, JobContext, JobError, JobSpec, JobState, JobStatus,
    Outcome,
};
pub use procedure::Procedure;
pub use recovery::{recover, RecoveryReport};
pub use registry::{ActionRegistry, RegisteredAction};

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::Context;
use crate::store::{Persister, StateStore};

use job::Resolved;

tokio::task_local! {
    static WORKER: u64;
}

/// Where new jobs land.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target {
    /// A fresh procedure.
    New,
    /// Recovery reschedule onto an existing procedure uuid. Checkpoint
    /// rows are assumed to already exist.
    Recovery(Uuid),
}

#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

struct Inner {
    scheduler: crate::scheduler::LockManager,
    registry: Arc<ActionRegistry>,
    store: StateStore,
    procedures: Mutex<HashMap<Uuid, Weak<Procedure>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    worker_count: usize,
    shutdown: CancellationToken,
}

impl Executor {
    pub fn new(store: StateStore, registry: Arc<ActionRegistry>, workers: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                scheduler: crate::scheduler::LockManager::new(),
                registry,
                store,
                procedures: Mutex::new(HashMap::new()),
                workers: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                worker_count: workers.max(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.inner.registry
    }

    pub fn scheduler(&self) -> &crate::scheduler::LockManager {
        &self.inner.scheduler
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    /// Spawn the worker pool.
    pub fn start(&self, ctx: &Arc<Context>) -> Result<(), Error> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        info!("starting executor with {} worker(s)", self.inner.worker_count);
        let mut workers = self.inner.workers.lock();
        for id in 0..self.inner.worker_count as u64 {
            let inner = self.inner.clone();
            let ctx = ctx.clone();
            workers.push(tokio::spawn(WORKER.scope(id, async move {
                worker_loop(id, inner, ctx).await;
            })));
        }
        Ok(())
    }

    /// Stop accepting procedures and wind the workers down.
    pub async fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("shutting down executor");
        self.inner.shutdown.cancel();
        let workers = std::mem::take(&mut *self.inner.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
        info!("executor has stopped");
    }

    pub fn running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// True when called from inside a worker, i.e. from a job.
    pub fn in_worker() -> bool {
        WORKER.try_with(|_| ()).is_ok()
    }

    /// Schedule one job on a fresh procedure.
    pub async fn enqueue_procedure(
        &self,
        spec: JobSpec,
        lockables: BTreeSet<String>,
    ) -> Result<Arc<Procedure>, Error> {
        self.enqueue_jobs(Target::New, vec![spec], lockables, false)
            .await
    }

    /// Schedule a batch of independent procedures, one per spec.
    pub async fn enqueue_procedures(
        &self,
        specs: Vec<(JobSpec, BTreeSet<String>)>,
    ) -> Result<Vec<Arc<Procedure>>, Error> {
        let mut procedures = Vec::with_capacity(specs.len());
        for (spec, lockables) in specs {
            procedures.push(self.enqueue_procedure(spec, lockables).await?);
        }
        Ok(procedures)
    }

    /// Schedule several jobs on one procedure. The event dispatcher's
    /// entry point: one procedure per trigger, one job per handler.
    pub async fn enqueue_jobs(
        &self,
        target: Target,
        specs: Vec<JobSpec>,
        lockables: BTreeSet<String>,
        priority: bool,
    ) -> Result<Arc<Procedure>, Error> {
        if !self.running() {
            return Err(Error::NotRunning);
        }

        let procedure = match target {
            Target::New => Procedure::new(lockables),
            Target::Recovery(uuid) => Procedure::with_uuid(uuid, lockables),
        };

        let mut jobs = Vec::with_capacity(specs.len());
        for spec in &specs {
            jobs.push(self.build_job(&procedure, Uuid::new_v4(), spec)?);
        }

        // Durably record the jobs before they become runnable.
        if target == Target::New && jobs.iter().any(|job| job.recoverable()) {
            let mut persister = self.inner.store.connect().await?;
            persister.begin().await?;
            for job in &jobs {
                if let Some(checkpoint) = &job.checkpoint {
                    checkpoint.schedule(&mut persister).await?;
                }
            }
            persister.commit().await?;
        }

        for job in jobs {
            debug!(
                "created job ({}) within procedure ({})",
                job.uuid(),
                procedure.uuid()
            );
            procedure.push_job(job)?;
        }

        self.inner
            .procedures
            .lock()
            .insert(procedure.uuid(), Arc::downgrade(&procedure));
        self.inner.scheduler.enqueue(&procedure, priority)?;
        Ok(procedure)
    }

    /// Recovery only: rebuild a procedure under its original uuid with
    /// its original job uuids.
    pub async fn reschedule_procedure(
        &self,
        proc_uuid: Uuid,
        jobs: Vec<(Uuid, JobSpec)>,
        lockables: BTreeSet<String>,
    ) -> Result<Arc<Procedure>, Error> {
        if !self.running() {
            return Err(Error::NotRunning);
        }
        if Self::in_worker() {
            return Err(Error::Programming(
                "a job cannot reschedule a procedure".into(),
            ));
        }

        let procedure = Procedure::with_uuid(proc_uuid, lockables);
        for (job_uuid, spec) in &jobs {
            let job = self.build_job(&procedure, *job_uuid, spec)?;
            procedure.push_job(job)?;
        }

        self.inner
            .procedures
            .lock()
            .insert(procedure.uuid(), Arc::downgrade(&procedure));
        self.inner.scheduler.enqueue(&procedure, false)?;
        Ok(procedure)
    }

    /// Weak-referenced lookup; gone once nobody holds the procedure.
    pub fn get_procedure(&self, uuid: Uuid) -> Option<Arc<Procedure>> {
        let mut procedures = self.inner.procedures.lock();
        procedures.retain(|_, weak| weak.strong_count() > 0);
        procedures.get(&uuid).and_then(Weak::upgrade)
    }

    /// Block until the procedure completes. May not be called from a job.
    pub async fn wait_for_procedure(&self, procedure: &Arc<Procedure>) -> Result<(), Error> {
        if !self.running() {
            return Err(Error::NotRunning);
        }
        if Self::in_worker() {
            return Err(Error::Programming(
                "one cannot wait for a procedure from a job".into(),
            ));
        }
        procedure.wait().await;
        Ok(())
    }

    fn build_job(
        &self,
        procedure: &Arc<Procedure>,
        job_uuid: Uuid,
        spec: &JobSpec,
    ) -> Result<Job, Error> {
        let resolved = match &spec.action {
            ActionCall::Transient(action) => Resolved::transient(action.clone()),
            ActionCall::Named(fqn) => {
                let registered = self
                    .inner
                    .registry
                    .resolve(fqn)
                    .ok_or_else(|| Error::UnknownAction(fqn.clone()))?;
                Resolved::named(fqn, registered)
            }
            ActionCall::Compensation(fqn) => {
                let registered = self
                    .inner
                    .registry
                    .resolve(fqn)
                    .ok_or_else(|| Error::UnknownAction(fqn.clone()))?;
                Resolved::compensation(fqn, registered)
                    .ok_or_else(|| Error::NoCompensation(fqn.clone()))?
            }
        };

        // A job is recoverable when its action can be resolved by name at
        // recovery time and the store actually persists checkpoints.
        let recoverable = resolved.name.is_some() && self.inner.store.durable();
        if !recoverable {
            debug!(
                "job ({}) is not recoverable; a restart may not restore it",
                job_uuid
            );
        }

        let checkpoint = if recoverable {
            Some(Checkpoint::new(
                procedure.uuid(),
                job_uuid,
                resolved.name.clone().unwrap_or_default(),
                spec.args.clone(),
                procedure.lockables().clone(),
            ))
        } else {
            None
        };

        Ok(Job::new(job_uuid, spec, resolved, recoverable, checkpoint))
    }
}

async fn worker_loop(id: u64, inner: Arc<Inner>, ctx: Arc<Context>) {
    debug!("executor worker {} running", id);
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            procedure = inner.scheduler.next_procedure() => {
                run_procedure(id, &inner, &ctx, procedure).await;
            }
        }
    }
    debug!("executor worker {} stopped", id);
}

/// Run every job of one procedure, sequentially, on this worker.
async fn run_procedure(id: u64, inner: &Inner, ctx: &Context, procedure: Arc<Procedure>) {
    if let Err(err) = inner.scheduler.lock(&procedure, id) {
        // Broken between pickup and lock.
        debug!("procedure ({}) was gone at pickup: {}", procedure.uuid(), err);
        return;
    }

    let mut persister = match inner.store.connect().await {
        Ok(persister) => persister,
        Err(err) => {
            error!(
                "worker {} cannot reach the state store, failing procedure ({}): {}",
                id,
                procedure.uuid(),
                err
            );
            fail_pending(&procedure, &err.to_string());
            let _ = inner.scheduler.release(&procedure);
            return;
        }
    };

    let mut had_recoverable = false;
    while let Some(mut job) = procedure.next_job() {
        if procedure.cancel_token().is_cancelled() {
            abort_job(&mut job, &procedure);
            procedure.abort();
            break;
        }
        had_recoverable |= job.recoverable();
        execute_job(&mut job, &procedure, &mut persister, ctx).await;
        let result = job.result.take();
        let statuses = std::mem::take(&mut job.statuses);
        procedure.job_executed(job.uuid(), statuses, result);
    }

    if procedure.complete() && had_recoverable {
        if let Err(err) = Checkpoint::remove(&mut persister, procedure.uuid()).await {
            warn!(
                "could not remove checkpoints of procedure ({}): {}",
                procedure.uuid(),
                err
            );
        }
    }

    // A broken procedure was already evicted from the queues.
    let _ = inner.scheduler.release(&procedure);
}

/// The per-job execution sequence.
async fn execute_job(
    job: &mut Job,
    procedure: &Arc<Procedure>,
    persister: &mut Persister,
    ctx: &Context,
) {
    job.add_status(
        true,
        JobState::Processing,
        format!("Started execution of ({}).", job.name()),
        String::new(),
    );

    // 1. Record that the job started.
    if job.recoverable {
        if let Some(checkpoint) = job.checkpoint.as_mut() {
            if let Err(err) = checkpoint.begin(persister).await {
                job.add_status(
                    false,
                    JobState::Complete,
                    format!("Tried to execute action ({}).", job.name()),
                    err.to_string(),
                );
                return;
            }
        }
    }

    // 2. Open the job's transaction.
    if let Err(err) = persister.begin().await {
        job.add_status(
            false,
            JobState::Complete,
            format!("Tried to execute action ({}).", job.name()),
            err.to_string(),
        );
        return;
    }

    // 3. Invoke the action, watching for a broken lock.
    let run = job.run.clone();
    let outcome = {
        let mut job_ctx = JobContext {
            persister: &mut *persister,
            args: &job.args,
            ctx,
            proc_uuid: procedure.uuid(),
        };
        let cancelled = procedure.cancel_token().clone();
        tokio::select! {
            _ = cancelled.cancelled() => Err(crate::scheduler::Error::LockBroken.into()),
            outcome = run.run(&mut job_ctx) => outcome,
        }
    };

    match outcome {
        // 4. Persist chained jobs, stamp `finished`, commit, then hand
        //    the chained jobs to the procedure.
        Ok(outcome) => match finish_job(job, procedure, persister, ctx, outcome).await {
            Ok(result) => {
                job.result = result;
                job.add_status(
                    true,
                    JobState::Complete,
                    format!("Executed action ({}).", job.name()),
                    String::new(),
                );
            }
            Err(err) => {
                fail_job(job, persister, ctx, procedure, err.to_string()).await;
            }
        },

        // 5. Roll back and compensate.
        Err(err) => {
            fail_job(job, persister, ctx, procedure, err.to_string()).await;
        }
    }
}

async fn finish_job(
    job: &mut Job,
    procedure: &Arc<Procedure>,
    persister: &mut Persister,
    ctx: &Context,
    outcome: Outcome,
) -> Result<Option<crate::args::Value>, Error> {
    // Chained jobs are persisted inside the current transaction so the
    // checkpoint log and the action's own writes commit atomically.
    let mut chained = Vec::with_capacity(outcome.chain.len());
    for spec in &outcome.chain {
        let chained_job = ctx
            .executor()
            .build_job(procedure, Uuid::new_v4(), spec)?;
        if let Some(checkpoint) = &chained_job.checkpoint {
            checkpoint.schedule(persister).await?;
        }
        chained.push(chained_job);
    }

    if job.recoverable {
        if let Some(checkpoint) = job.checkpoint.as_mut() {
            checkpoint.finish(persister).await?;
        }
    }

    persister.commit().await?;

    // Only now do the chained jobs become runnable.
    procedure.push_jobs(chained)?;
    Ok(outcome.result)
}

async fn fail_job(
    job: &mut Job,
    persister: &mut Persister,
    ctx: &Context,
    procedure: &Arc<Procedure>,
    diagnosis: String,
) {
    warn!("job ({}) failed: {}", job.name(), diagnosis);

    if persister.in_transaction() {
        if let Err(err) = persister.rollback().await {
            error!("rollback failed for job ({}): {}", job.name(), err);
        }
    }

    // Compensation runs in its own transaction; its failure is logged
    // but the job's diagnosis stays the original one.
    if let Some(undo) = job.undo.clone() {
        debug!("running compensation of ({})", job.name());
        let compensated = async {
            persister.begin().await?;
            let mut job_ctx = JobContext {
                persister: &mut *persister,
                args: &job.args,
                ctx,
                proc_uuid: procedure.uuid(),
            };
            match undo.run(&mut job_ctx).await {
                Ok(_) => persister.commit().await,
                Err(err) => {
                    let _ = persister.rollback().await;
                    Err(crate::store::Error::Schema(err.to_string()))
                }
            }
        }
        .await;
        if let Err(err) = compensated {
            error!("compensation of ({}) failed: {}", job.name(), err);
        }
    }

    job.add_status(
        false,
        JobState::Complete,
        format!("Tried to execute action ({}).", job.name()),
        diagnosis,
    );
}

/// Lock broken before the job even started.
fn abort_job(job: &mut Job, procedure: &Arc<Procedure>) {
    job.add_status(
        false,
        JobState::Complete,
        format!("Tried to execute action ({}).", job.name()),
        crate::scheduler::Error::LockBroken.to_string(),
    );
    let statuses = std::mem::take(&mut job.statuses);
    procedure.job_executed(job.uuid(), statuses, None);
}

/// State store unreachable: every pending job fails with the diagnosis.
fn fail_pending(procedure: &Arc<Procedure>, diagnosis: &str) {
    while let Some(mut job) = procedure.next_job() {
        job.add_status(
            false,
            JobState::Complete,
            format!("Tried to execute action ({}).", job.name()),
            diagnosis.to_string(),
        );
        let statuses = std::mem::take(&mut job.statuses);
        procedure.job_executed(job.uuid(), statuses, None);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::args::{Args, Value};
    use crate::context::Context;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    fn lockset(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn single_job_success() {
        let ctx = Context::ephemeral().await;
        let executor = ctx.executor();

        let spec = JobSpec::transient(
            FnAction::new(|_ctx: &mut JobContext| {
                async { Ok(Outcome::value("done")) }.boxed()
            }),
            "Single job.",
            Args::new(),
        );

        let procedure = executor
            .enqueue_procedure(spec, lockset(&["g1"]))
            .await
            .unwrap();
        executor.wait_for_procedure(&procedure).await.unwrap();

        assert!(procedure.complete());
        assert!(procedure.success());
        assert_eq!(procedure.result(), Some(Value::Str("done".into())));

        // Enqueued, processing, complete.
        let trail = procedure.trail();
        assert_eq!(trail.len(), 3);
        assert!(trail.iter().all(|status| status.success));
    }

    #[tokio::test]
    async fn failed_job_records_diagnosis_and_compensates() {
        let ctx = Context::ephemeral().await;
        let executor = ctx.executor();

        let compensated = Arc::new(AtomicUsize::new(0));
        let witness = compensated.clone();

        executor
            .registry()
            .register(
                "test.explode",
                FnAction::new(|_ctx: &mut JobContext| {
                    async { Err(JobError::msg("deliberate failure")) }.boxed()
                }),
                Some(FnAction::new(move |_ctx: &mut JobContext| {
                    let witness = witness.clone();
                    async move {
                        witness.fetch_add(1, AtomicOrdering::SeqCst);
                        Ok(Outcome::none())
                    }
                    .boxed()
                })),
            )
            .unwrap();

        let procedure = executor
            .enqueue_procedure(
                JobSpec::named("test.explode", "Exploding job.", Args::new()),
                lockset(&["g1"]),
            )
            .await
            .unwrap();
        executor.wait_for_procedure(&procedure).await.unwrap();

        assert!(procedure.complete());
        assert!(!procedure.success());
        assert_eq!(compensated.load(AtomicOrdering::SeqCst), 1);

        let last = procedure.trail().pop().unwrap();
        assert!(!last.success);
        assert!(last.diagnosis.contains("deliberate failure"));
    }

    #[tokio::test]
    async fn chained_jobs_run_in_order_on_one_procedure() {
        let ctx = Context::ephemeral().await;
        let executor = ctx.executor();

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let second = {
            let order = order.clone();
            FnAction::new(move |_ctx: &mut JobContext| {
                let order = order.clone();
                async move {
                    order.lock().push("second");
                    Ok(Outcome::value(2i64))
                }
                .boxed()
            })
        };

        let first = {
            let order = order.clone();
            FnAction::new(move |_ctx: &mut JobContext| {
                let order = order.clone();
                let second = second.clone();
                async move {
                    order.lock().push("first");
                    Ok(Outcome::none().then(JobSpec::transient(
                        second,
                        "Chained job.",
                        Args::new(),
                    )))
                }
                .boxed()
            })
        };

        let procedure = executor
            .enqueue_procedure(
                JobSpec::transient(first, "Chaining job.", Args::new()),
                lockset(&["g1"]),
            )
            .await
            .unwrap();
        executor.wait_for_procedure(&procedure).await.unwrap();

        assert_eq!(*order.lock(), vec!["first", "second"]);
        // The last result wins.
        assert_eq!(procedure.result(), Some(Value::Int(2)));
    }

    #[tokio::test]
    async fn conflicting_procedures_serialize() {
        let ctx = Context::ephemeral().await;
        let executor = ctx.executor();

        let running = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let mut procedures = Vec::new();
        for _ in 0..4 {
            let running = running.clone();
            let overlap = overlap.clone();
            let spec = JobSpec::transient(
                FnAction::new(move |_ctx: &mut JobContext| {
                    let running = running.clone();
                    let overlap = overlap.clone();
                    async move {
                        if running.fetch_add(1, AtomicOrdering::SeqCst) > 0 {
                            overlap.fetch_add(1, AtomicOrdering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, AtomicOrdering::SeqCst);
                        Ok(Outcome::none())
                    }
                    .boxed()
                }),
                "Serialized job.",
                Args::new(),
            );
            procedures.push(
                executor
                    .enqueue_procedure(spec, lockset(&["shared"]))
                    .await
                    .unwrap(),
            );
        }

        for procedure in &procedures {
            executor.wait_for_procedure(procedure).await.unwrap();
        }
        assert_eq!(overlap.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn break_conflicts_fails_running_procedure() {
        let ctx = Context::ephemeral().await;
        let executor = ctx.executor();

        let started = Arc::new(tokio::sync::Notify::new());
        let witness = started.clone();

        let spec = JobSpec::transient(
            FnAction::new(move |_ctx: &mut JobContext| {
                let witness = witness.clone();
                async move {
                    witness.notify_one();
                    // Long enough that the break lands mid-job.
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Outcome::none())
                }
                .boxed()
            }),
            "Long job.",
            Args::new(),
        );

        let procedure = executor
            .enqueue_procedure(spec, lockset(&["g1"]))
            .await
            .unwrap();
        started.notified().await;

        let broken = executor.scheduler().break_conflicts(&lockset(&["g1"]));
        assert_eq!(broken.len(), 1);

        executor.wait_for_procedure(&procedure).await.unwrap();
        assert!(!procedure.success());
        let last = procedure.trail().pop().unwrap();
        assert!(last.diagnosis.contains("lock broken"));
    }

    #[tokio::test]
    async fn enqueue_requires_running_executor() {
        let ctx = Context::ephemeral_stopped().await;
        let executor = ctx.executor();

        let spec = JobSpec::transient(
            FnAction::new(|_ctx: &mut JobContext| async { Ok(Outcome::none()) }.boxed()),
            "Never runs.",
            Args::new(),
        );
        let result = executor.enqueue_procedure(spec, lockset(&["g1"])).await;
        assert!(matches!(result, Err(Error::NotRunning)));
    }

    #[tokio::test]
    async fn get_procedure_is_weak() {
        let ctx = Context::ephemeral().await;
        let executor = ctx.executor();

        let spec = JobSpec::transient(
            FnAction::new(|_ctx: &mut JobContext| async { Ok(Outcome::none()) }.boxed()),
            "Tracked job.",
            Args::new(),
        );
        let procedure = executor
            .enqueue_procedure(spec, lockset(&["g1"]))
            .await
            .unwrap();
        let uuid = procedure.uuid();
        executor.wait_for_procedure(&procedure).await.unwrap();

        assert!(executor.get_procedure(uuid).is_some());
        drop(procedure);
        // The worker drops its own reference shortly after completion.
        for _ in 0..50 {
            if executor.get_procedure(uuid).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(executor.get_procedure(uuid).is_none());
    }
}
