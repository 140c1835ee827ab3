//! Jobs: one action invocation with arguments, executed inside a single
//! state-store transaction.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::args::{Args, Value};
use crate::context::Context;
use crate::store::Persister;

use super::checkpoint::Checkpoint;
use super::registry::RegisteredAction;

/// Everything an action gets to see while it runs.
pub struct JobContext<'a> {
    /// The worker's state-store handle, inside the job's transaction.
    pub persister: &'a mut Persister,
    pub args: &'a Args,
    pub ctx: &'a Context,
    pub proc_uuid: Uuid,
}

/// An action either succeeds with an optional result and follow-up jobs
/// to chain onto the current procedure, or fails with a diagnosis.
pub struct Outcome {
    pub result: Option<Value>,
    pub chain: Vec<JobSpec>,
}

impl Outcome {
    pub fn none() -> Self {
        Self {
            result: None,
            chain: Vec::new(),
        }
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            result: Some(value.into()),
            chain: Vec::new(),
        }
    }

    /// Chain a follow-up job within the current procedure. It is
    /// persisted with this job's transaction and runs after it commits.
    pub fn then(mut self, spec: JobSpec) -> Self {
        self.chain.push(spec);
        self
    }
}

/// Diagnosis-carrying job failure. Anything error-shaped converts into
/// it so actions can use `?` freely.
pub struct JobError {
    message: String,
}

impl JobError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<E> for JobError {
    fn from(err: E) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

/// A code block that can be scheduled through the executor.
#[async_trait]
pub trait Action: Send + Sync {
    async fn run(&self, ctx: &mut JobContext<'_>) -> Result<Outcome, JobError>;
}

type BoxedActionFn = dyn for<'a, 'b> Fn(&'a mut JobContext<'b>) -> BoxFuture<'a, Result<Outcome, JobError>>
    + Send
    + Sync;

/// Adapter turning a closure into an [`Action`]. Closure actions are not
/// recoverable: they have no registered name to resolve at recovery
/// time.
pub struct FnAction {
    f: Box<BoxedActionFn>,
}

impl FnAction {
    pub fn new<F>(f: F) -> Arc<dyn Action>
    where
        F: for<'a, 'b> Fn(&'a mut JobContext<'b>) -> BoxFuture<'a, Result<Outcome, JobError>>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self { f: Box::new(f) })
    }
}

#[async_trait]
impl Action for FnAction {
    async fn run(&self, ctx: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        (self.f)(ctx).await
    }
}

/// How a job names its code block.
#[derive(Clone)]
pub enum ActionCall {
    /// Registered action, recoverable by name.
    Named(String),
    /// A registered action's compensation. Recovery only.
    Compensation(String),
    /// Anonymous closure; never checkpointed.
    Transient(Arc<dyn Action>),
}

/// A job waiting to be built: action, human description, arguments.
#[derive(Clone)]
pub struct JobSpec {
    pub action: ActionCall,
    pub description: String,
    pub args: Args,
}

impl JobSpec {
    pub fn named(fqn: impl Into<String>, description: impl Into<String>, args: Args) -> Self {
        Self {
            action: ActionCall::Named(fqn.into()),
            description: description.into(),
            args,
        }
    }

    pub fn compensation(
        fqn: impl Into<String>,
        description: impl Into<String>,
        args: Args,
    ) -> Self {
        Self {
            action: ActionCall::Compensation(fqn.into()),
            description: description.into(),
            args,
        }
    }

    pub fn transient(
        action: Arc<dyn Action>,
        description: impl Into<String>,
        args: Args,
    ) -> Self {
        Self {
            action: ActionCall::Transient(action),
            description: description.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum JobState {
    Enqueued,
    Processing,
    Complete,
}

/// One entry in a procedure's status trail.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStatus {
    pub job_uuid: Uuid,
    pub when: DateTime<Utc>,
    pub state: JobState,
    pub success: bool,
    pub description: String,
    pub diagnosis: String,
}

/// A runnable job. Built from a [`JobSpec`] by the executor.
pub struct Job {
    pub(super) uuid: Uuid,
    pub(super) action_name: Option<String>,
    pub(super) run: Arc<dyn Action>,
    pub(super) undo: Option<Arc<dyn Action>>,
    pub(super) description: String,
    pub(super) args: Args,
    pub(super) recoverable: bool,
    pub(super) checkpoint: Option<Checkpoint>,
    pub(super) statuses: Vec<JobStatus>,
    pub(super) result: Option<Value>,
}

impl Job {
    pub(super) fn new(
        uuid: Uuid,
        spec: &JobSpec,
        resolved: Resolved,
        recoverable: bool,
        checkpoint: Option<Checkpoint>,
    ) -> Self {
        let mut job = Self {
            uuid,
            action_name: resolved.name,
            run: resolved.run,
            undo: resolved.undo,
            description: spec.description.clone(),
            args: spec.args.clone(),
            recoverable,
            checkpoint,
            statuses: Vec::new(),
            result: None,
        };
        let description = job.description.clone();
        job.add_status(true, JobState::Enqueued, description, String::new());
        job
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Registered name, `<transient>` for closures.
    pub fn name(&self) -> &str {
        self.action_name.as_deref().unwrap_or("<transient>")
    }

    pub fn recoverable(&self) -> bool {
        self.recoverable
    }

    pub(super) fn add_status(
        &mut self,
        success: bool,
        state: JobState,
        description: String,
        diagnosis: String,
    ) {
        self.statuses.push(JobStatus {
            job_uuid: self.uuid,
            when: Utc::now(),
            state,
            success,
            description,
            diagnosis,
        });
    }
}

/// A spec's action resolved against the registry.
pub(super) struct Resolved {
    pub(super) name: Option<String>,
    pub(super) run: Arc<dyn Action>,
    pub(super) undo: Option<Arc<dyn Action>>,
}

impl Resolved {
    pub(super) fn transient(action: Arc<dyn Action>) -> Self {
        Self {
            name: None,
            run: action,
            undo: None,
        }
    }

    pub(super) fn named(name: &str, registered: RegisteredAction) -> Self {
        Self {
            name: Some(name.to_string()),
            run: registered.run,
            undo: registered.undo,
        }
    }

    /// Recovery compensation: run the undo under the original name.
    pub(super) fn compensation(name: &str, registered: RegisteredAction) -> Option<Self> {
        registered.undo.map(|undo| Self {
            name: Some(name.to_string()),
            run: undo,
            undo: None,
        })
    }
}
