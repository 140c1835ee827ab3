use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("executor is not running")]
    NotRunning,

    #[error("executor is already running")]
    AlreadyRunning,

    #[error("{0}")]
    Programming(String),

    #[error("action `{0}` is not registered")]
    UnknownAction(String),

    #[error("action `{0}` is already registered")]
    DuplicateAction(String),

    #[error("action `{0}` has no compensation")]
    NoCompensation(String),

    #[error("procedure ({0}) is unknown")]
    UnknownProcedure(Uuid),

    #[error("procedure ({0}) is already complete")]
    ProcedureComplete(Uuid),

    #[error("store: {0}")]
    Store(#[from] crate::store::Error),

    #[error("scheduler: {0}")]
    Scheduler(#[from] crate::scheduler::Error),

    #[error("args: {0}")]
    Args(#[from] crate::args::Error),
}
