use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("procedure ({0}) is already queued")]
    AlreadyQueued(Uuid),

    #[error("procedure ({0}) is not queued")]
    UnknownProcedure(Uuid),

    #[error("procedure ({0}) is already locked by worker {1}")]
    DoubleLock(Uuid, u64),

    #[error("procedure ({0}) is not ready to be locked")]
    NotReady(Uuid),

    #[error("lock broken")]
    LockBroken,
}
