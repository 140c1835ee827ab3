use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("command `{0}` is unknown")]
    UnknownCommand(String),

    #[error("command `{0}` is already registered")]
    DuplicateCommand(String),

    #[error("args: {0}")]
    Args(#[from] crate::args::Error),

    #[error("events: {0}")]
    Events(#[from] crate::events::Error),

    #[error("executor: {0}")]
    Executor(#[from] crate::executor::Error),

    #[error("{0}")]
    Server(#[from] crate::server::Error),

    #[error("{0}")]
    Failure(#[from] crate::failure::Error),

    #[error("{0}")]
    Sharding(#[from] crate::sharding::Error),

    #[error("store: {0}")]
    Store(#[from] crate::store::Error),
}
