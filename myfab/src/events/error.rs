use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("event `{0}` is unknown")]
    UnknownEvent(String),

    #[error("handler `{0}` is not a registered action")]
    UnknownHandler(String),

    #[error("handler `{1}` is already registered for event `{0}`")]
    DuplicateHandler(String, String),

    #[error("handler `{1}` is not registered for event `{0}`")]
    NotRegistered(String, String),

    #[error("executor: {0}")]
    Executor(#[from] crate::executor::Error),
}
