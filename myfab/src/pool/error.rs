use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("server: {0}")]
    Server(#[from] crate::server::Error),

    #[error("connection to ({0}) was revoked")]
    Revoked(Uuid),

    #[error("checked in a connection the pool never loaned out")]
    UntrackedCheckin,
}
