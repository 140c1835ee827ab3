use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("server: {0}")]
    Database(#[from] mysql_async::Error),

    #[error("store: {0}")]
    Store(#[from] crate::store::Error),

    #[error("uuid mismatch: expected ({expected}), server reports ({got})")]
    UuidMismatch { expected: Uuid, got: Uuid },

    #[error("group ({0}) does not exist")]
    GroupNotFound(String),

    #[error("group ({0}) already exists")]
    GroupExists(String),

    #[error("group ({0}) is not empty")]
    GroupNotEmpty(String),

    #[error("group ({0}) has no primary")]
    NoPrimary(String),

    #[error("server ({0}) does not exist")]
    ServerNotFound(Uuid),

    #[error("server ({0}) already exists in group ({1})")]
    ServerExists(Uuid, String),

    #[error("group ({0}) does not contain server ({1})")]
    NotAMember(String, Uuid),

    #[error("server ({0}) is the primary of group ({1})")]
    IsPrimary(Uuid, String),

    #[error("user `{user}` is missing privileges: {missing}")]
    MissingPrivileges { user: String, missing: String },

    #[error("malformed address `{0}`")]
    Address(String),

    #[error("malformed `{0}` value in row")]
    MalformedRow(&'static str),
}
