use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("server: {0}")]
    Server(#[from] crate::server::Error),

    #[error("invalid GTID set: {0}")]
    InvalidGtid(String),

    #[error("wait timed out after {0:?}")]
    Timeout(Duration),

    #[error("replication wait failed: {0}")]
    WaitFailed(String),

    #[error("server is not configured as a slave")]
    NotASlave,

    #[error("server has no binary log")]
    NoBinaryLog,
}
