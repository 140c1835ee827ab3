use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("state store: {0}")]
    Database(#[from] mysql_async::Error),

    #[error("schema: {0}")]
    Schema(String),

    #[error("transaction already open")]
    NestedTransaction,

    #[error("no transaction open")]
    NoTransaction,

    #[error("handle is not connected to a state store")]
    Disconnected,

    #[error("args: {0}")]
    Args(#[from] crate::args::Error),

    #[error("malformed row: missing column {0}")]
    MissingColumn(usize),
}
