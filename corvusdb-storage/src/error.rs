use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("node or edge not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt property payload: {0}")]
    Decode(String),

    #[error("storage has no backend configured")]
    NoBackend,

    #[error("transaction already in progress")]
    TransactionInProgress,

    #[error("no transaction in progress")]
    NoTransaction,
}
