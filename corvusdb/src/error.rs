use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by every [`crate::Db`] operation.
///
/// Mirrors the query and storage crates' error kinds rather than hiding
/// them behind strings, so a caller matching on `Error::Type` still works
/// after a query fails deep inside the evaluator.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Query(#[from] corvusdb_query::Error),

    #[error(transparent)]
    Storage(#[from] corvusdb_storage::Error),

    #[error(transparent)]
    Interchange(#[from] InterchangeError),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("transaction already in progress")]
    TransactionInProgress,

    #[error("no transaction in progress")]
    NoTransaction,

    #[error("handle is closed")]
    Closed,
}

/// Wraps the storage crate's interchange parser error so callers importing
/// a JSON-graph document get a typed failure instead of a bare string.
#[derive(Debug, Error)]
#[error("malformed interchange document: {0}")]
pub struct InterchangeError(pub String);

impl From<corvusdb_storage::interchange::InterchangeError> for Error {
    fn from(e: corvusdb_storage::interchange::InterchangeError) -> Self {
        Error::Interchange(InterchangeError(e.to_string()))
    }
}
