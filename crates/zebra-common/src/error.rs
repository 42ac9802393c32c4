use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    /// The storage engine could not be loaded, opened or provisioned.
    #[error("initialization error: {0}")]
    Initialization(String),

    /// Raised for every call made after a failed initialization.
    #[error("storage not initialized: {0}")]
    NotInitialized(String),

    /// Schema-level rejection of a write (invalid JSON content, NOT NULL, ...).
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Malformed SQL or a parameter mismatch.
    #[error("query error: {0}")]
    Query(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}
