use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("row decode error: {0}")]
    Row(#[from] serde_rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("timed out waiting for the backend")]
    Timeout,

    #[error("collection {0} does not exist")]
    CollectionMissing(String),

    #[error("invalid collection name: {0:?}")]
    InvalidName(String),

    #[error("attribute {path} has an unexpected type: {found}")]
    TypeMismatch { path: String, found: &'static str },

    #[error("attribute {path} would overflow")]
    Overflow { path: String },

    /// The caller's check refused the stored item; nothing was written.
    #[error("item rejected: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, Error>;
