use cohort_shared::ChatError;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A singleton or uniqueness rule would be violated.
    #[error("{0} already exists")]
    AlreadyExists(&'static str),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON column (poll, event, mentions) failed to encode or decode.
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Map `QueryReturnedNoRows` to `NotFound(entity)`.
    pub fn or_not_found(err: rusqlite::Error, entity: &'static str) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(entity),
            other => StoreError::Sqlite(other),
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(entity) => ChatError::NotFound(entity),
            StoreError::AlreadyExists(entity) => {
                ChatError::Conflict(format!("{entity} already exists"))
            }
            other => ChatError::Store(other.to_string()),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
