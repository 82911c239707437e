use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Malformed {shape} row: {message}")]
    MalformedRow {
        shape: &'static str,
        message: String,
    },

    #[error("Insert failed: {0}")]
    InsertFailed(String),

    #[error("Lookup failed: {0}")]
    LookupFailed(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl StoreError {
    pub(crate) fn malformed(shape: &'static str, err: impl std::fmt::Display) -> Self {
        StoreError::MalformedRow {
            shape,
            message: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migration(e.to_string())
    }
}
