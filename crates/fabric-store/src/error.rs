//! Storage error types.
//!
//! Every variant maps to one `fabric-server::error::AppError` case; the
//! mapping lives where the error is raised, not here, so this crate stays
//! free of any HTTP concept.

use thiserror::Error;

/// Errors raised by the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("not found")]
    NotFound,

    /// A unique constraint was violated (duplicate name, address, or token hash).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other `sqlx`/SQLite failure not mapped to a more specific variant.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Conflict(db_err.message().to_owned())
            }
            _ => Self::Backend(err.to_string()),
        }
    }
}
