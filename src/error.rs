use thiserror::Error;

use crate::app::BatchReport;

/// Errors raised by a [`crate::store::TableStore`] backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached. Fallback stores recover from this.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend was reached but refused the statement.
    #[error("store rejected request: {0}")]
    Rejected(String),

    #[error("{table} record not found: {id}")]
    NotFound { table: &'static str, id: String },

    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Local mirror file could not be read or written.
    #[error("local mirror failed: {0}")]
    Mirror(String),
}

impl StoreError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            other => StoreError::Rejected(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Mirror(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Mirror(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by coordinator commands.
#[derive(Error, Debug)]
pub enum AppError {
    /// Input was refused before anything was written.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("this action must be confirmed before it is applied")]
    ConfirmationRequired,

    #[error("batch partially failed: {} committed, {} failed", .0.committed.len(), .0.failed.len())]
    PartialBatch(BatchReport),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
