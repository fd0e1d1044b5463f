use thiserror::Error;

/// Failures raised by a datastore session.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("datastore unavailable: {0}")]
    Unavailable(String),
}

/// Failures surfaced to callers of the reporting engine.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
