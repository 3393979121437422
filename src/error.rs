//! Error types for crm-batch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration. Raised before any work begins.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid chunk size: {0} (must be greater than zero)")]
    InvalidChunkSize(usize),

    /// A caller handed the gateway more items than one call may carry.
    #[error("batch of {len} exceeds the per-call limit of {limit}")]
    BatchTooLarge { len: usize, limit: usize },

    /// A whole gateway call failed (network or service fault).
    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("audit log error: {0}")]
    Audit(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Gateway(_) | Error::Io(_) => true,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
