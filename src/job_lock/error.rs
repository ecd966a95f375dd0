//! Job Lock Errors

use crate::domain::DomainError;

/// Errors that can occur in the job lock store
#[derive(Debug, thiserror::Error)]
pub enum JobLockError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored row violates the lock invariant
    #[error(transparent)]
    Corrupt(#[from] DomainError),

    /// Lease does not fit the store's interval type
    #[error("Invalid lock lease: {0:?}")]
    InvalidLease(std::time::Duration),
}
