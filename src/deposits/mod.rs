//! Deposits module
//!
//! Read and clear pending deposits for the clearance sweep.

mod memory;
mod repository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Deposit, DomainError};

pub use memory::InMemoryDepositStore;
pub use repository::PgDepositRepository;

/// Storage backend for deposits
#[async_trait]
pub trait DepositStore: Send + Sync {
    /// Pending deposits created at or before `cutoff`, oldest first. Deposits
    /// into an inactive virtual account are left out.
    async fn find_matured_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Deposit>, DepositError>;

    /// Move a deposit from pending to cleared. Returns `false` when the
    /// deposit is no longer pending.
    async fn mark_cleared(&self, id: Uuid, cleared_at: DateTime<Utc>) -> Result<bool, DepositError>;
}

/// Deposit store errors
#[derive(Debug, thiserror::Error)]
pub enum DepositError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Corrupt(#[from] DomainError),

    #[error("Deposit not found: {0}")]
    NotFound(Uuid),
}
