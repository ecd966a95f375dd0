//! Job Lock module
//!
//! Cross-process mutual exclusion for named background jobs.
//! Acquire and release are each a single conditional write against the
//! shared store, so two ticks (in one process or many) can never both hold
//! the same lock.

mod error;
mod memory;
mod repository;

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::JobLock;

pub use error::JobLockError;
pub use memory::InMemoryJobLockStore;
pub use repository::PgJobLockRepository;

/// Storage backend for job locks
#[async_trait]
pub trait JobLockStore: Send + Sync {
    /// Take the lock for `holder` if it is free (or its lease has run out).
    /// Returns `false` when someone else holds it.
    async fn try_acquire(
        &self,
        job_name: &str,
        holder: Uuid,
        lease: Option<Duration>,
    ) -> Result<bool, JobLockError>;

    /// Release a lock held by `holder`, recording the run time and `summary`
    /// as the lock metadata. Returns `false` if `holder` no longer owns it.
    async fn release(
        &self,
        job_name: &str,
        holder: Uuid,
        summary: serde_json::Value,
    ) -> Result<bool, JobLockError>;

    /// Release a lock regardless of holder (stuck lock recovery)
    async fn force_release(&self, job_name: &str) -> Result<bool, JobLockError>;

    /// Current lock row, if the job has ever run
    async fn get(&self, job_name: &str) -> Result<Option<JobLock>, JobLockError>;
}
