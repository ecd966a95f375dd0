//! Job Lock
//!
//! Persisted marker recording whether a named background job is running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::DomainError;

/// Lock name used by the deposit clearance sweep
pub const DEPOSIT_CLEARANCE_JOB: &str = "deposit_clearance";

/// A job lock row. One per `job_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLock {
    pub job_name: String,
    pub is_locked: bool,
    pub last_run_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl JobLock {
    /// A fresh, held lock
    pub fn acquired(job_name: &str, now: DateTime<Utc>, metadata: serde_json::Value) -> Self {
        Self {
            job_name: job_name.to_string(),
            is_locked: true,
            last_run_at: now,
            locked_at: Some(now),
            metadata: Some(metadata),
        }
    }

    /// Check the `is_locked => locked_at` invariant
    pub fn validate(&self) -> Result<(), DomainError> {
        super::error::require("job_name", &self.job_name)?;
        if self.is_locked && self.locked_at.is_none() {
            return Err(DomainError::LockWithoutTimestamp(self.job_name.clone()));
        }
        Ok(())
    }

    /// Whether an acquirer may take this lock at `now`.
    ///
    /// An unlocked row is always available. A locked row is only available
    /// when a lease is configured and the lock is older than it.
    pub fn is_available(&self, now: DateTime<Utc>, lease: Option<Duration>) -> bool {
        if !self.is_locked {
            return true;
        }
        match (lease, self.locked_at) {
            (Some(lease), Some(locked_at)) => match chrono::Duration::from_std(lease) {
                Ok(lease) => locked_at + lease <= now,
                Err(_) => false,
            },
            _ => false,
        }
    }

    /// Holder token stored in the metadata while the lock is held
    pub fn holder(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("holder"))
            .and_then(|v| v.as_str())
    }
}
