//! In-memory job lock store for tests and single-process development.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::JobLock;

use super::{JobLockError, JobLockStore};

/// Job locks held in a mutex-guarded map
#[derive(Debug, Default)]
pub struct InMemoryJobLockStore {
    locks: Mutex<HashMap<String, JobLock>>,
}

impl InMemoryJobLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a lock row as if another process held it
    pub async fn insert(&self, lock: JobLock) {
        self.locks.lock().await.insert(lock.job_name.clone(), lock);
    }
}

#[async_trait]
impl JobLockStore for InMemoryJobLockStore {
    async fn try_acquire(
        &self,
        job_name: &str,
        holder: Uuid,
        lease: Option<Duration>,
    ) -> Result<bool, JobLockError> {
        let now = Utc::now();
        let mut locks = self.locks.lock().await;

        match locks.get_mut(job_name) {
            Some(lock) => {
                if !lock.is_available(now, lease) {
                    return Ok(false);
                }
                let mut metadata = lock
                    .metadata
                    .take()
                    .filter(|m| m.is_object())
                    .unwrap_or_else(|| json!({}));
                metadata["holder"] = json!(holder.to_string());
                lock.is_locked = true;
                lock.locked_at = Some(now);
                lock.metadata = Some(metadata);
            }
            None => {
                locks.insert(
                    job_name.to_string(),
                    JobLock::acquired(job_name, now, json!({ "holder": holder.to_string() })),
                );
            }
        }

        Ok(true)
    }

    async fn release(
        &self,
        job_name: &str,
        holder: Uuid,
        summary: serde_json::Value,
    ) -> Result<bool, JobLockError> {
        let mut locks = self.locks.lock().await;

        let Some(lock) = locks.get_mut(job_name) else {
            return Ok(false);
        };

        let holder = holder.to_string();
        if !lock.is_locked || lock.holder() != Some(holder.as_str()) {
            return Ok(false);
        }

        lock.is_locked = false;
        lock.locked_at = None;
        lock.last_run_at = Utc::now();
        lock.metadata = Some(summary);
        Ok(true)
    }

    async fn force_release(&self, job_name: &str) -> Result<bool, JobLockError> {
        let mut locks = self.locks.lock().await;

        match locks.get_mut(job_name) {
            Some(lock) if lock.is_locked => {
                lock.is_locked = false;
                lock.locked_at = None;
                let mut metadata = lock.metadata.take().unwrap_or_else(|| json!({}));
                if let Some(map) = metadata.as_object_mut() {
                    map.remove("holder");
                    map.insert("released_manually_at".to_string(), json!(Utc::now()));
                }
                lock.metadata = Some(metadata);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, job_name: &str) -> Result<Option<JobLock>, JobLockError> {
        Ok(self.locks.lock().await.get(job_name).cloned())
    }
}
