//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use uuid::Uuid;

use deposit_clearance::audit::{AuditLogEntry, AuditLogError, AuditSink, InMemoryAuditSink};
use deposit_clearance::config::ClearanceConfig;
use deposit_clearance::deposits::{DepositError, DepositStore, InMemoryDepositStore};
use deposit_clearance::domain::{Deposit, DEPOSIT_CLEARANCE_JOB};
use deposit_clearance::job_lock::{InMemoryJobLockStore, JobLockError, JobLockStore};
use deposit_clearance::DepositClearanceService;

/// A pending deposit created `age` ago
pub fn pending_deposit(age: chrono::Duration) -> Deposit {
    Deposit::pending(
        Uuid::new_v4(),
        Some(Uuid::new_v4()),
        dec!(1250.00),
        format!("PP-{}", Uuid::new_v4().simple()),
        Utc::now() - age,
    )
}

pub fn hours(h: i64) -> chrono::Duration {
    chrono::Duration::hours(h)
}

/// Service over in-memory stores
pub fn service_with(
    locks: Arc<dyn JobLockStore>,
    deposits: Arc<dyn DepositStore>,
) -> Arc<DepositClearanceService> {
    Arc::new(DepositClearanceService::new(
        locks,
        deposits,
        ClearanceConfig::default(),
    ))
}

// =========================================================================
// Deposit store doubles
// =========================================================================

/// Records what the service looked like while the sweep was scanning, and
/// can stall the scan to widen race windows.
pub struct ObservingDepositStore {
    pub inner: InMemoryDepositStore,
    pub locks: Arc<InMemoryJobLockStore>,
    pub service: OnceLock<Arc<DepositClearanceService>>,
    pub scan_delay: Option<Duration>,
    /// (service is_running, lock is_locked) seen during each scan
    pub observed: Mutex<Vec<(bool, bool)>>,
}

impl ObservingDepositStore {
    pub fn new(locks: Arc<InMemoryJobLockStore>, scan_delay: Option<Duration>) -> Self {
        Self {
            inner: InMemoryDepositStore::new(),
            locks,
            service: OnceLock::new(),
            scan_delay,
            observed: Mutex::new(Vec::new()),
        }
    }

    pub fn observed(&self) -> Vec<(bool, bool)> {
        self.observed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DepositStore for ObservingDepositStore {
    async fn find_matured_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Deposit>, DepositError> {
        let is_running = self
            .service
            .get()
            .map(|s| s.get_status().is_running)
            .unwrap_or(false);
        let is_locked = self
            .locks
            .get(DEPOSIT_CLEARANCE_JOB)
            .await
            .unwrap()
            .map(|l| l.is_locked)
            .unwrap_or(false);
        self.observed.lock().unwrap().push((is_running, is_locked));

        if let Some(delay) = self.scan_delay {
            tokio::time::sleep(delay).await;
        }

        self.inner.find_matured_pending(cutoff, limit).await
    }

    async fn mark_cleared(&self, id: Uuid, cleared_at: DateTime<Utc>) -> Result<bool, DepositError> {
        self.inner.mark_cleared(id, cleared_at).await
    }
}

/// Fails to clear the listed deposits, delegates everything else
pub struct FlakyDepositStore {
    pub inner: InMemoryDepositStore,
    pub failing: HashSet<Uuid>,
}

#[async_trait]
impl DepositStore for FlakyDepositStore {
    async fn find_matured_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Deposit>, DepositError> {
        self.inner.find_matured_pending(cutoff, limit).await
    }

    async fn mark_cleared(&self, id: Uuid, cleared_at: DateTime<Utc>) -> Result<bool, DepositError> {
        if self.failing.contains(&id) {
            return Err(DepositError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.mark_cleared(id, cleared_at).await
    }
}

/// The scan itself fails
pub struct BrokenDepositStore;

#[async_trait]
impl DepositStore for BrokenDepositStore {
    async fn find_matured_pending(
        &self,
        _cutoff: DateTime<Utc>,
        _limit: i64,
    ) -> Result<Vec<Deposit>, DepositError> {
        Err(DepositError::Database(sqlx::Error::PoolClosed))
    }

    async fn mark_cleared(&self, _id: Uuid, _cleared_at: DateTime<Utc>) -> Result<bool, DepositError> {
        unreachable!("scan never succeeds")
    }
}

/// The scan panics
pub struct PanickingDepositStore;

#[async_trait]
impl DepositStore for PanickingDepositStore {
    async fn find_matured_pending(
        &self,
        _cutoff: DateTime<Utc>,
        _limit: i64,
    ) -> Result<Vec<Deposit>, DepositError> {
        panic!("deposit index corrupted")
    }

    async fn mark_cleared(&self, _id: Uuid, _cleared_at: DateTime<Utc>) -> Result<bool, DepositError> {
        unreachable!("scan never succeeds")
    }
}

// =========================================================================
// Lock store doubles
// =========================================================================

/// Every lock operation fails
pub struct UnreachableLockStore;

#[async_trait]
impl JobLockStore for UnreachableLockStore {
    async fn try_acquire(
        &self,
        _job_name: &str,
        _holder: Uuid,
        _lease: Option<Duration>,
    ) -> Result<bool, JobLockError> {
        Err(JobLockError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn release(
        &self,
        _job_name: &str,
        _holder: Uuid,
        _summary: serde_json::Value,
    ) -> Result<bool, JobLockError> {
        Err(JobLockError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn force_release(&self, _job_name: &str) -> Result<bool, JobLockError> {
        Err(JobLockError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn get(
        &self,
        _job_name: &str,
    ) -> Result<Option<deposit_clearance::domain::JobLock>, JobLockError> {
        Err(JobLockError::Database(sqlx::Error::PoolTimedOut))
    }
}

// =========================================================================
// Audit sink doubles
// =========================================================================

/// Audit storage that is always down
pub struct FailingAuditSink;

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn record(&self, _entry: &AuditLogEntry) -> Result<(), AuditLogError> {
        Err(AuditLogError::Unavailable("audit database offline".to_string()))
    }

    async fn recent(&self, _limit: i64) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        Err(AuditLogError::Unavailable("audit database offline".to_string()))
    }
}

/// Audit storage that takes `delay` per write
pub struct SlowAuditSink {
    pub inner: InMemoryAuditSink,
    pub delay: Duration,
}

impl SlowAuditSink {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryAuditSink::new(),
            delay,
        }
    }
}

#[async_trait]
impl AuditSink for SlowAuditSink {
    async fn record(&self, entry: &AuditLogEntry) -> Result<(), AuditLogError> {
        tokio::time::sleep(self.delay).await;
        self.inner.record(entry).await
    }

    async fn recent(&self, limit: i64) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        self.inner.recent(limit).await
    }
}

/// Audit writes happen off the request path; wait until `count` have landed
pub async fn recorded(sink: &InMemoryAuditSink, count: usize) -> Vec<AuditLogEntry> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let entries = sink.entries().await;
        if entries.len() >= count || tokio::time::Instant::now() >= deadline {
            return entries;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =========================================================================
// Postgres
// =========================================================================

/// Connect to DATABASE_URL and apply the schema
pub async fn setup_test_db() -> sqlx::PgPool {
    use sqlx::Executor;

    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    // Parallel tests apply the schema one at a time
    let schema = format!(
        "SELECT pg_advisory_xact_lock(7341);\n{}",
        include_str!("../../migrations/0001_initial_schema.sql")
    );
    pool.execute(schema.as_str())
        .await
        .expect("Failed to apply schema");

    pool
}
