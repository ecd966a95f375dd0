//! Deposit Clearance Job
//!
//! Every tick: take the `deposit_clearance` lock, clear pending deposits
//! past the maturity window, release the lock. A tick that finds the lock
//! held does nothing.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::ClearanceConfig;
use crate::deposits::{DepositError, DepositStore};
use crate::domain::{maturity_cutoff, DEPOSIT_CLEARANCE_JOB};
use crate::job_lock::{JobLockError, JobLockStore};

use super::{cron_expression, JobError};

/// Point-in-time view of the job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronStatus {
    pub is_running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub cron_schedule: String,
}

/// Result of one tick
#[derive(Debug, Clone)]
pub enum SweepOutcome {
    /// Another tick or instance held the lock
    Skipped,
    Completed(ClearanceReport),
}

/// Report from one completed sweep
#[derive(Debug, Clone, Serialize)]
pub struct ClearanceReport {
    pub scanned: u64,
    pub cleared: u64,
    /// Deposits that stopped being pending between scan and clear
    pub skipped: u64,
    pub failed: u64,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ClearanceReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            scanned: 0,
            cleared: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
            started_at,
            completed_at: started_at,
        }
    }

    /// Lock metadata written on release
    fn summary(&self, failure: Option<&str>) -> serde_json::Value {
        json!({
            "scanned": self.scanned,
            "cleared": self.cleared,
            "skipped": self.skipped,
            "failed": self.failed,
            "started_at": self.started_at,
            "completed_at": self.completed_at,
            "error": failure.or(self.errors.last().map(String::as_str)),
        })
    }
}

#[derive(Debug, Default)]
struct StatusState {
    is_running: bool,
    last_run: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

// =========================================================================
// DepositClearanceService
// =========================================================================

/// Scheduler for the deposit clearance sweep.
///
/// Constructed once at startup and shared by `Arc`. The holder token
/// identifies this instance in the lock row, so release never frees a lock
/// another instance has taken over.
pub struct DepositClearanceService {
    locks: Arc<dyn JobLockStore>,
    deposits: Arc<dyn DepositStore>,
    config: ClearanceConfig,
    holder: Uuid,
    status: Mutex<StatusState>,
    timer: Mutex<Option<Timer>>,
}

/// Handle on the running timer loop
struct Timer {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Timer {
    fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl DepositClearanceService {
    /// Create a new service
    pub fn new(
        locks: Arc<dyn JobLockStore>,
        deposits: Arc<dyn DepositStore>,
        config: ClearanceConfig,
    ) -> Self {
        Self {
            locks,
            deposits,
            config,
            holder: Uuid::new_v4(),
            status: Mutex::new(StatusState::default()),
            timer: Mutex::new(None),
        }
    }

    /// Token this instance writes into the lock it holds
    pub fn holder(&self) -> Uuid {
        self.holder
    }

    /// Snapshot of the job's health
    pub fn get_status(&self) -> CronStatus {
        let state = self.state();
        CronStatus {
            is_running: state.is_running,
            last_run: state.last_run,
            last_error: state.last_error.clone(),
            cron_schedule: cron_expression(self.config.interval),
        }
    }

    /// Start the recurring sweep. Calling again while the timer runs does
    /// nothing.
    pub fn start_deposit_clearance_job(self: &Arc<Self>) {
        let mut timer = lock_ignoring_poison(&self.timer);
        if timer.as_ref().is_some_and(Timer::is_active) {
            tracing::debug!("Deposit clearance job already scheduled");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            service.run(shutdown_rx).await;
        });
        *timer = Some(Timer { shutdown, handle });

        tracing::info!(
            schedule = %cron_expression(self.config.interval),
            holder = %self.holder,
            "Deposit clearance job scheduled"
        );
    }

    /// Whether the recurring timer is active
    pub fn is_scheduled(&self) -> bool {
        lock_ignoring_poison(&self.timer)
            .as_ref()
            .is_some_and(Timer::is_active)
    }

    /// Stop the recurring sweep. An in-flight tick runs to completion,
    /// lock release included, before this returns.
    pub async fn stop(&self) {
        let timer = lock_ignoring_poison(&self.timer).take();
        let Some(timer) = timer else {
            return;
        };

        // Err only when the loop already exited
        let _ = timer.shutdown.send(true);
        if let Err(e) = timer.handle.await {
            tracing::error!(error = %e, "Deposit clearance timer ended abnormally");
        }
        tracing::info!("Deposit clearance job stopped");
    }

    /// Timer loop. The first sweep happens one interval after start; the
    /// loop only observes shutdown between ticks.
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            match self.run_once().await {
                Ok(SweepOutcome::Skipped) => {}
                Ok(SweepOutcome::Completed(report)) => {
                    if report.cleared > 0 || report.failed > 0 {
                        tracing::info!(
                            cleared = report.cleared,
                            failed = report.failed,
                            skipped = report.skipped,
                            "Deposit clearance sweep finished"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Deposit clearance sweep failed");
                }
            }
        }
    }

    // =========================================================================
    // Single tick
    // =========================================================================

    /// Run one tick: acquire, sweep, release.
    ///
    /// Returns `Skipped` when the lock is held elsewhere. The tick runs on
    /// its own task, so dropping the returned future (client disconnect,
    /// timeout) does not interrupt it. Once the lock has been acquired it is
    /// released whether the sweep succeeded, failed, or panicked.
    pub async fn run_once(self: &Arc<Self>) -> Result<SweepOutcome, JobError> {
        let service = Arc::clone(self);
        match tokio::spawn(async move { service.tick().await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(JobError::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(JobError::Cancelled),
        }
    }

    async fn tick(&self) -> Result<SweepOutcome, JobError> {
        let acquired = match self
            .locks
            .try_acquire(DEPOSIT_CLEARANCE_JOB, self.holder, self.config.lock_lease)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::error!(error = %e, "Failed to acquire deposit clearance lock");
                self.state().last_error = Some(format!("Lock acquisition failed: {}", e));
                return Err(JobError::Lock(e));
            }
        };

        if !acquired {
            tracing::debug!(job = DEPOSIT_CLEARANCE_JOB, "Lock held elsewhere, skipping tick");
            return Ok(SweepOutcome::Skipped);
        }

        let started_at = Utc::now();
        self.state().is_running = true;

        let (report, failure) = match AssertUnwindSafe(self.sweep(started_at)).catch_unwind().await {
            Ok(Ok(report)) => (report, None),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Deposit clearance scan failed");
                (ClearanceReport::new(started_at), Some(JobError::Deposit(e)))
            }
            Err(panic) => {
                let message = panic_message(panic);
                tracing::error!(panic = %message, "Deposit clearance sweep panicked");
                (ClearanceReport::new(started_at), Some(JobError::Panicked(message)))
            }
        };

        let failure_message = failure.as_ref().map(|e| e.to_string());
        {
            let mut state = self.state();
            state.is_running = false;
            state.last_run = Some(Utc::now());
            state.last_error = failure_message
                .clone()
                .or_else(|| report.errors.last().cloned());
        }

        self.release(&report, failure_message.as_deref()).await?;

        match failure {
            Some(e) => Err(e),
            None => Ok(SweepOutcome::Completed(report)),
        }
    }

    /// Scan matured pending deposits and clear each one. Individual failures
    /// are collected, not propagated.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<ClearanceReport, DepositError> {
        let mut report = ClearanceReport::new(now);

        let matured = self
            .deposits
            .find_matured_pending(maturity_cutoff(now), self.config.batch_size)
            .await?;
        report.scanned = matured.len() as u64;

        for deposit in &matured {
            match self.deposits.mark_cleared(deposit.id, Utc::now()).await {
                Ok(true) => {
                    report.cleared += 1;
                    tracing::info!(
                        deposit_id = %deposit.id,
                        user_id = %deposit.user_id,
                        amount = %deposit.amount,
                        reference = %deposit.reference,
                        "Deposit cleared"
                    );
                }
                Ok(false) => {
                    report.skipped += 1;
                    tracing::debug!(deposit_id = %deposit.id, "Deposit no longer pending");
                }
                Err(e) => {
                    report.failed += 1;
                    report.errors.push(format!("Deposit {}: {}", deposit.id, e));
                    tracing::error!(deposit_id = %deposit.id, error = %e, "Failed to clear deposit");
                }
            }
        }

        report.completed_at = Utc::now();
        Ok(report)
    }

    async fn release(
        &self,
        report: &ClearanceReport,
        failure: Option<&str>,
    ) -> Result<(), JobLockError> {
        match self
            .locks
            .release(DEPOSIT_CLEARANCE_JOB, self.holder, report.summary(failure))
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(
                    holder = %self.holder,
                    "Deposit clearance lock was no longer held by this instance at release"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to release deposit clearance lock");
                self.state().last_error = Some(format!("Lock release failed: {}", e));
                Err(e)
            }
        }
    }

    /// Release the lock whoever holds it. Used to recover from an instance
    /// that died mid-sweep.
    pub async fn force_unlock(&self) -> Result<bool, JobLockError> {
        self.locks.force_release(DEPOSIT_CLEARANCE_JOB).await
    }

    fn state(&self) -> MutexGuard<'_, StatusState> {
        lock_ignoring_poison(&self.status)
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
