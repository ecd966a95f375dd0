//! Deposit clearance job tests against in-memory stores

use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use uuid::Uuid;

use deposit_clearance::config::ClearanceConfig;
use deposit_clearance::deposits::InMemoryDepositStore;
use deposit_clearance::domain::{DepositStatus, JobLock, DEPOSIT_CLEARANCE_JOB};
use deposit_clearance::job_lock::{InMemoryJobLockStore, JobLockStore};
use deposit_clearance::jobs::{DepositClearanceService, JobError, SweepOutcome};

mod common;
use common::{hours, pending_deposit, service_with};

fn held_by_other(locked_minutes_ago: i64) -> JobLock {
    let locked_at = Utc::now() - chrono::Duration::minutes(locked_minutes_ago);
    JobLock::acquired(
        DEPOSIT_CLEARANCE_JOB,
        locked_at,
        json!({ "holder": Uuid::new_v4().to_string() }),
    )
}

async fn is_locked(locks: &InMemoryJobLockStore) -> bool {
    locks
        .get(DEPOSIT_CLEARANCE_JOB)
        .await
        .unwrap()
        .map(|l| l.is_locked)
        .unwrap_or(false)
}

#[tokio::test]
async fn test_clears_matured_pending_deposits_only() {
    let locks = Arc::new(InMemoryJobLockStore::new());
    let deposits = Arc::new(InMemoryDepositStore::new());

    let old = pending_deposit(hours(25));
    let exact = pending_deposit(hours(24));
    let young = pending_deposit(hours(23) + chrono::Duration::minutes(59));
    let mut failed = pending_deposit(hours(48));
    failed.status = DepositStatus::Failed;
    let mut cleared = pending_deposit(hours(72));
    let earlier = Utc::now() - hours(40);
    cleared.status = DepositStatus::Cleared;
    cleared.cleared_at = Some(earlier);

    for d in [&old, &exact, &young, &failed, &cleared] {
        deposits.insert(d.clone()).await;
    }

    let service = service_with(locks.clone(), deposits.clone());
    let outcome = assert_ok!(service.run_once().await);

    let SweepOutcome::Completed(report) = outcome else {
        panic!("expected a completed sweep");
    };
    assert_eq!(report.scanned, 2);
    assert_eq!(report.cleared, 2);
    assert_eq!(report.failed, 0);

    assert_eq!(deposits.get(old.id).await.unwrap().status, DepositStatus::Cleared);
    assert!(deposits.get(old.id).await.unwrap().cleared_at.is_some());
    assert_eq!(deposits.get(exact.id).await.unwrap().status, DepositStatus::Cleared);
    assert_eq!(deposits.get(young.id).await.unwrap().status, DepositStatus::Pending);
    assert_eq!(deposits.get(failed.id).await.unwrap().status, DepositStatus::Failed);

    // Already cleared deposits keep their original clearance time
    let untouched = deposits.get(cleared.id).await.unwrap();
    assert_eq!(untouched.cleared_at, Some(earlier));

    let status = service.get_status();
    assert!(!status.is_running);
    assert!(status.last_run.is_some());
    assert!(status.last_error.is_none());
    assert!(!is_locked(&locks).await);
}

#[tokio::test]
async fn test_held_lock_skips_without_touching_deposits() {
    let locks = Arc::new(InMemoryJobLockStore::new());
    locks.insert(held_by_other(1)).await;
    let deposits = Arc::new(InMemoryDepositStore::new());
    let deposit = pending_deposit(hours(30));
    deposits.insert(deposit.clone()).await;

    let service = service_with(locks.clone(), deposits.clone());
    let outcome = service.run_once().await.unwrap();

    assert!(matches!(outcome, SweepOutcome::Skipped));
    assert_eq!(deposits.get(deposit.id).await.unwrap().status, DepositStatus::Pending);

    // The other holder keeps its lock
    assert!(is_locked(&locks).await);

    let status = service.get_status();
    assert!(status.last_run.is_none());
    assert!(!status.is_running);
}

#[tokio::test]
async fn test_lock_is_held_and_running_only_during_sweep() {
    let locks = Arc::new(InMemoryJobLockStore::new());
    let observer = Arc::new(common::ObservingDepositStore::new(locks.clone(), None));
    observer.inner.insert(pending_deposit(hours(26))).await;

    let service = service_with(locks.clone(), observer.clone());
    let _ = observer.service.set(service.clone());

    assert!(!service.get_status().is_running);
    assert!(!is_locked(&locks).await);

    service.run_once().await.unwrap();

    assert_eq!(observer.observed(), vec![(true, true)]);
    assert!(!service.get_status().is_running);
    assert!(!is_locked(&locks).await);
}

#[tokio::test]
async fn test_concurrent_ticks_run_one_sweep() {
    let locks = Arc::new(InMemoryJobLockStore::new());
    let observer = Arc::new(common::ObservingDepositStore::new(
        locks.clone(),
        Some(Duration::from_millis(100)),
    ));
    let deposit = pending_deposit(hours(36));
    observer.inner.insert(deposit.clone()).await;

    // Two instances sharing the lock table
    let first = service_with(locks.clone(), observer.clone());
    let second = service_with(locks.clone(), observer.clone());

    let (a, b) = tokio::join!(first.run_once(), second.run_once());
    let outcomes = [a.unwrap(), b.unwrap()];

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, SweepOutcome::Completed(_)))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, SweepOutcome::Skipped))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(skipped, 1);

    // Only one scan ever happened
    assert_eq!(observer.observed().len(), 1);
    assert_eq!(
        observer.inner.get(deposit.id).await.unwrap().status,
        DepositStatus::Cleared
    );
    assert!(!is_locked(&locks).await);
}

#[tokio::test]
async fn test_partial_failure_records_error_and_releases() {
    let locks = Arc::new(InMemoryJobLockStore::new());
    let inner = InMemoryDepositStore::new();

    let good_a = pending_deposit(hours(30));
    let bad = pending_deposit(hours(29));
    let good_b = pending_deposit(hours(28));
    for d in [&good_a, &bad, &good_b] {
        inner.insert(d.clone()).await;
    }

    let deposits = Arc::new(common::FlakyDepositStore {
        inner,
        failing: HashSet::from([bad.id]),
    });
    let service = service_with(locks.clone(), deposits.clone());

    let SweepOutcome::Completed(report) = service.run_once().await.unwrap() else {
        panic!("expected a completed sweep");
    };
    assert_eq!(report.scanned, 3);
    assert_eq!(report.cleared, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains(&bad.id.to_string()));

    let status = service.get_status();
    let last_error = status.last_error.expect("last_error should be set");
    assert!(last_error.contains(&bad.id.to_string()));

    assert_eq!(deposits.inner.get(bad.id).await.unwrap().status, DepositStatus::Pending);
    assert_eq!(deposits.inner.get(good_b.id).await.unwrap().status, DepositStatus::Cleared);

    // Summary lands in the released lock's metadata
    let lock = locks.get(DEPOSIT_CLEARANCE_JOB).await.unwrap().unwrap();
    assert!(!lock.is_locked);
    assert_eq!(lock.metadata.as_ref().unwrap()["cleared"], 2);
    assert_eq!(lock.metadata.as_ref().unwrap()["failed"], 1);
}

#[tokio::test]
async fn test_scan_failure_releases_lock() {
    let locks = Arc::new(InMemoryJobLockStore::new());
    let service = service_with(locks.clone(), Arc::new(common::BrokenDepositStore));

    let result = service.run_once().await;

    assert!(matches!(result, Err(JobError::Deposit(_))));
    assert!(!is_locked(&locks).await);

    let status = service.get_status();
    assert!(!status.is_running);
    assert!(status.last_run.is_some());
    assert!(status.last_error.is_some());
}

#[tokio::test]
async fn test_panic_in_sweep_releases_lock() {
    let locks = Arc::new(InMemoryJobLockStore::new());
    let service = service_with(locks.clone(), Arc::new(common::PanickingDepositStore));

    let result = service.run_once().await;

    match result {
        Err(JobError::Panicked(message)) => assert!(message.contains("deposit index corrupted")),
        other => panic!("expected panic error, got {:?}", other),
    }
    assert!(!is_locked(&locks).await);

    let status = service.get_status();
    assert!(!status.is_running);
    assert!(status.last_error.unwrap().contains("deposit index corrupted"));

    // The next tick can acquire again
    let recovered = service_with(locks.clone(), Arc::new(InMemoryDepositStore::new()));
    assert!(matches!(
        recovered.run_once().await.unwrap(),
        SweepOutcome::Completed(_)
    ));
}

#[tokio::test]
async fn test_lock_store_failure_reports_error() {
    let service = service_with(
        Arc::new(common::UnreachableLockStore),
        Arc::new(InMemoryDepositStore::new()),
    );

    let result = service.run_once().await;

    assert!(matches!(result, Err(JobError::Lock(_))));
    let status = service.get_status();
    assert!(!status.is_running);
    assert!(status.last_run.is_none());
    assert!(status
        .last_error
        .unwrap()
        .starts_with("Lock acquisition failed"));
}

#[tokio::test]
async fn test_stale_lock_needs_lease_or_manual_release() {
    let deposits = Arc::new(InMemoryDepositStore::new());
    let deposit = pending_deposit(hours(50));
    deposits.insert(deposit.clone()).await;

    // Without a lease a stuck lock stays stuck
    let locks = Arc::new(InMemoryJobLockStore::new());
    locks.insert(held_by_other(180)).await;
    let service = service_with(locks.clone(), deposits.clone());
    assert!(matches!(service.run_once().await.unwrap(), SweepOutcome::Skipped));

    // Manual release frees it
    assert!(service.force_unlock().await.unwrap());
    assert!(!service.force_unlock().await.unwrap());
    assert!(matches!(
        service.run_once().await.unwrap(),
        SweepOutcome::Completed(_)
    ));
    assert_eq!(deposits.get(deposit.id).await.unwrap().status, DepositStatus::Cleared);
}

#[tokio::test]
async fn test_expired_lease_is_taken_over() {
    let locks = Arc::new(InMemoryJobLockStore::new());
    locks.insert(held_by_other(180)).await;

    let config = ClearanceConfig {
        lock_lease: Some(Duration::from_secs(3600)),
        ..ClearanceConfig::default()
    };
    let service = Arc::new(DepositClearanceService::new(
        locks.clone(),
        Arc::new(InMemoryDepositStore::new()),
        config,
    ));

    assert!(matches!(
        service.run_once().await.unwrap(),
        SweepOutcome::Completed(_)
    ));
    assert!(!is_locked(&locks).await);

    // A fresh lock is within the lease
    locks.insert(held_by_other(5)).await;
    assert!(matches!(service.run_once().await.unwrap(), SweepOutcome::Skipped));
}

#[tokio::test]
async fn test_scheduled_job_runs_and_stops() {
    let locks = Arc::new(InMemoryJobLockStore::new());
    let deposits = Arc::new(InMemoryDepositStore::new());
    let deposit = pending_deposit(hours(24) + chrono::Duration::minutes(5));
    deposits.insert(deposit.clone()).await;

    let config = ClearanceConfig {
        interval: Duration::from_millis(50),
        ..ClearanceConfig::default()
    };
    let service = Arc::new(DepositClearanceService::new(locks, deposits.clone(), config));

    assert!(!service.is_scheduled());
    service.start_deposit_clearance_job();
    service.start_deposit_clearance_job();
    assert!(service.is_scheduled());

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(deposits.get(deposit.id).await.unwrap().status, DepositStatus::Cleared);
    assert!(service.get_status().last_run.is_some());
    assert_eq!(service.get_status().cron_schedule, "every 50ms");

    service.stop().await;
    assert!(!service.is_scheduled());
}

/// Wait for an in-flight tick to finish on its own
async fn settle(service: &DepositClearanceService, locks: &InMemoryJobLockStore) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while (service.get_status().is_running || is_locked(locks).await)
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_abandoned_tick_still_releases_lock() {
    let locks = Arc::new(InMemoryJobLockStore::new());
    let observer = Arc::new(common::ObservingDepositStore::new(
        locks.clone(),
        Some(Duration::from_millis(200)),
    ));
    let deposit = pending_deposit(hours(30));
    observer.inner.insert(deposit.clone()).await;
    let service = service_with(locks.clone(), observer.clone());
    let _ = observer.service.set(service.clone());

    // Caller gives up mid-scan, like a disconnected client
    let abandoned = tokio::time::timeout(Duration::from_millis(50), service.run_once()).await;
    assert!(abandoned.is_err());
    assert_eq!(observer.observed(), vec![(true, true)]);

    settle(&service, &locks).await;

    assert!(!is_locked(&locks).await);
    let status = service.get_status();
    assert!(!status.is_running);
    assert!(status.last_run.is_some());
    assert_eq!(
        observer.inner.get(deposit.id).await.unwrap().status,
        DepositStatus::Cleared
    );

    // The next tick is not blocked
    assert!(matches!(
        service.run_once().await.unwrap(),
        SweepOutcome::Completed(_)
    ));
}

#[tokio::test]
async fn test_stop_during_sweep_waits_for_release() {
    let locks = Arc::new(InMemoryJobLockStore::new());
    let observer = Arc::new(common::ObservingDepositStore::new(
        locks.clone(),
        Some(Duration::from_millis(200)),
    ));
    let deposit = pending_deposit(hours(30));
    observer.inner.insert(deposit.clone()).await;

    let config = ClearanceConfig {
        interval: Duration::from_millis(20),
        ..ClearanceConfig::default()
    };
    let service = Arc::new(DepositClearanceService::new(locks.clone(), observer.clone(), config));
    service.start_deposit_clearance_job();

    // Wait until a sweep is scanning
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while observer.observed().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(observer.observed().len(), 1);

    service.stop().await;

    assert!(!service.is_scheduled());
    assert!(!is_locked(&locks).await);
    assert!(!service.get_status().is_running);
    assert_eq!(
        observer.inner.get(deposit.id).await.unwrap().status,
        DepositStatus::Cleared
    );

    // No ticks after stop
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(observer.observed().len(), 1);
}
