//! Scheduled Jobs
//!
//! Background jobs run on a fixed cadence by a process-local timer.
//! Cross-instance exclusion comes from the persisted job lock, not from
//! the timer.

mod deposit_clearance;

use std::time::Duration;

use crate::deposits::DepositError;
use crate::job_lock::JobLockError;

pub use deposit_clearance::{ClearanceReport, CronStatus, DepositClearanceService, SweepOutcome};

/// Render a timer interval as the cron expression it is equivalent to.
/// Intervals with no cron equivalent are described in seconds.
pub fn cron_expression(interval: Duration) -> String {
    if interval.subsec_millis() != 0 || interval.as_secs() == 0 {
        return format!("every {}ms", interval.as_millis());
    }

    let secs = interval.as_secs();
    match secs {
        60 => "* * * * *".to_string(),
        s if s % 60 == 0 && s < 3600 && 60 % (s / 60) == 0 => format!("*/{} * * * *", s / 60),
        3600 => "0 * * * *".to_string(),
        s if s % 3600 == 0 && s < 86_400 && 24 % (s / 3600) == 0 => {
            format!("0 */{} * * *", s / 3600)
        }
        s => format!("every {}s", s),
    }
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Lock store error: {0}")]
    Lock(#[from] JobLockError),

    #[error("Deposit store error: {0}")]
    Deposit(#[from] DepositError),

    #[error("Sweep panicked: {0}")]
    Panicked(String),

    #[error("Sweep task was cancelled")]
    Cancelled,
}
