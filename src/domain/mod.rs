//! Domain module
//!
//! Persisted record shapes and their invariants.

pub mod communication;
pub mod context;
pub mod deposit;
pub mod error;
pub mod job_lock;
pub mod virtual_account;

pub use communication::{Communication, RecipientType};
pub use context::{Actor, OperationContext};
pub use deposit::{maturity_cutoff, Deposit, DepositStatus, MATURITY_WINDOW_HOURS};
pub use error::DomainError;
pub use job_lock::{JobLock, DEPOSIT_CLEARANCE_JOB};
pub use virtual_account::{AccountStatus, VirtualAccount};
