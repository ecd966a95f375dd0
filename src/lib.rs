//! Deposit clearance backend library
//!
//! Re-exports modules for the server binary and integration testing.

pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod deposits;
pub mod domain;
pub mod job_lock;
pub mod jobs;
pub mod telemetry;

mod error;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use domain::{Actor, DomainError, OperationContext};
pub use jobs::{CronStatus, DepositClearanceService};
