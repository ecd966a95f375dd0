//! Deposit
//!
//! Inbound payment into a virtual account, held pending until it matures.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::error::DomainError;

/// Minimum age before a pending deposit may be cleared
pub const MATURITY_WINDOW_HOURS: i64 = 24;

/// The maturity window as a duration
pub fn maturity_window() -> chrono::Duration {
    chrono::Duration::hours(MATURITY_WINDOW_HOURS)
}

/// Deposit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Cleared,
    Failed,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Cleared => "cleared",
            DepositStatus::Failed => "failed",
        }
    }
}

impl FromStr for DepositStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DepositStatus::Pending),
            "cleared" => Ok(DepositStatus::Cleared),
            "failed" => Ok(DepositStatus::Failed),
            other => Err(DomainError::UnknownVariant {
                kind: "deposit status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deposit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_account_id: Option<Uuid>,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub reference: String,
    pub status: DepositStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleared_at: Option<DateTime<Utc>>,
}

impl Deposit {
    /// A new pending deposit created at `created_at`
    pub fn pending(
        user_id: Uuid,
        virtual_account_id: Option<Uuid>,
        amount: Decimal,
        reference: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            virtual_account_id,
            user_id,
            amount,
            reference: reference.into(),
            status: DepositStatus::Pending,
            created_at,
            cleared_at: None,
        }
    }

    /// Whether the deposit has sat for at least the maturity window
    pub fn is_matured(&self, now: DateTime<Utc>) -> bool {
        self.created_at <= maturity_cutoff(now)
    }

    /// Whether the clearance sweep should clear this deposit at `now`
    pub fn is_clearable(&self, now: DateTime<Utc>) -> bool {
        self.status == DepositStatus::Pending && self.is_matured(now)
    }

    /// Transition pending -> cleared
    pub fn clear(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != DepositStatus::Pending {
            return Err(DomainError::InvalidTransition {
                from: self.status.to_string(),
                to: DepositStatus::Cleared.to_string(),
            });
        }
        self.status = DepositStatus::Cleared;
        self.cleared_at = Some(now);
        Ok(())
    }
}

/// Deposits created at or before this instant have matured
pub fn maturity_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - maturity_window()
}
