//! Virtual Account
//!
//! Provider-issued bank account that receives deposits on a user's behalf.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::error::{require, DomainError};

/// Virtual account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            other => Err(DomainError::UnknownVariant {
                kind: "account status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Virtual account record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_number: String,
    pub account_name: String,
    pub bank_name: String,
    pub bank_type: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default)]
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VirtualAccount {
    /// Validate field contents
    pub fn validate(&self) -> Result<(), DomainError> {
        require("account_number", &self.account_number)?;
        require("account_name", &self.account_name)?;
        require("bank_name", &self.bank_name)?;
        require("bank_type", &self.bank_type)?;
        require("email", &self.email)?;

        if !self.account_number.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::invalid("account_number", "must contain only digits"));
        }

        validate_email(&self.email)?;

        if let Some(alias) = &self.alias {
            require("alias", alias)?;
        }

        Ok(())
    }

    /// Whether deposits into this account are processed
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

fn validate_email(email: &str) -> Result<(), DomainError> {
    let mut parts = email.splitn(2, '@');
    let local = parts.next().unwrap_or_default();
    let domain = parts.next().unwrap_or_default();

    if local.is_empty() || domain.is_empty() || !domain.contains('.') || domain.contains('@') {
        return Err(DomainError::invalid("email", format!("'{}' is not an email address", email)));
    }
    Ok(())
}
