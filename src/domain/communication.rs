//! Communication
//!
//! A broadcast message sent by an admin to a set of tenants. Immutable once
//! created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::error::{require, DomainError};

/// Who a communication is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    All,
    Active,
    Specific,
}

impl RecipientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientType::All => "all",
            RecipientType::Active => "active",
            RecipientType::Specific => "specific",
        }
    }
}

impl FromStr for RecipientType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(RecipientType::All),
            "active" => Ok(RecipientType::Active),
            "specific" => Ok(RecipientType::Specific),
            other => Err(DomainError::UnknownVariant {
                kind: "recipient type",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for RecipientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Communication record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Communication {
    pub id: Uuid,
    pub recipient_type: RecipientType,
    pub recipient_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_tenants: Option<Vec<Uuid>>,
    pub subject: String,
    pub message: String,
    pub sent_by: Uuid,
    pub sent_at: DateTime<Utc>,
}

impl Communication {
    /// Build a validated communication sent now
    pub fn new(
        recipient_type: RecipientType,
        recipient_count: i32,
        selected_tenants: Option<Vec<Uuid>>,
        subject: impl Into<String>,
        message: impl Into<String>,
        sent_by: Uuid,
    ) -> Result<Self, DomainError> {
        let communication = Self {
            id: Uuid::new_v4(),
            recipient_type,
            recipient_count,
            selected_tenants,
            subject: subject.into(),
            message: message.into(),
            sent_by,
            sent_at: Utc::now(),
        };
        communication.validate()?;
        Ok(communication)
    }

    /// Validate field contents
    pub fn validate(&self) -> Result<(), DomainError> {
        require("subject", &self.subject)?;
        require("message", &self.message)?;

        if self.recipient_count < 0 {
            return Err(DomainError::invalid("recipient_count", "must not be negative"));
        }

        // selected_tenants is present iff the recipients are hand-picked
        match (self.recipient_type, &self.selected_tenants) {
            (RecipientType::Specific, None) => {
                Err(DomainError::MissingField("selected_tenants"))
            }
            (RecipientType::Specific, Some(tenants)) if tenants.is_empty() => Err(
                DomainError::invalid("selected_tenants", "must name at least one tenant"),
            ),
            (RecipientType::All | RecipientType::Active, Some(_)) => Err(DomainError::invalid(
                "selected_tenants",
                format!("not allowed for recipient type '{}'", self.recipient_type),
            )),
            _ => Ok(()),
        }
    }
}
