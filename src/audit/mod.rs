//! Audit Log Service
//!
//! Records who performed which action on audited endpoints, and whether it
//! succeeded. Entries are append-only.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{Actor, DomainError, OperationContext};

pub use memory::InMemoryAuditSink;

// =========================================================================
// Audit entry types
// =========================================================================

/// Audit log entry as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub actor_type: String,
    pub actor_id: Option<Uuid>,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub outcome: AuditOutcome,
    pub correlation_id: Option<Uuid>,
    pub client_ip: Option<IpAddr>,
    pub created_at: DateTime<Utc>,
}

/// Whether the audited request succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    /// Any non-error HTTP status counts as success
    pub fn from_status(status: u16) -> Self {
        if status < 400 {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
        }
    }
}

impl FromStr for AuditOutcome {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AuditOutcome::Success),
            "failure" => Ok(AuditOutcome::Failure),
            other => Err(DomainError::UnknownVariant {
                kind: "audit outcome",
                value: other.to_string(),
            }),
        }
    }
}

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    CronStatusViewed,
    DepositClearanceTriggered,
    JobLockReleased,
    AuditLogsViewed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CronStatusViewed => "cron.status_viewed",
            AuditAction::DepositClearanceTriggered => "cron.deposit_clearance_triggered",
            AuditAction::JobLockReleased => "cron.lock_released",
            AuditAction::AuditLogsViewed => "audit.logs_viewed",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder for creating audit log entries
#[derive(Debug, Clone)]
pub struct AuditLogBuilder {
    action: String,
    actor: Actor,
    method: String,
    path: String,
    status_code: u16,
    correlation_id: Option<Uuid>,
    client_ip: Option<IpAddr>,
}

impl AuditLogBuilder {
    /// Create a new audit log builder
    pub fn new(action: AuditAction) -> Self {
        Self::custom(action.as_str())
    }

    /// Create with custom action string
    pub fn custom(action: &str) -> Self {
        Self {
            action: action.to_string(),
            actor: Actor::Anonymous,
            method: String::new(),
            path: String::new(),
            status_code: 200,
            correlation_id: None,
            client_ip: None,
        }
    }

    /// Take actor, correlation id and client IP from the request context
    pub fn context(mut self, context: &OperationContext) -> Self {
        self.actor = context.actor();
        self.correlation_id = context.correlation_id;
        self.client_ip = context.client_ip;
        self
    }

    /// Set the HTTP request line
    pub fn request(mut self, method: &str, path: &str) -> Self {
        self.method = method.to_string();
        self.path = path.to_string();
        self
    }

    /// Set the response status
    pub fn status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    /// Finalize into an entry stamped now
    pub fn build(self) -> AuditLogEntry {
        AuditLogEntry {
            id: Uuid::new_v4(),
            action: self.action,
            actor_type: self.actor.kind().to_string(),
            actor_id: self.actor.id(),
            method: self.method,
            path: self.path,
            status_code: self.status_code,
            outcome: AuditOutcome::from_status(self.status_code),
            correlation_id: self.correlation_id,
            client_ip: self.client_ip,
            created_at: Utc::now(),
        }
    }
}

// =========================================================================
// Storage
// =========================================================================

/// Destination for audit entries
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one entry
    async fn record(&self, entry: &AuditLogEntry) -> Result<(), AuditLogError>;

    /// Most recent entries, newest first
    async fn recent(&self, limit: i64) -> Result<Vec<AuditLogEntry>, AuditLogError>;
}

type AuditRow = (
    Uuid,
    String,
    String,
    Option<Uuid>,
    String,
    String,
    i32,
    String,
    Option<Uuid>,
    Option<String>,
    DateTime<Utc>,
);

/// Postgres-backed audit log
#[derive(Debug, Clone)]
pub struct AuditLogService {
    pool: PgPool,
}

impl AuditLogService {
    /// Create a new AuditLogService
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for AuditLogService {
    async fn record(&self, entry: &AuditLogEntry) -> Result<(), AuditLogError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, action, actor_type, actor_id, method, path,
                status_code, outcome, correlation_id, client_ip, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::inet, $11)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.action)
        .bind(&entry.actor_type)
        .bind(entry.actor_id)
        .bind(&entry.method)
        .bind(&entry.path)
        .bind(i32::from(entry.status_code))
        .bind(entry.outcome.as_str())
        .bind(entry.correlation_id)
        .bind(entry.client_ip.map(|ip| ip.to_string()))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            audit_id = %entry.id,
            action = %entry.action,
            "Audit log entry created"
        );

        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, action, actor_type, actor_id, method, path,
                   status_code, outcome, correlation_id, client_ip::text, created_at
            FROM audit_logs
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(into_entry).collect()
    }
}

fn into_entry(row: AuditRow) -> Result<AuditLogEntry, AuditLogError> {
    let (
        id,
        action,
        actor_type,
        actor_id,
        method,
        path,
        status_code,
        outcome,
        correlation_id,
        client_ip,
        created_at,
    ) = row;

    let status_code = u16::try_from(status_code).map_err(|_| {
        DomainError::invalid("status_code", format!("{} is not an HTTP status", status_code))
    })?;

    // inet::text carries a prefix length, e.g. "10.0.0.1/32"
    let client_ip = client_ip
        .map(|raw| {
            let addr = raw.split('/').next().unwrap_or_default();
            addr.parse::<IpAddr>()
                .map_err(|_| DomainError::invalid("client_ip", raw.clone()))
        })
        .transpose()?;

    Ok(AuditLogEntry {
        id,
        action,
        actor_type,
        actor_id,
        method,
        path,
        status_code,
        outcome: outcome.parse::<AuditOutcome>()?,
        correlation_id,
        client_ip,
        created_at,
    })
}

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditLogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored row does not decode
    #[error(transparent)]
    Corrupt(#[from] DomainError),

    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),
}

// =========================================================================
// Tests
// =========================================================================
