//! Deposit Repository
//!
//! PostgreSQL-backed deposit reads and the pending -> cleared transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Deposit, DepositStatus};

use super::{DepositError, DepositStore};

type DepositRow = (
    Uuid,
    Option<Uuid>,
    Uuid,
    Decimal,
    String,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

/// Deposit repository over a Postgres pool
#[derive(Debug, Clone)]
pub struct PgDepositRepository {
    pool: PgPool,
}

impl PgDepositRepository {
    /// Create a new PgDepositRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_deposit(row: DepositRow) -> Result<Deposit, DepositError> {
    let (id, virtual_account_id, user_id, amount, reference, status, created_at, cleared_at) = row;
    Ok(Deposit {
        id,
        virtual_account_id,
        user_id,
        amount,
        reference,
        status: status.parse::<DepositStatus>()?,
        created_at,
        cleared_at,
    })
}

#[async_trait]
impl DepositStore for PgDepositRepository {
    async fn find_matured_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Deposit>, DepositError> {
        let rows: Vec<DepositRow> = sqlx::query_as(
            r#"
            SELECT d.id, d.virtual_account_id, d.user_id, d.amount, d.reference,
                   d.status, d.created_at, d.cleared_at
            FROM deposits d
            LEFT JOIN virtual_accounts va ON va.id = d.virtual_account_id
            WHERE d.status = 'pending'
              AND d.created_at <= $1
              AND va.status IS DISTINCT FROM 'inactive'
            ORDER BY d.created_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(into_deposit).collect()
    }

    async fn mark_cleared(&self, id: Uuid, cleared_at: DateTime<Utc>) -> Result<bool, DepositError> {
        // Only pending rows transition
        let result = sqlx::query(
            r#"
            UPDATE deposits
            SET status = 'cleared', cleared_at = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(cleared_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
