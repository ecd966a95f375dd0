//! In-memory deposit store for tests and single-process development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{Deposit, DepositStatus, VirtualAccount};

use super::{DepositError, DepositStore};

/// Deposits and their virtual accounts held in maps keyed by id
#[derive(Debug, Default)]
pub struct InMemoryDepositStore {
    deposits: RwLock<HashMap<Uuid, Deposit>>,
    accounts: RwLock<HashMap<Uuid, VirtualAccount>>,
}

impl InMemoryDepositStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a deposit
    pub async fn insert(&self, deposit: Deposit) {
        self.deposits.write().await.insert(deposit.id, deposit);
    }

    /// Insert or replace a virtual account
    pub async fn insert_account(&self, account: VirtualAccount) {
        self.accounts.write().await.insert(account.id, account);
    }

    /// Look a deposit up by id
    pub async fn get(&self, id: Uuid) -> Result<Deposit, DepositError> {
        self.deposits
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(DepositError::NotFound(id))
    }

    /// Count deposits in a given status
    pub async fn count_with_status(&self, status: DepositStatus) -> usize {
        self.deposits
            .read()
            .await
            .values()
            .filter(|d| d.status == status)
            .count()
    }
}

#[async_trait]
impl DepositStore for InMemoryDepositStore {
    async fn find_matured_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Deposit>, DepositError> {
        let deposits = self.deposits.read().await;
        let accounts = self.accounts.read().await;

        // Unknown accounts do not block clearance
        let account_active = |d: &Deposit| {
            d.virtual_account_id
                .and_then(|id| accounts.get(&id))
                .map_or(true, VirtualAccount::is_active)
        };

        let mut matured: Vec<Deposit> = deposits
            .values()
            .filter(|d| d.status == DepositStatus::Pending && d.created_at <= cutoff)
            .filter(|&d| account_active(d))
            .cloned()
            .collect();
        matured.sort_by_key(|d| d.created_at);
        matured.truncate(usize::try_from(limit).unwrap_or(0));

        Ok(matured)
    }

    async fn mark_cleared(&self, id: Uuid, cleared_at: DateTime<Utc>) -> Result<bool, DepositError> {
        let mut deposits = self.deposits.write().await;
        let deposit = deposits.get_mut(&id).ok_or(DepositError::NotFound(id))?;

        Ok(deposit.clear(cleared_at).is_ok())
    }
}
