//! In-memory audit sink for tests and local development.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AuditLogEntry, AuditLogError, AuditSink};

/// Audit entries kept in insertion order
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries, oldest first
    pub async fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, entry: &AuditLogEntry) -> Result<(), AuditLogError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}
