// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory `RecoveryStore` for tests.
//!
//! Behaves like the SQLite store: `put` upserts, `delete` of a missing record
//! succeeds. Cloning shares the underlying map, which is how tests simulate
//! a restart that loses the vault but keeps the store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ephem_core::{EphemError, RecoveryRecord, RecoveryStore};

#[derive(Debug, Clone, Default)]
pub struct MemoryRecoveryStore {
    records: Arc<DashMap<String, RecoveryRecord>>,
}

impl MemoryRecoveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every stored record, in no particular order.
    pub fn records(&self) -> Vec<RecoveryRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }
}

#[async_trait]
impl RecoveryStore for MemoryRecoveryStore {
    async fn get(&self, session_id: &str) -> Result<Option<RecoveryRecord>, EphemError> {
        Ok(self.records.get(session_id).map(|r| r.value().clone()))
    }

    async fn put(&self, record: &RecoveryRecord) -> Result<(), EphemError> {
        self.records
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), EphemError> {
        self.records.remove(session_id);
        Ok(())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<RecoveryRecord>, EphemError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.value().is_expired(now))
            .map(|r| r.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ephem_core::RecordStatus;

    fn record(id: &str, expires_at: DateTime<Utc>) -> RecoveryRecord {
        RecoveryRecord {
            session_id: id.to_string(),
            owner_id: "u1".to_string(),
            tenant_id: "g1".to_string(),
            encrypted_blob: "blob".to_string(),
            status: RecordStatus::Active,
            created_at: expires_at - chrono::Duration::seconds(10),
            expires_at,
        }
    }

    #[tokio::test]
    async fn upsert_and_list_expired() {
        let store = MemoryRecoveryStore::new();
        let now = Utc::now();
        store.put(&record("old", now)).await.unwrap();
        store
            .put(&record("new", now + chrono::Duration::seconds(5)))
            .await
            .unwrap();

        let expired = store.list_expired(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].session_id, "old");

        store.delete("old").await.unwrap();
        store.delete("old").await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn clones_share_records() {
        let store = MemoryRecoveryStore::new();
        let other = store.clone();
        store.put(&record("s1", Utc::now())).await.unwrap();
        assert!(other.get("s1").await.unwrap().is_some());
    }
}
