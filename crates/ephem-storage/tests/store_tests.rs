// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the SQLite recovery store.

use chrono::{Duration, TimeZone, Utc};
use ephem_config::model::StorageConfig;
use ephem_core::{EphemError, RecordStatus, RecoveryRecord, RecoveryStore};
use ephem_storage::SqliteRecoveryStore;
use tempfile::tempdir;

fn config_in(dir: &std::path::Path) -> StorageConfig {
    StorageConfig {
        database_path: dir.join("ephem.db").to_string_lossy().to_string(),
        wal_mode: true,
    }
}

fn record(id: &str, expires_in_secs: i64) -> RecoveryRecord {
    let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    RecoveryRecord {
        session_id: id.to_string(),
        owner_id: "u1".to_string(),
        tenant_id: "g1".to_string(),
        encrypted_blob: "AAAA".to_string(),
        status: RecordStatus::Active,
        created_at: created,
        expires_at: created + Duration::seconds(expires_in_secs),
    }
}

#[tokio::test]
async fn uninitialized_store_reports_storage_error() {
    let dir = tempdir().unwrap();
    let store = SqliteRecoveryStore::new(config_in(dir.path()));
    let err = store.get("s1").await.unwrap_err();
    assert!(matches!(err, EphemError::Storage { .. }));
}

#[tokio::test]
async fn double_initialize_fails() {
    let dir = tempdir().unwrap();
    let store = SqliteRecoveryStore::open(config_in(dir.path())).await.unwrap();
    assert!(store.initialize().await.is_err());
}

#[tokio::test]
async fn records_survive_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = SqliteRecoveryStore::open(config_in(dir.path())).await.unwrap();
        store.put(&record("s1", 60)).await.unwrap();
        store.checkpoint().await.unwrap();
    }

    let store = SqliteRecoveryStore::open(config_in(dir.path())).await.unwrap();
    let loaded = store.get("s1").await.unwrap().unwrap();
    assert_eq!(loaded, record("s1", 60));
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn list_expired_and_delete_through_trait() {
    let dir = tempdir().unwrap();
    let store = SqliteRecoveryStore::open(config_in(dir.path())).await.unwrap();
    let store: &dyn RecoveryStore = &store;
    store.put(&record("short", 10)).await.unwrap();
    store.put(&record("long", 1000)).await.unwrap();

    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 1, 0).unwrap();
    let expired = store.list_expired(now).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].session_id, "short");

    store.delete("short").await.unwrap();
    // Deleting a missing record is not an error.
    store.delete("short").await.unwrap();
    assert!(store.get("short").await.unwrap().is_none());
    assert!(store.get("long").await.unwrap().is_some());
}
