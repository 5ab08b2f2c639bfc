// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recovery record CRUD operations.
//!
//! Timestamps are stored as epoch milliseconds so `list_expired` is a plain
//! integer comparison.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use ephem_core::{EphemError, RecordStatus, RecoveryRecord};
use rusqlite::params;

use crate::database::{Database, map_tr_err};

const SELECT_COLUMNS: &str = "SELECT session_id, owner_id, tenant_id, encrypted_blob, status, created_at, expires_at
     FROM recovery_records";

fn from_millis(ms: i64, column: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Integer,
            format!("timestamp {ms} out of range").into(),
        )
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<RecoveryRecord, rusqlite::Error> {
    let status: String = row.get(4)?;
    let status = RecordStatus::from_str(&status).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(RecoveryRecord {
        session_id: row.get(0)?,
        owner_id: row.get(1)?,
        tenant_id: row.get(2)?,
        encrypted_blob: row.get(3)?,
        status,
        created_at: from_millis(row.get(5)?, 5)?,
        expires_at: from_millis(row.get(6)?, 6)?,
    })
}

/// Get a recovery record by session ID.
pub async fn get_record(db: &Database, session_id: &str) -> Result<Option<RecoveryRecord>, EphemError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<RecoveryRecord>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE session_id = ?1"))?;
            match stmt.query_row(params![session_id], row_to_record) {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Insert a record, replacing any existing row for the same session.
pub async fn upsert_record(db: &Database, record: &RecoveryRecord) -> Result<(), EphemError> {
    let record = record.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO recovery_records
                     (session_id, owner_id, tenant_id, encrypted_blob, status, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(session_id) DO UPDATE SET
                     owner_id = excluded.owner_id,
                     tenant_id = excluded.tenant_id,
                     encrypted_blob = excluded.encrypted_blob,
                     status = excluded.status,
                     created_at = excluded.created_at,
                     expires_at = excluded.expires_at",
                params![
                    record.session_id,
                    record.owner_id,
                    record.tenant_id,
                    record.encrypted_blob,
                    record.status.to_string(),
                    record.created_at.timestamp_millis(),
                    record.expires_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a record. Returns whether a row was removed.
pub async fn delete_record(db: &Database, session_id: &str) -> Result<bool, EphemError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let changed = conn.execute(
                "DELETE FROM recovery_records WHERE session_id = ?1",
                params![session_id],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// List records with `expires_at <= now`, oldest expiry first.
pub async fn list_expired(db: &Database, now: DateTime<Utc>) -> Result<Vec<RecoveryRecord>, EphemError> {
    let now_ms = now.timestamp_millis();
    db.connection()
        .call(move |conn| -> Result<Vec<RecoveryRecord>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE expires_at <= ?1 ORDER BY expires_at ASC"
            ))?;
            let rows = stmt.query_map(params![now_ms], row_to_record)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Count all records.
pub async fn count_records(db: &Database) -> Result<u64, EphemError> {
    db.connection()
        .call(|conn| -> Result<i64, rusqlite::Error> {
            conn.query_row("SELECT COUNT(*) FROM recovery_records", [], |row| row.get(0))
        })
        .await
        .map(|n| n.max(0) as u64)
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn make_record(id: &str, expires_at: DateTime<Utc>) -> RecoveryRecord {
        RecoveryRecord {
            session_id: id.to_string(),
            owner_id: "u1".to_string(),
            tenant_id: "g1".to_string(),
            encrypted_blob: "bm9uY2UtYW5kLWNpcGhlcnRleHQ=".to_string(),
            status: RecordStatus::Active,
            created_at: expires_at - chrono::Duration::seconds(60),
            expires_at,
        }
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
    }

    #[tokio::test]
    async fn upsert_and_get_roundtrips() {
        let (db, _dir) = setup_db().await;
        let record = make_record("s1", at(1_800_000_000_123));
        upsert_record(&db, &record).await.unwrap();

        let loaded = get_record(&db, "s1").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let (db, _dir) = setup_db().await;
        assert!(get_record(&db, "nope").await.unwrap().is_none());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let (db, _dir) = setup_db().await;
        let mut record = make_record("s1", at(1_800_000_000_000));
        upsert_record(&db, &record).await.unwrap();
        record.status = RecordStatus::Completed;
        record.encrypted_blob = "other".to_string();
        upsert_record(&db, &record).await.unwrap();

        let loaded = get_record(&db, "s1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Completed);
        assert_eq!(loaded.encrypted_blob, "other");
        assert_eq!(count_records(&db).await.unwrap(), 1);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn list_expired_is_inclusive_of_now() {
        let (db, _dir) = setup_db().await;
        upsert_record(&db, &make_record("past", at(1_000))).await.unwrap();
        upsert_record(&db, &make_record("edge", at(2_000))).await.unwrap();
        upsert_record(&db, &make_record("future", at(3_000))).await.unwrap();

        let expired = list_expired(&db, at(2_000)).await.unwrap();
        let ids: Vec<&str> = expired.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(ids, vec!["past", "edge"]);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_was_removed() {
        let (db, _dir) = setup_db().await;
        upsert_record(&db, &make_record("s1", at(1_000))).await.unwrap();
        assert!(delete_record(&db, "s1").await.unwrap());
        assert!(!delete_record(&db, "s1").await.unwrap());
        db.close().await.unwrap();
    }
}
