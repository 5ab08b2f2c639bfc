// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the RecoveryStore trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::debug;

use ephem_config::model::StorageConfig;
use ephem_core::{EphemError, RecoveryRecord, RecoveryStore};

use crate::database::{Database, map_tr_err};
use crate::queries;

/// SQLite-backed recovery store.
///
/// Wraps a [`Database`] handle and delegates all query operations to the
/// typed query modules. The database is opened on [`initialize`](Self::initialize).
pub struct SqliteRecoveryStore {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteRecoveryStore {
    /// Create a new store with the given configuration.
    ///
    /// The database connection is not opened until [`initialize`](Self::initialize) is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Opens the database and runs migrations.
    pub async fn initialize(&self) -> Result<(), EphemError> {
        let db = Database::open_from_config(&self.config).await?;
        self.db.set(db).map_err(|_| EphemError::Storage {
            source: "recovery store already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite recovery store initialized");
        Ok(())
    }

    /// Convenience: construct and initialize in one step.
    pub async fn open(config: StorageConfig) -> Result<Self, EphemError> {
        let store = Self::new(config);
        store.initialize().await?;
        Ok(store)
    }

    /// Returns a reference to the underlying Database, or an error if not initialized.
    fn db(&self) -> Result<&Database, EphemError> {
        self.db.get().ok_or_else(|| EphemError::Storage {
            source: "recovery store not initialized -- call initialize() first".into(),
        })
    }

    /// Number of stored records, for status output.
    pub async fn count(&self) -> Result<u64, EphemError> {
        queries::recovery::count_records(self.db()?).await
    }

    /// Checkpoints the WAL. The connection stays usable.
    pub async fn checkpoint(&self) -> Result<(), EphemError> {
        if let Some(db) = self.db.get() {
            db.connection()
                .call(|conn| -> Result<(), rusqlite::Error> {
                    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                    Ok(())
                })
                .await
                .map_err(map_tr_err)?;
            debug!("WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl RecoveryStore for SqliteRecoveryStore {
    async fn get(&self, session_id: &str) -> Result<Option<RecoveryRecord>, EphemError> {
        queries::recovery::get_record(self.db()?, session_id).await
    }

    async fn put(&self, record: &RecoveryRecord) -> Result<(), EphemError> {
        queries::recovery::upsert_record(self.db()?, record).await
    }

    async fn delete(&self, session_id: &str) -> Result<(), EphemError> {
        queries::recovery::delete_record(self.db()?, session_id).await?;
        Ok(())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<RecoveryRecord>, EphemError> {
        queries::recovery::list_expired(self.db()?, now).await
    }
}
