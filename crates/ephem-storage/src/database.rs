// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! Do NOT create additional Connection instances for writes.

use std::path::Path;

use ephem_config::model::StorageConfig;
use ephem_core::EphemError;
use tracing::{debug, info};

use crate::migrations::run_migrations;

/// Handle to the recovery database.
pub struct Database {
    conn: tokio_rusqlite::Connection,
    path: String,
}

impl Database {
    /// Opens (creating if needed) the database at `path` in WAL mode and
    /// applies pending migrations.
    pub async fn open(path: &str) -> Result<Self, EphemError> {
        Self::open_with(path, true).await
    }

    pub async fn open_from_config(config: &StorageConfig) -> Result<Self, EphemError> {
        Self::open_with(&config.database_path, config.wal_mode).await
    }

    async fn open_with(path: &str, wal_mode: bool) -> Result<Self, EphemError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| EphemError::Storage {
                    source: Box::new(e),
                })?;
            }
        }

        // Migrations need a plain connection; run them on the blocking pool
        // before the long-lived async connection is opened.
        let migrate_path = path.to_string();
        let applied = tokio::task::spawn_blocking(move || -> Result<usize, EphemError> {
            let mut conn =
                rusqlite::Connection::open(&migrate_path).map_err(|e| EphemError::Storage {
                    source: Box::new(e),
                })?;
            if wal_mode {
                conn.pragma_update(None, "journal_mode", "WAL")
                    .map_err(|e| EphemError::Storage {
                        source: Box::new(e),
                    })?;
            }
            run_migrations(&mut conn)
        })
        .await
        .map_err(|e| EphemError::Internal(format!("migration task failed: {e}")))??;

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| EphemError::Storage {
                source: Box::new(e),
            })?;
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch(
                "PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA foreign_keys = ON;",
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        info!(path = %path, wal_mode, migrations_applied = applied, "recovery database opened");
        Ok(Self {
            conn,
            path: path.to_string(),
        })
    }

    /// The single async connection. Query modules go through `call()`.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Checkpoints the WAL and drops the connection.
    pub async fn close(self) -> Result<(), EphemError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!(path = %self.path, "recovery database closed");
        Ok(())
    }
}

/// Convert a tokio-rusqlite error into EphemError::Storage.
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> EphemError {
    EphemError::Storage {
        source: Box::new(e),
    }
}
