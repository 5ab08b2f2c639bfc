// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent-store collaborator for recovery records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EphemError;
use crate::types::RecoveryRecord;

/// Opaque keyed repository for [`RecoveryRecord`]s.
///
/// The ledger never issues structured queries of its own; everything it needs
/// is expressed through these four operations.
#[async_trait]
pub trait RecoveryStore: Send + Sync {
    /// Loads the record for `session_id`, if any.
    async fn get(&self, session_id: &str) -> Result<Option<RecoveryRecord>, EphemError>;

    /// Inserts or replaces the record keyed by `record.session_id`.
    async fn put(&self, record: &RecoveryRecord) -> Result<(), EphemError>;

    /// Deletes the record for `session_id`. Deleting a missing record is not an error.
    async fn delete(&self, session_id: &str) -> Result<(), EphemError>;

    /// Returns every record with `expires_at <= now`.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<RecoveryRecord>, EphemError>;
}
