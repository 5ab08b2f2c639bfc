// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crash-recovery ledger for vault sessions.
//!
//! A sealed snapshot of a session payload is encrypted under a key derived
//! from the owner id alone and persisted through a [`RecoveryStore`]. Because
//! nothing from the crashed process is needed to re-derive that key, a new
//! process can rebuild the session with [`RecoveryLedger::unseal`].
//!
//! Records live independently of vault sessions: closing or sweeping a
//! session leaves its record in place until the ledger's own sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ephem_config::model::RecoveryConfig;
use ephem_core::{Clock, EphemError, RecordStatus, RecoveryRecord, RecoveryStore};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto;
use crate::kdf;
use crate::payload::Payload;
use crate::vault::VaultService;

pub struct RecoveryLedger {
    vault: Arc<VaultService>,
    store: Arc<dyn RecoveryStore>,
    clock: Arc<dyn Clock>,
    kdf: RecoveryConfig,
}

impl RecoveryLedger {
    pub fn new(
        vault: Arc<VaultService>,
        store: Arc<dyn RecoveryStore>,
        clock: Arc<dyn Clock>,
        kdf: RecoveryConfig,
    ) -> Self {
        Self {
            vault,
            store,
            clock,
            kdf,
        }
    }

    /// Derives the recovery key for `owner_id`.
    ///
    /// Argon2id is CPU- and memory-bound, so it runs on the blocking pool.
    pub async fn derive_key(&self, owner_id: &str) -> Result<Zeroizing<[u8; 32]>, EphemError> {
        let owner_id = owner_id.to_string();
        let params = self.kdf.clone();
        tokio::task::spawn_blocking(move || kdf::derive_owner_key(&owner_id, &params))
            .await
            .map_err(|e| EphemError::Internal(format!("key derivation task failed: {e}")))?
    }

    /// Persists an owner-keyed snapshot of the session's current payload.
    ///
    /// The record is upserted as `ACTIVE` and expires one session TTL after
    /// the seal. Only the session owner may seal.
    pub async fn seal(&self, session_id: &str, owner_id: &str) -> Result<RecoveryRecord, EphemError> {
        let guard = self.vault.lock(session_id).await;
        let payload = self.vault.read_locked(&guard)?;
        let info = self.vault.describe(session_id)?;
        if info.owner_id != owner_id {
            warn!(session_id = %session_id, "seal rejected: requester is not the session owner");
            return Err(EphemError::AccessDenied);
        }

        let key = self.derive_key(owner_id).await?;
        let plaintext = payload.to_bytes()?;
        let encrypted_blob = crypto::seal_to_text(&key, session_id.as_bytes(), &plaintext)?;

        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(info.ttl)
            .map_err(|_| EphemError::Internal("session ttl out of range".to_string()))?;
        let record = RecoveryRecord {
            session_id: session_id.to_string(),
            owner_id: owner_id.to_string(),
            tenant_id: info.tenant_id,
            encrypted_blob,
            status: RecordStatus::Active,
            created_at: now,
            expires_at: now + ttl,
        };
        self.store.put(&record).await?;
        drop(guard);

        info!(session_id = %session_id, expires_at = %record.expires_at, "recovery record sealed");
        Ok(record)
    }

    /// Rebuilds the vault session from its recovery record.
    ///
    /// Checks run in order: record presence, owner match (before any
    /// decryption), expiry, then authentication of the blob. On success the
    /// session is reopened with the same payload and a fresh vault TTL,
    /// replacing any live session under the same id. Returns the time left
    /// before the record itself expires.
    pub async fn unseal(&self, session_id: &str, requester_id: &str) -> Result<Duration, EphemError> {
        let guard = self.vault.lock(session_id).await;

        let record = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| EphemError::UnknownSession {
                session_id: session_id.to_string(),
            })?;

        if record.owner_id != requester_id {
            warn!(session_id = %session_id, "unseal rejected");
            return Err(EphemError::AccessDenied);
        }

        let now = self.clock.now();
        if record.is_expired(now) {
            return Err(EphemError::Expired {
                session_id: session_id.to_string(),
            });
        }

        let key = self.derive_key(requester_id).await?;
        let plaintext = crypto::open_from_text(&key, session_id.as_bytes(), &record.encrypted_blob)?;
        let payload = Payload::from_bytes(&plaintext).map_err(|_| {
            warn!(session_id = %session_id, "unseal rejected");
            EphemError::CorruptBlob
        })?;

        self.vault.open_locked(
            &guard,
            &record.owner_id,
            &record.tenant_id,
            self.vault.default_ttl(),
            &payload,
            true,
        )?;

        let remaining = (record.expires_at - now).to_std().unwrap_or_default();
        info!(
            session_id = %session_id,
            fields = payload.len(),
            remaining_secs = remaining.as_secs(),
            "session recovered from ledger"
        );
        Ok(remaining)
    }

    /// Moves an `ACTIVE` record to `status`.
    ///
    /// Re-marking a terminal record is a no-op. Marking `ACTIVE` is rejected
    /// because a record never returns to it.
    pub async fn mark(&self, session_id: &str, status: RecordStatus) -> Result<(), EphemError> {
        if !status.is_terminal() {
            return Err(EphemError::Internal(format!(
                "cannot mark recovery record {session_id} as {status}"
            )));
        }

        let guard = self.vault.lock(session_id).await;
        let mut record = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| EphemError::UnknownSession {
                session_id: session_id.to_string(),
            })?;

        if record.status.is_terminal() {
            debug!(session_id = %session_id, current = %record.status, "recovery record already terminal");
            return Ok(());
        }

        record.status = status;
        self.store.put(&record).await?;
        drop(guard);

        info!(session_id = %session_id, status = %status, "recovery record marked");
        Ok(())
    }

    /// Deletes every record with `expires_at <= now`. Returns how many were deleted.
    ///
    /// Vault sessions are untouched. Each candidate is re-read under its
    /// session lock so a record re-sealed in the meantime survives.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, EphemError> {
        let candidates = self.store.list_expired(now).await?;
        let mut removed = 0;
        for candidate in candidates {
            let guard = self.vault.lock(&candidate.session_id).await;
            let still_expired = self
                .store
                .get(&candidate.session_id)
                .await?
                .is_some_and(|r| r.is_expired(now));
            if still_expired {
                self.store.delete(&candidate.session_id).await?;
                removed += 1;
                debug!(session_id = %candidate.session_id, "swept expired recovery record");
            }
            drop(guard);
        }
        if removed > 0 {
            info!(removed, "recovery ledger sweep complete");
        }
        Ok(removed)
    }

    /// Loads the record for `session_id` without decrypting it.
    pub async fn record(&self, session_id: &str) -> Result<Option<RecoveryRecord>, EphemError> {
        self.store.get(session_id).await
    }
}
