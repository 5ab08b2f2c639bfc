// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory, TTL-bounded, per-session encrypted secret store.
//!
//! - Each session gets a fresh random AES-256-GCM key at `open`.
//! - The payload is kept only as ciphertext; it is decrypted into a
//!   [`Payload`] copy for the duration of a single operation.
//! - A session past `expires_at` is logically gone even before a sweep
//!   removes it. Sweeping is driven by the scheduler, never by reads.
//! - `close` and sweeps drop the entry, zeroing its key. A swept id keeps
//!   answering `Expired` for one more default TTL, then becomes unknown.
//!
//! One [`VaultService`] is constructed per process and passed by reference
//! (usually inside an `Arc`) to whatever owns the command loop. It starts
//! empty; [`VaultService::shutdown`] zeroes everything.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ephem_config::model::VaultConfig;
use ephem_core::{Clock, EphemError};
use ring::aead::NONCE_LEN;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto;
use crate::locks::{SessionGuard, SessionLocks};
use crate::payload::Payload;

/// Non-secret metadata about a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub owner_id: String,
    pub tenant_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// The TTL the session was opened with.
    pub ttl: Duration,
}

struct SessionEntry {
    info: SessionInfo,
    /// Per-session key; zeroed when the entry is dropped.
    key: Zeroizing<[u8; 32]>,
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl SessionEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.info.expires_at <= now
    }
}

pub struct VaultService {
    entries: DashMap<String, SessionEntry>,
    /// Ids removed by a sweep, with the expiry they had.
    swept: DashMap<String, DateTime<Utc>>,
    locks: SessionLocks,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl std::fmt::Debug for VaultService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultService")
            .field("sessions", &self.entries.len())
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

impl VaultService {
    /// Creates an empty vault whose sessions default to `default_ttl`.
    pub fn new(clock: Arc<dyn Clock>, default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            swept: DashMap::new(),
            locks: SessionLocks::new(),
            clock,
            default_ttl,
        }
    }

    pub fn from_config(config: &VaultConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, config.session_ttl())
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Waits for exclusive access to `session_id`.
    ///
    /// The guard unlocks the `*_locked` operations, which let the ledger run a
    /// read-encrypt-persist cycle without another mutation interleaving.
    pub async fn lock(&self, session_id: &str) -> SessionGuard {
        self.locks.acquire(session_id).await
    }

    /// Opens a new, empty session.
    ///
    /// Fails with [`EphemError::DuplicateSession`] if a live session already
    /// uses `session_id`; an expired but unswept entry is purged first.
    pub async fn open(
        &self,
        session_id: &str,
        owner_id: &str,
        tenant_id: &str,
        ttl: Duration,
    ) -> Result<SessionInfo, EphemError> {
        let guard = self.lock(session_id).await;
        self.open_locked(&guard, owner_id, tenant_id, ttl, &Payload::new(), false)
    }

    /// Opens a session under an already-held guard, seeded with `payload`.
    ///
    /// With `replace` set, a live session with the same id is discarded
    /// instead of failing.
    pub fn open_locked(
        &self,
        guard: &SessionGuard,
        owner_id: &str,
        tenant_id: &str,
        ttl: Duration,
        payload: &Payload,
        replace: bool,
    ) -> Result<SessionInfo, EphemError> {
        let session_id = guard.session_id();
        let now = self.clock.now();

        let ttl_delta = chrono::Duration::from_std(ttl)
            .map_err(|_| EphemError::Config(format!("session ttl {ttl:?} is out of range")))?;
        if ttl_delta <= chrono::Duration::zero() {
            return Err(EphemError::Config("session ttl must be positive".to_string()));
        }

        if let Some(existing) = self.entries.get(session_id) {
            let live = !existing.is_expired(now);
            drop(existing);
            if live && !replace {
                return Err(EphemError::DuplicateSession {
                    session_id: session_id.to_string(),
                });
            }
            self.entries.remove(session_id);
            debug!(session_id = %session_id, live, "discarded previous session entry");
        }
        self.swept.remove(session_id);

        let key = Zeroizing::new(crypto::generate_random_key()?);
        let plaintext = payload.to_bytes()?;
        let (ciphertext, nonce) = crypto::seal(&key, session_id.as_bytes(), &plaintext)?;

        let info = SessionInfo {
            session_id: session_id.to_string(),
            owner_id: owner_id.to_string(),
            tenant_id: tenant_id.to_string(),
            created_at: now,
            expires_at: now + ttl_delta,
            ttl,
        };
        self.entries.insert(
            session_id.to_string(),
            SessionEntry {
                info: info.clone(),
                key,
                nonce,
                ciphertext,
            },
        );

        info!(session_id = %session_id, tenant_id = %tenant_id, ttl_secs = ttl.as_secs(), "vault session opened");
        Ok(info)
    }

    /// Sets one field of the session payload.
    pub async fn put(&self, session_id: &str, field: &str, value: &str) -> Result<(), EphemError> {
        let mut update = Payload::new();
        update.insert(field, value);
        self.put_bulk(session_id, update).await
    }

    /// Merges `fields` into the session payload, overwriting on conflict.
    pub async fn put_bulk(&self, session_id: &str, fields: Payload) -> Result<(), EphemError> {
        let guard = self.lock(session_id).await;
        let mut current = self.read_locked(&guard)?;
        let count = fields.len();
        current.merge(fields);
        self.write_locked(&guard, &current)?;
        debug!(session_id = %session_id, fields = count, "vault payload updated");
        Ok(())
    }

    /// Returns a decrypted copy of the session payload.
    pub async fn get(&self, session_id: &str) -> Result<Payload, EphemError> {
        let guard = self.lock(session_id).await;
        self.read_locked(&guard)
    }

    /// Non-secret metadata for a live session.
    pub fn describe(&self, session_id: &str) -> Result<SessionInfo, EphemError> {
        let now = self.clock.now();
        let entry = self
            .entries
            .get(session_id)
            .ok_or_else(|| self.missing(session_id))?;
        if entry.is_expired(now) {
            return Err(EphemError::Expired {
                session_id: session_id.to_string(),
            });
        }
        Ok(entry.info.clone())
    }

    /// Decrypts the payload of the guarded session.
    pub fn read_locked(&self, guard: &SessionGuard) -> Result<Payload, EphemError> {
        let session_id = guard.session_id();
        let now = self.clock.now();
        let entry = self
            .entries
            .get(session_id)
            .ok_or_else(|| self.missing(session_id))?;
        if entry.is_expired(now) {
            return Err(EphemError::Expired {
                session_id: session_id.to_string(),
            });
        }
        let plaintext = crypto::open(
            &entry.key,
            session_id.as_bytes(),
            &entry.nonce,
            &entry.ciphertext,
        )?;
        Payload::from_bytes(&plaintext)
    }

    /// Re-encrypts `payload` as the guarded session's contents under a fresh nonce.
    fn write_locked(&self, guard: &SessionGuard, payload: &Payload) -> Result<(), EphemError> {
        let session_id = guard.session_id();
        let plaintext = payload.to_bytes()?;
        let mut entry = self
            .entries
            .get_mut(session_id)
            .ok_or_else(|| self.missing(session_id))?;
        let (ciphertext, nonce) = crypto::seal(&entry.key, session_id.as_bytes(), &plaintext)?;
        entry.ciphertext = ciphertext;
        entry.nonce = nonce;
        Ok(())
    }

    /// Error for an id with no entry: `Expired` if a sweep removed it recently.
    fn missing(&self, session_id: &str) -> EphemError {
        if self.swept.contains_key(session_id) {
            EphemError::Expired {
                session_id: session_id.to_string(),
            }
        } else {
            EphemError::UnknownSession {
                session_id: session_id.to_string(),
            }
        }
    }

    /// Removes the session and zeroes its key. Closing an absent session is a no-op.
    pub async fn close(&self, session_id: &str) {
        let guard = self.lock(session_id).await;
        let removed = self.entries.remove(session_id).is_some();
        self.swept.remove(session_id);
        drop(guard);
        if removed {
            info!(session_id = %session_id, "vault session closed");
        }
    }

    /// Removes every session with `expires_at <= now`. Returns how many were removed.
    ///
    /// Each candidate is re-checked under its own session lock, so an entry
    /// whose expiry is still in the future is never removed. Removed ids are
    /// remembered as expired until one default TTL past their expiry.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let forget_before = chrono::Duration::from_std(self.default_ttl)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention));
        if let Some(cutoff) = forget_before {
            self.swept.retain(|_, expired_at| *expired_at > cutoff);
        }

        let candidates: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for session_id in candidates {
            let guard = self.lock(&session_id).await;
            if let Some((_, entry)) = self
                .entries
                .remove_if(&session_id, |_, entry| entry.is_expired(now))
            {
                self.swept.insert(session_id.clone(), entry.info.expires_at);
                removed += 1;
                debug!(session_id = %session_id, "swept expired vault session");
            }
            drop(guard);
        }

        if removed > 0 {
            info!(removed, "vault sweep complete");
        }
        removed
    }

    /// Teardown: drops every session, zeroing all keys. Returns how many were dropped.
    pub fn shutdown(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.swept.clear();
        info!(sessions = count, "vault shut down");
        count
    }

    /// Number of entries held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
