// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session mutual exclusion.
//!
//! Every decrypt-modify-reencrypt cycle on a session, and every ledger
//! operation touching it, runs while holding that session's [`SessionGuard`].
//! Distinct sessions never contend. Lock entries are created on demand and
//! removed when the last guard for them is dropped with nobody waiting.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

#[derive(Default)]
pub struct SessionLocks {
    inner: Arc<LockMap>,
}

/// Proof that the holder has exclusive access to one session id.
///
/// Dropping it unlocks the session and prunes its map entry if idle.
pub struct SessionGuard {
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    map: Arc<LockMap>,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Unlock first so the guard's own reference no longer counts.
        self.guard.take();
        self.map
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `session_id`.
    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        // The map shard lock is released at the end of this statement, before awaiting.
        let lock = self
            .inner
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        SessionGuard {
            session_id: session_id.to_string(),
            guard: Some(guard),
            map: Arc::clone(&self.inner),
        }
    }

    /// Number of lock entries currently tracked.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
