// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-layer entry points.
//!
//! Typical flow: `open_session` -> `store_secret(s)` -> `seal_recovery` ->
//! `begin_execution` -> `mark_outcome` -> `close_session`.
//!
//! Each in-flight execution is registered under its session id with a
//! cancellation token and a completion lock held until the credential has
//! been released. `cancel_execution` and `close_session` cancel and then
//! wait on that lock, so when they return the process is dead and the
//! credential artifact is gone.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ephem_config::model::EphemConfig;
use ephem_core::{CapturedOutput, Clock, EphemError, RecordStatus, RecoveryStore, SessionId};
use ephem_exec::{
    CommandSpec, CredentialInjector, ExecutionStreamer, InjectorStats, LineEvent, ProgressTracker,
    sweep_stale_artifacts,
};
use ephem_storage::SqliteRecoveryStore;
use ephem_vault::{Payload, RecoveryLedger, SessionInfo, VaultService};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_removed: usize,
    pub records_removed: usize,
}

struct ExecutionSlot {
    cancel: CancellationToken,
    done: Arc<Mutex<()>>,
}

/// Unregisters the execution even if the caller drops the future mid-run.
struct Registration<'a> {
    executions: &'a DashMap<String, ExecutionSlot>,
    session_id: &'a str,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.executions.remove(self.session_id);
    }
}

pub struct CoreService {
    config: EphemConfig,
    clock: Arc<dyn Clock>,
    vault: Arc<VaultService>,
    ledger: RecoveryLedger,
    injector: CredentialInjector,
    executions: DashMap<String, ExecutionSlot>,
    base_env: BTreeMap<String, String>,
}

impl CoreService {
    /// Assembles the service over an already-open record store.
    pub fn new(config: EphemConfig, store: Arc<dyn RecoveryStore>, clock: Arc<dyn Clock>) -> Self {
        let vault = Arc::new(VaultService::from_config(&config.vault, clock.clone()));
        let ledger = RecoveryLedger::new(
            vault.clone(),
            store,
            clock.clone(),
            config.recovery.clone(),
        );
        let injector = CredentialInjector::from_config(vault.clone(), &config.exec);
        let base_env = config
            .exec
            .passthrough_env
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|value| (name.clone(), value)))
            .collect();

        Self {
            config,
            clock,
            vault,
            ledger,
            injector,
            executions: DashMap::new(),
            base_env,
        }
    }

    /// Opens the SQLite record store named in the config and assembles the service.
    pub async fn open(config: EphemConfig, clock: Arc<dyn Clock>) -> Result<Self, EphemError> {
        let store = SqliteRecoveryStore::open(config.storage.clone()).await?;
        Ok(Self::new(config, Arc::new(store), clock))
    }

    pub fn config(&self) -> &EphemConfig {
        &self.config
    }

    pub fn vault(&self) -> &Arc<VaultService> {
        &self.vault
    }

    pub fn ledger(&self) -> &RecoveryLedger {
        &self.ledger
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn injector_stats(&self) -> &Arc<InjectorStats> {
        self.injector.stats()
    }

    /// Number of executions currently registered.
    pub fn running_executions(&self) -> usize {
        self.executions.len()
    }

    /// Whether `session_id` has an execution registered.
    pub fn is_executing(&self, session_id: &str) -> bool {
        self.executions.contains_key(session_id)
    }

    /// Removes credential artifacts a previous process left behind.
    pub fn startup(&self) -> Result<usize, EphemError> {
        sweep_stale_artifacts(self.injector.dir())
    }

    /// Opens a session with a fresh random id and the configured TTL.
    pub async fn open_session(&self, owner_id: &str, tenant_id: &str) -> Result<SessionId, EphemError> {
        let session_id = SessionId(uuid::Uuid::new_v4().to_string());
        self.vault
            .open(session_id.as_str(), owner_id, tenant_id, self.vault.default_ttl())
            .await?;
        Ok(session_id)
    }

    pub async fn store_secret(&self, session_id: &str, field: &str, value: &str) -> Result<(), EphemError> {
        self.vault.put(session_id, field, value).await
    }

    pub async fn store_secrets(&self, session_id: &str, fields: Payload) -> Result<(), EphemError> {
        self.vault.put_bulk(session_id, fields).await
    }

    pub fn describe_session(&self, session_id: &str) -> Result<SessionInfo, EphemError> {
        self.vault.describe(session_id)
    }

    /// Seals the session for crash recovery. Returns how long the record lives.
    pub async fn seal_recovery(&self, session_id: &str, owner_id: &str) -> Result<Duration, EphemError> {
        let record = self.ledger.seal(session_id, owner_id).await?;
        Ok((record.expires_at - self.clock.now()).to_std().unwrap_or_default())
    }

    /// Rebuilds the session from its recovery record. Returns the record's remaining TTL.
    pub async fn recover(&self, session_id: &str, requester_id: &str) -> Result<Duration, EphemError> {
        self.ledger.unseal(session_id, requester_id).await
    }

    /// Records the terminal outcome of the change on the session's recovery record.
    pub async fn mark_outcome(&self, session_id: &str, success: bool) -> Result<(), EphemError> {
        let status = if success {
            RecordStatus::Completed
        } else {
            RecordStatus::Failed
        };
        self.ledger.mark(session_id, status).await
    }

    /// Runs `command` with the session's credential injected.
    ///
    /// `progress_sink` receives the rendered progress each time it changes; an
    /// error from it aborts the run. The credential is released exactly once
    /// before this returns, whatever the outcome. A session runs at most one
    /// execution at a time.
    pub async fn begin_execution<F>(
        &self,
        session_id: &str,
        command: &CommandSpec,
        mut progress_sink: F,
    ) -> Result<CapturedOutput, EphemError>
    where
        F: FnMut(&str) -> Result<(), EphemError> + Send,
    {
        let info = self.vault.describe(session_id)?;

        let done = Arc::new(Mutex::new(()));
        let _running = done.clone().lock_owned().await;
        let cancel = CancellationToken::new();
        match self.executions.entry(session_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(EphemError::Internal(format!(
                    "session {session_id} already has an execution in flight"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(ExecutionSlot {
                    cancel: cancel.clone(),
                    done,
                });
            }
        }

        let _registration = Registration {
            executions: &self.executions,
            session_id,
        };

        self.execute_registered(session_id, &info, command, &mut progress_sink, &cancel)
            .await
    }

    async fn execute_registered<F>(
        &self,
        session_id: &str,
        info: &SessionInfo,
        command: &CommandSpec,
        progress_sink: &mut F,
        cancel: &CancellationToken,
    ) -> Result<CapturedOutput, EphemError>
    where
        F: FnMut(&str) -> Result<(), EphemError> + Send,
    {
        // Fail closed: nothing is spawned unless the credential is in place
        // (or the session has none and ambient credentials apply).
        let handle = self
            .injector
            .materialize(session_id, &info.tenant_id, &self.config.exec.credential_field)
            .await?;

        let mut tracker = ProgressTracker::new();
        let mut streamer = ExecutionStreamer::from_config(&self.config.exec);
        let timeout = command.timeout.unwrap_or_else(|| self.config.exec.timeout());
        info!(
            session_id = %session_id,
            command = %command.display(),
            credential_injected = handle.is_injected(),
            "execution starting"
        );

        let result = streamer
            .run(
                command,
                &self.base_env,
                handle.env(),
                |line| {
                    let summary = tracker.observe_plan_summary(line);
                    let event = tracker.observe_line(line);
                    if summary || event != LineEvent::Ignored {
                        progress_sink(&tracker.render())?;
                    }
                    Ok(())
                },
                timeout,
                cancel,
            )
            .await;

        if let Err(e) = handle.release() {
            error!(session_id = %session_id, error = %e, "credential release failed");
        }

        match &result {
            Ok(_) => info!(
                session_id = %session_id,
                completed = tracker.completed().len(),
                failed = tracker.failed().len(),
                "execution finished"
            ),
            Err(e) => warn!(session_id = %session_id, error = %e, state = ?streamer.state(), "execution did not complete"),
        }
        result
    }

    /// Cancels the session's in-flight execution and waits until its process
    /// is gone and its credential released. Returns false if nothing was running.
    pub async fn cancel_execution(&self, session_id: &str) -> bool {
        let Some((cancel, done)) = self
            .executions
            .get(session_id)
            .map(|slot| (slot.cancel.clone(), slot.done.clone()))
        else {
            return false;
        };
        cancel.cancel();
        let _finished = done.lock().await;
        info!(session_id = %session_id, "execution cancelled");
        true
    }

    /// Cancels any execution, then drops the session and its key.
    ///
    /// The recovery record is left for its own expiry.
    pub async fn close_session(&self, session_id: &str) {
        self.cancel_execution(session_id).await;
        self.vault.close(session_id).await;
    }

    /// One pass of both sweeps at `now`.
    pub async fn sweep_tick(&self, now: DateTime<Utc>) -> Result<SweepReport, EphemError> {
        let sessions_removed = self.vault.sweep(now).await;
        let records_removed = self.ledger.sweep_expired(now).await?;
        debug!(sessions_removed, records_removed, "sweep tick");
        Ok(SweepReport {
            sessions_removed,
            records_removed,
        })
    }

    /// Cancels every execution, waits for their cleanup, and zeroes the vault.
    pub async fn shutdown(&self) {
        let running: Vec<String> = self.executions.iter().map(|e| e.key().clone()).collect();
        for session_id in running {
            self.cancel_execution(&session_id).await;
        }
        let dropped = self.vault.shutdown();
        info!(sessions = dropped, "core service shut down");
    }
}
