// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` provides everything a full service needs except the service
//! itself: a temp directory for the SQLite database and credential
//! artifacts, a test-sized [`EphemConfig`] (cheap Argon2id, short timeouts),
//! a [`ManualClock`], and a shared [`MemoryRecoveryStore`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ephem_config::model::{EphemConfig, ExecConfig, RecoveryConfig, StorageConfig, VaultConfig};
use ephem_core::EphemError;

use crate::clock::ManualClock;
use crate::memory_store::MemoryRecoveryStore;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    session_ttl: Duration,
    exec_timeout: Duration,
    line_buffer: usize,
    credential_env_vars: Option<Vec<String>>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            session_ttl: Duration::from_secs(60),
            exec_timeout: Duration::from_secs(30),
            line_buffer: 256,
            credential_env_vars: None,
        }
    }

    /// Set the vault session TTL (whole seconds).
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Set the wall-clock ceiling for executions.
    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    /// Set the bounded line queue size between the process and the consumer.
    pub fn with_line_buffer(mut self, size: usize) -> Self {
        self.line_buffer = size;
        self
    }

    /// Override the environment variables a credential artifact is exported under.
    pub fn with_credential_env_vars(mut self, vars: &[&str]) -> Self {
        self.credential_env_vars = Some(vars.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Build the test harness, creating its temp directories.
    pub fn build(self) -> Result<TestHarness, EphemError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| EphemError::Storage { source: e.into() })?;
        let credential_dir = temp_dir.path().join("credentials");
        std::fs::create_dir_all(&credential_dir).map_err(|e| EphemError::WriteFailure {
            path: credential_dir.clone(),
            source: e,
        })?;
        let db_path = temp_dir.path().join("ephem-test.db");

        let defaults = ExecConfig::default();
        let config = EphemConfig {
            vault: VaultConfig {
                session_ttl_secs: self.session_ttl.as_secs().max(1),
                ..VaultConfig::default()
            },
            recovery: RecoveryConfig {
                kdf_memory_cost: 32768,
                kdf_iterations: 2,
                kdf_parallelism: 1,
                ..RecoveryConfig::default()
            },
            storage: StorageConfig {
                database_path: db_path.to_string_lossy().to_string(),
                wal_mode: true,
            },
            exec: ExecConfig {
                credential_dir: credential_dir.to_string_lossy().to_string(),
                credential_env_vars: self
                    .credential_env_vars
                    .unwrap_or(defaults.credential_env_vars.clone()),
                timeout_secs: self.exec_timeout.as_secs().max(1),
                line_buffer: self.line_buffer,
                drain_grace_ms: 500,
                ..defaults
            },
            ..EphemConfig::default()
        };

        Ok(TestHarness {
            clock: Arc::new(ManualClock::new()),
            store: Arc::new(MemoryRecoveryStore::new()),
            config,
            credential_dir,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with deterministic collaborators and temp storage.
pub struct TestHarness {
    /// Clock shared by every component built from this harness.
    pub clock: Arc<ManualClock>,
    /// Record store that outlives any one vault instance.
    pub store: Arc<MemoryRecoveryStore>,
    /// Configuration pointing at the temp directory.
    pub config: EphemConfig,
    credential_dir: PathBuf,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Harness with default test settings.
    pub fn new() -> Result<Self, EphemError> {
        Self::builder().build()
    }

    pub fn credential_dir(&self) -> &Path {
        &self.credential_dir
    }

    /// Files currently present in the credential directory.
    pub fn credential_artifacts(&self) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = std::fs::read_dir(&self.credential_dir)
            .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
            .unwrap_or_default();
        found.sort();
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_points_config_at_temp_dir() {
        let harness = TestHarness::builder()
            .with_session_ttl(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(harness.config.vault.session_ttl_secs, 2);
        assert!(harness.credential_dir().is_dir());
        assert!(harness.credential_artifacts().is_empty());
        assert!(
            Path::new(&harness.config.storage.database_path).starts_with(harness._temp_dir.path())
        );
    }
}
