// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for ephem.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level ephem configuration.
///
/// Every section is optional and defaults to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EphemConfig {
    /// Process identity and logging.
    #[serde(default)]
    pub service: ServiceConfig,

    /// In-memory secret vault settings.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Crash-recovery ledger settings.
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Recovery record storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Credential injection and process execution settings.
    #[serde(default)]
    pub exec: ExecConfig,
}

/// Process identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Display name used in logs.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "ephem".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// In-memory vault configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    /// Lifetime of a session from `open` (default: 1800 = 30 minutes).
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Period of the vault expiry sweep (default: 60).
    #[serde(default = "default_vault_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl VaultConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_vault_sweep_interval_secs(),
        }
    }
}

fn default_session_ttl_secs() -> u64 {
    1800
}

fn default_vault_sweep_interval_secs() -> u64 {
    60
}

/// Recovery ledger configuration.
///
/// The owner-derived recovery key is stretched with Argon2id so that guessing
/// owner identifiers offline is expensive.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB).
    #[serde(default = "default_kdf_memory_cost")]
    pub kdf_memory_cost: u32,

    /// Argon2id iteration count (default: 3).
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Argon2id parallelism lanes (default: 4).
    #[serde(default = "default_kdf_parallelism")]
    pub kdf_parallelism: u32,

    /// Period of the recovery record expiry sweep (default: 3600).
    #[serde(default = "default_recovery_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            kdf_memory_cost: default_kdf_memory_cost(),
            kdf_iterations: default_kdf_iterations(),
            kdf_parallelism: default_kdf_parallelism(),
            sweep_interval_secs: default_recovery_sweep_interval_secs(),
        }
    }
}

fn default_kdf_memory_cost() -> u32 {
    65536
}

fn default_kdf_iterations() -> u32 {
    3
}

fn default_kdf_parallelism() -> u32 {
    4
}

fn default_recovery_sweep_interval_secs() -> u64 {
    3600
}

/// Recovery record storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("ephem").join("recovery.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("recovery.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Credential injection and change-apply execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExecConfig {
    /// Directory for transient credential artifacts.
    #[serde(default = "default_credential_dir")]
    pub credential_dir: String,

    /// Session payload field holding the tenant credential.
    #[serde(default = "default_credential_field")]
    pub credential_field: String,

    /// Environment variables pointed at the credential artifact, one per
    /// provider convention.
    #[serde(default = "default_credential_env_vars")]
    pub credential_env_vars: Vec<String>,

    /// Variables copied from the service environment into the child process.
    #[serde(default = "default_passthrough_env")]
    pub passthrough_env: Vec<String>,

    /// Wall-clock ceiling for a single execution (default: 1800).
    #[serde(default = "default_exec_timeout_secs")]
    pub timeout_secs: u64,

    /// Capacity of the line queue between output readers and the consumer.
    #[serde(default = "default_line_buffer")]
    pub line_buffer: usize,

    /// How long to wait for output readers to drain after a kill, in ms.
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
}

impl ExecConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            credential_dir: default_credential_dir(),
            credential_field: default_credential_field(),
            credential_env_vars: default_credential_env_vars(),
            passthrough_env: default_passthrough_env(),
            timeout_secs: default_exec_timeout_secs(),
            line_buffer: default_line_buffer(),
            drain_grace_ms: default_drain_grace_ms(),
        }
    }
}

fn default_credential_dir() -> String {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("ephem-credentials")
        .to_string_lossy()
        .into_owned()
}

fn default_credential_field() -> String {
    "credentials_json".to_string()
}

fn default_credential_env_vars() -> Vec<String> {
    vec![
        "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
        "GOOGLE_CREDENTIALS".to_string(),
        "CLOUDSDK_AUTH_CREDENTIAL_FILE_OVERRIDE".to_string(),
    ]
}

fn default_passthrough_env() -> Vec<String> {
    vec![
        "PATH".to_string(),
        "HOME".to_string(),
        "TF_IN_AUTOMATION".to_string(),
    ]
}

fn default_exec_timeout_secs() -> u64 {
    1800
}

fn default_line_buffer() -> usize {
    256
}

fn default_drain_grace_ms() -> u64 {
    2000
}
