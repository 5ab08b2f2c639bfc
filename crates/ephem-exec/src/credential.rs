// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transient credential artifacts for subprocess execution.
//!
//! [`CredentialInjector::materialize`] copies one credential field out of a
//! vault session into a private file (mode 0600, random name, one per
//! invocation) and returns a [`CredentialHandle`] owning it. The file is
//! removed exactly once: by [`CredentialHandle::release`], or when the handle
//! is dropped on any other exit path.
//!
//! A session without the field yields a handle with no artifact; callers then
//! run with ambient credentials. That fallback is intentional.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ephem_config::model::ExecConfig;
use ephem_core::EphemError;
use ephem_vault::VaultService;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// File name prefix of every credential artifact.
pub const ARTIFACT_PREFIX: &str = "ephem-cred-";

/// Counters for exactly-once verification and status output.
#[derive(Debug, Default)]
pub struct InjectorStats {
    materialized: AtomicU64,
    released: AtomicU64,
}

impl InjectorStats {
    pub fn materialized(&self) -> u64 {
        self.materialized.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Handles materialized but not yet released.
    pub fn outstanding(&self) -> u64 {
        self.materialized().saturating_sub(self.released())
    }
}

pub struct CredentialInjector {
    vault: Arc<VaultService>,
    dir: PathBuf,
    env_vars: Vec<String>,
    stats: Arc<InjectorStats>,
}

impl CredentialInjector {
    pub fn new(vault: Arc<VaultService>, dir: impl Into<PathBuf>, env_vars: Vec<String>) -> Self {
        Self {
            vault,
            dir: dir.into(),
            env_vars,
            stats: Arc::new(InjectorStats::default()),
        }
    }

    pub fn from_config(vault: Arc<VaultService>, config: &ExecConfig) -> Self {
        Self::new(
            vault,
            PathBuf::from(&config.credential_dir),
            config.credential_env_vars.clone(),
        )
    }

    pub fn stats(&self) -> &Arc<InjectorStats> {
        &self.stats
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Materializes `field` of the session's payload for a tenant-scoped run.
    ///
    /// Fails with [`EphemError::AccessDenied`] if the session belongs to another
    /// tenant and with [`EphemError::WriteFailure`] if the artifact cannot be
    /// written. In both cases nothing is left on disk.
    pub async fn materialize(
        &self,
        session_id: &str,
        tenant_id: &str,
        field: &str,
    ) -> Result<CredentialHandle, EphemError> {
        let info = self.vault.describe(session_id)?;
        if info.tenant_id != tenant_id {
            warn!(session_id = %session_id, "credential requested for a different tenant");
            return Err(EphemError::AccessDenied);
        }

        let payload = self.vault.get(session_id).await?;
        let value = match payload.require(field) {
            Ok(value) => value,
            Err(EphemError::MissingCredential { .. }) => {
                info!(
                    session_id = %session_id,
                    field = %field,
                    "no credential in session, using ambient credentials"
                );
                self.stats.materialized.fetch_add(1, Ordering::SeqCst);
                return Ok(CredentialHandle::ambient(self.stats.clone()));
            }
            Err(e) => return Err(e),
        };

        let artifact = self.write_artifact(tenant_id, value)?;
        let location = artifact.path().to_string_lossy().to_string();
        let env = self
            .env_vars
            .iter()
            .map(|var| (var.clone(), location.clone()))
            .collect();

        self.stats.materialized.fetch_add(1, Ordering::SeqCst);
        debug!(session_id = %session_id, tenant_id = %tenant_id, path = %location, "credential materialized");
        Ok(CredentialHandle {
            artifact: Some(artifact),
            env,
            stats: self.stats.clone(),
            released: false,
        })
    }

    fn write_artifact(&self, tenant_id: &str, value: &str) -> Result<NamedTempFile, EphemError> {
        let write_failure = |source: std::io::Error| EphemError::WriteFailure {
            path: self.dir.clone(),
            source,
        };

        create_private_dir(&self.dir).map_err(write_failure)?;

        // Created with mode 0600 on unix. Dropped (and deleted) on any error below.
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{ARTIFACT_PREFIX}{}-", sanitize_tenant(tenant_id)))
            .suffix(".json")
            .tempfile_in(&self.dir)
            .map_err(write_failure)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
                .map_err(write_failure)?;
        }

        file.write_all(value.as_bytes()).map_err(write_failure)?;
        file.as_file().sync_all().map_err(write_failure)?;
        Ok(file)
    }
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
    }
}

/// Keeps `[A-Za-z0-9_-]`, replaces anything else, and bounds the length.
fn sanitize_tenant(tenant_id: &str) -> String {
    let cleaned: String = tenant_id
        .chars()
        .take(32)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "tenant".to_string()
    } else {
        cleaned
    }
}

/// Scoped ownership of one materialized credential.
///
/// Release happens once, either explicitly or on drop.
pub struct CredentialHandle {
    artifact: Option<NamedTempFile>,
    env: BTreeMap<String, String>,
    stats: Arc<InjectorStats>,
    released: bool,
}

impl CredentialHandle {
    fn ambient(stats: Arc<InjectorStats>) -> Self {
        Self {
            artifact: None,
            env: BTreeMap::new(),
            stats,
            released: false,
        }
    }

    /// False when the session had no credential and ambient credentials apply.
    pub fn is_injected(&self) -> bool {
        self.artifact.is_some()
    }

    /// Environment variables pointing at the artifact. Empty when not injected.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact.as_ref().map(|f| f.path())
    }

    /// Deletes the artifact, if any.
    pub fn release(mut self) -> Result<(), EphemError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), EphemError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.stats.released.fetch_add(1, Ordering::SeqCst);

        let Some(artifact) = self.artifact.take() else {
            return Ok(());
        };
        let path = artifact.path().to_path_buf();
        match artifact.close() {
            Ok(()) => {
                debug!(path = %path.display(), "credential released");
                Ok(())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to delete credential artifact");
                Err(EphemError::Internal(format!(
                    "failed to delete credential artifact {}: {e}",
                    path.display()
                )))
            }
        }
    }
}

impl Drop for CredentialHandle {
    fn drop(&mut self) {
        let _ = self.release_inner();
    }
}

impl std::fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHandle")
            .field("artifact", &self.artifact_path())
            .field("env_vars", &self.env.keys().collect::<Vec<_>>())
            .field("released", &self.released)
            .finish()
    }
}

/// Removes credential artifacts left behind by a previous process instance.
///
/// Only files named `ephem-cred-*` are touched. A missing directory counts
/// as clean. Returns how many files were removed.
pub fn sweep_stale_artifacts(dir: &Path) -> Result<usize, EphemError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(EphemError::WriteFailure {
                path: dir.to_path_buf(),
                source: e,
            });
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let is_artifact = name.to_string_lossy().starts_with(ARTIFACT_PREFIX);
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !(is_artifact && is_file) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to remove stale credential artifact"),
        }
    }

    if removed > 0 {
        info!(removed, dir = %dir.display(), "removed stale credential artifacts");
    }
    Ok(removed)
}
