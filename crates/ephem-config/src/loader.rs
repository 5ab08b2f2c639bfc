// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with figment.
//!
//! Later layers win: compiled defaults, then [`config_paths`] in order, then
//! `EPHEM_*` environment variables.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::EphemConfig;

/// Top-level tables; `EPHEM_<SECTION>_<KEY>` maps to `<section>.<key>`.
const SECTIONS: &[&str] = &["service", "vault", "recovery", "storage", "exec"];

/// Config files consulted by [`load_config`], lowest precedence first:
/// `/etc/ephem/ephem.toml`, `$XDG_CONFIG_HOME/ephem/ephem.toml`, `./ephem.toml`.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/ephem/ephem.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("ephem").join("ephem.toml"));
    }
    paths.push(PathBuf::from("ephem.toml"));
    paths
}

/// Loads from every file in [`config_paths`] plus the environment.
pub fn load_config() -> Result<EphemConfig, figment::Error> {
    build_figment().extract()
}

/// TOML text over defaults. No files, no environment.
pub fn load_config_from_str(toml_content: &str) -> Result<EphemConfig, figment::Error> {
    defaults().merge(Toml::string(toml_content)).extract()
}

/// One explicit file plus the environment; the XDG hierarchy is skipped.
pub fn load_config_from_path(path: &Path) -> Result<EphemConfig, figment::Error> {
    defaults()
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The figment behind [`load_config`], before extraction.
pub fn build_figment() -> Figment {
    config_paths()
        .into_iter()
        .fold(defaults(), |figment, path| figment.merge(Toml::file(path)))
        .merge(env_provider())
}

fn defaults() -> Figment {
    Figment::new().merge(Serialized::defaults(EphemConfig::default()))
}

/// Splits only at the section boundary, so `EPHEM_EXEC_LINE_BUFFER`
/// becomes `exec.line_buffer`.
fn env_provider() -> Env {
    Env::prefixed("EPHEM_").map(|key| {
        let key = key.as_str();
        SECTIONS
            .iter()
            .find_map(|section| {
                key.strip_prefix(section)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .map(|rest| format!("{section}.{rest}"))
            })
            .unwrap_or_else(|| key.to_string())
            .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_nested_keys_with_underscores() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("EPHEM_VAULT_SESSION_TTL_SECS", "90");
            jail.set_env("EPHEM_EXEC_CREDENTIAL_FIELD", "sa_key");
            let config = load_config_from_path(Path::new("missing.toml"))?;
            assert_eq!(config.vault.session_ttl_secs, 90);
            assert_eq!(config.exec.credential_field, "sa_key");
            Ok(())
        });
    }

    #[test]
    fn local_file_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "ephem.toml",
                r#"
[recovery]
sweep_interval_secs = 7200
"#,
            )?;
            let config = load_config()?;
            assert_eq!(config.recovery.sweep_interval_secs, 7200);
            assert_eq!(config.vault.sweep_interval_secs, 60);
            Ok(())
        });
    }

    #[test]
    fn env_section_prefix_is_split_once() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("EPHEM_EXEC_LINE_BUFFER", "64");
            jail.set_env("EPHEM_RECOVERY_KDF_ITERATIONS", "5");
            let config = load_config()?;
            assert_eq!(config.exec.line_buffer, 64);
            assert_eq!(config.recovery.kdf_iterations, 5);
            Ok(())
        });
    }

    #[test]
    fn local_file_has_highest_file_precedence() {
        let paths = config_paths();
        assert_eq!(paths.first(), Some(&PathBuf::from("/etc/ephem/ephem.toml")));
        assert_eq!(paths.last(), Some(&PathBuf::from("ephem.toml")));
    }
}
