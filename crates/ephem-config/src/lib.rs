// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for ephem.
//!
//! TOML configuration with strict key checking (`deny_unknown_fields`), an XDG
//! file hierarchy, `EPHEM_*` environment overrides, and miette diagnostics with
//! typo suggestions.
//!
//! ```no_run
//! use ephem_config::load_and_validate;
//!
//! let config = load_and_validate().expect("config errors");
//! println!("session ttl: {}s", config.vault.session_ttl_secs);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

pub use diagnostic::{render_errors, ConfigError};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::EphemConfig;

use std::path::Path;

/// Loads the XDG hierarchy plus environment and validates the result.
///
/// Every problem is reported: extraction errors carry spans into whichever
/// file produced them, and validation does not stop at the first failure.
pub fn load_and_validate() -> Result<EphemConfig, Vec<ConfigError>> {
    checked(loader::load_config(), || {
        loader::config_paths().iter().filter_map(|p| read_source(p)).collect()
    })
}

/// Like [`load_and_validate`] but reads one explicit file instead of the hierarchy.
pub fn load_and_validate_path(path: &Path) -> Result<EphemConfig, Vec<ConfigError>> {
    checked(loader::load_config_from_path(path), || {
        read_source(path).into_iter().collect()
    })
}

/// Parses and validates TOML text with no file or environment layers.
pub fn load_and_validate_str(toml_content: &str) -> Result<EphemConfig, Vec<ConfigError>> {
    checked(loader::load_config_from_str(toml_content), || {
        vec![("<inline>".to_string(), toml_content.to_string())]
    })
}

fn checked(
    loaded: Result<EphemConfig, figment::Error>,
    sources: impl FnOnce() -> Vec<(String, String)>,
) -> Result<EphemConfig, Vec<ConfigError>> {
    match loaded {
        Ok(config) => validation::validate_config(&config).map(|()| config),
        Err(err) => Err(diagnostic::figment_to_config_errors(err, &sources())),
    }
}

/// File content keyed the way figment reports its source path.
fn read_source(path: &Path) -> Option<(String, String)> {
    let content = std::fs::read_to_string(path).ok()?;
    let shown = if path.is_relative() {
        std::env::current_dir()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    } else {
        path.to_path_buf()
    };
    Some((shown.display().to_string(), content))
}
