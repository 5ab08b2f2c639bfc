// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks semantic constraints serde attributes cannot express: non-empty
//! paths, positive durations, and KDF cost floors.

use crate::diagnostic::ConfigError;
use crate::model::EphemConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Collects every failure instead of stopping at the first.
pub fn validate_config(config: &EphemConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |field: &str, message: String| {
        errors.push(ConfigError::Validation {
            field: field.to_string(),
            message,
        })
    };

    if config.vault.session_ttl_secs == 0 {
        fail("vault.session_ttl_secs", "must be greater than 0".to_string());
    }

    if config.vault.sweep_interval_secs == 0 {
        fail("vault.sweep_interval_secs", "must be greater than 0".to_string());
    }

    if config.recovery.sweep_interval_secs == 0 {
        fail("recovery.sweep_interval_secs", "must be greater than 0".to_string());
    }

    if config.recovery.kdf_memory_cost < 32768 {
        fail(
            "recovery.kdf_memory_cost",
            format!("must be at least 32768 (32 MiB), got {}", config.recovery.kdf_memory_cost),
        );
    }

    if config.recovery.kdf_iterations < 2 {
        fail(
            "recovery.kdf_iterations",
            format!("must be at least 2, got {}", config.recovery.kdf_iterations),
        );
    }

    if config.recovery.kdf_parallelism < 1 {
        fail(
            "recovery.kdf_parallelism",
            format!("must be at least 1, got {}", config.recovery.kdf_parallelism),
        );
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path", "must not be empty".to_string());
    }

    if config.exec.credential_dir.trim().is_empty() {
        fail("exec.credential_dir", "must not be empty".to_string());
    }

    if config.exec.credential_field.trim().is_empty() {
        fail("exec.credential_field", "must not be empty".to_string());
    }

    if config.exec.credential_env_vars.is_empty() {
        fail("exec.credential_env_vars", "must name at least one variable".to_string());
    }

    for name in &config.exec.credential_env_vars {
        if name.is_empty() || name.contains('=') {
            fail(
                "exec.credential_env_vars",
                format!("entry `{name}` is not a valid variable name"),
            );
        }
    }

    if config.exec.timeout_secs == 0 {
        fail("exec.timeout_secs", "must be greater than 0".to_string());
    }

    if config.exec.line_buffer == 0 {
        fail("exec.line_buffer", "must be greater than 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_message(errors: &[ConfigError], needle: &str) -> bool {
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { field, message } if field.contains(needle) || message.contains(needle)))
    }

    #[test]
    fn default_config_validates() {
        let config = EphemConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn zero_session_ttl_fails_validation() {
        let mut config = EphemConfig::default();
        config.vault.session_ttl_secs = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "session_ttl_secs"));
    }

    #[test]
    fn weak_kdf_parameters_fail_validation() {
        let mut config = EphemConfig::default();
        config.recovery.kdf_memory_cost = 1024;
        config.recovery.kdf_iterations = 1;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "kdf_memory_cost"));
        assert!(has_message(&errors, "kdf_iterations"));
    }

    #[test]
    fn empty_credential_env_vars_fails_validation() {
        let mut config = EphemConfig::default();
        config.exec.credential_env_vars.clear();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "credential_env_vars"));
    }

    #[test]
    fn malformed_env_var_name_fails_validation() {
        let mut config = EphemConfig::default();
        config.exec.credential_env_vars = vec!["BAD=NAME".to_string()];
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "BAD=NAME"));
    }

    #[test]
    fn all_errors_are_collected() {
        let mut config = EphemConfig::default();
        config.storage.database_path = " ".to_string();
        config.exec.line_buffer = 0;
        config.exec.timeout_secs = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
