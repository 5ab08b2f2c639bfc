// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns figment and validation failures into miette diagnostics.
//!
//! Unknown keys get a "did you mean" hint (Jaro-Winkler over the section's
//! accepted keys) and, when the offending file was read, a labelled span.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Minimum Jaro-Winkler similarity for a suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// One configuration problem, renderable with [`render_errors`].
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown key `{key}` in {section}")]
    #[diagnostic(
        code(ephem::config::unknown_key),
        help("{}", unknown_key_help(suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        key: String,
        /// `[section]` name, or "top level".
        section: String,
        suggestion: Option<String>,
        valid_keys: String,
        #[label("not a recognized key")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("`{key}` has the wrong type: found {found}")]
    #[diagnostic(code(ephem::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        /// Dotted path, e.g. `exec.timeout_secs`.
        key: String,
        found: String,
        expected: String,
        #[label("expected {expected}")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("missing required key `{key}`")]
    #[diagnostic(
        code(ephem::config::missing_key),
        help("add `{key} = <value>` to ephem.toml")
    )]
    MissingKey { key: String },

    /// A value that parsed but breaks a semantic constraint.
    #[error("invalid `{field}`: {message}")]
    #[diagnostic(
        code(ephem::config::validation),
        help("set `{field}` in ephem.toml or via the EPHEM_* environment")
    )]
    Validation { field: String, message: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(ephem::config::other))]
    Other(String),
}

impl ConfigError {
    /// Dotted key the error refers to, when there is one.
    pub fn key(&self) -> Option<&str> {
        match self {
            ConfigError::UnknownKey { key, .. }
            | ConfigError::InvalidType { key, .. }
            | ConfigError::MissingKey { key } => Some(key),
            ConfigError::Validation { field, .. } => Some(field),
            ConfigError::Other(_) => None,
        }
    }
}

fn unknown_key_help(suggestion: Option<&str>, valid_keys: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? accepted keys: {valid_keys}"),
        None => format!("accepted keys: {valid_keys}"),
    }
}

/// Converts every error carried by a `figment::Error` into diagnostics.
///
/// `toml_sources` pairs a file path with its content; a span is attached when
/// the error's metadata names one of those files and the key can be found.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    use figment::error::Kind;

    err.into_iter()
        .map(|error| {
            let section: Vec<String> = error.path.iter().map(|s| s.to_string()).collect();
            let source = source_for(&error, toml_sources);
            match &error.kind {
                Kind::UnknownField(field, expected) => {
                    let (span, src) = locate(source, &section, field);
                    ConfigError::UnknownKey {
                        key: field.clone(),
                        section: describe_section(&section),
                        suggestion: suggest_key(field, expected),
                        valid_keys: expected.join(", "),
                        span,
                        src,
                    }
                }
                Kind::MissingField(field) => ConfigError::MissingKey {
                    key: dotted(&section, field),
                },
                Kind::InvalidType(actual, expected) => {
                    // For type errors the path already ends with the key itself.
                    let (parent, leaf) = match section.split_last() {
                        Some((leaf, parent)) => (parent.to_vec(), leaf.clone()),
                        None => (Vec::new(), String::new()),
                    };
                    let (span, src) = locate(source, &parent, &leaf);
                    ConfigError::InvalidType {
                        key: section.join("."),
                        found: actual.to_string(),
                        expected: expected.to_string(),
                        span,
                        src,
                    }
                }
                _ => ConfigError::Other(error.to_string()),
            }
        })
        .collect()
}

fn describe_section(section: &[String]) -> String {
    if section.is_empty() {
        "top level".to_string()
    } else {
        format!("[{}]", section.join("."))
    }
}

fn dotted(section: &[String], field: &str) -> String {
    if section.is_empty() {
        field.to_string()
    } else {
        format!("{}.{field}", section.join("."))
    }
}

/// The (path, content) pair the error's metadata points at, if it was read.
fn source_for<'a>(
    error: &figment::Error,
    toml_sources: &'a [(String, String)],
) -> Option<(&'a str, &'a str)> {
    let Some(figment::Source::File(path)) = error.metadata.as_ref().and_then(|m| m.source.as_ref())
    else {
        return None;
    };
    let path = path.display().to_string();
    toml_sources
        .iter()
        .find(|(p, _)| *p == path)
        .map(|(p, content)| (p.as_str(), content.as_str()))
}

fn locate(
    source: Option<(&str, &str)>,
    section: &[String],
    key: &str,
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    let Some((path, content)) = source else {
        return (None, None);
    };
    match find_key_offset(content, section, key) {
        Some(offset) => (
            Some(SourceSpan::new(offset.into(), key.len())),
            Some(NamedSource::new(path, content.to_string())),
        ),
        None => (None, None),
    }
}

/// Byte offset of `key` as an assignment inside `[section]` (or before the
/// first header for top-level keys). Comment lines are skipped and the search
/// stops at the next table header.
pub fn find_key_offset(content: &str, section: &[String], key: &str) -> Option<usize> {
    let wanted = (!section.is_empty()).then(|| format!("[{}]", section.join(".")));
    let mut in_section = wanted.is_none();
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();
        let line_start = offset;
        offset += line.len();

        if trimmed.starts_with('[') {
            in_section = wanted.as_deref().is_some_and(|h| trimmed.trim_end().starts_with(h));
            continue;
        }
        if !in_section || trimmed.starts_with('#') {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix(key)
            && rest.trim_start().starts_with('=')
        {
            return Some(line_start + indent);
        }
    }
    None
}

/// Closest accepted key to `unknown`, if any clears the similarity threshold.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Writes each diagnostic to stderr with miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    let handler = miette::GraphicalReportHandler::new();
    for error in errors {
        let mut rendered = String::new();
        match handler.render_report(&mut rendered, error as &dyn Diagnostic) {
            Ok(()) => eprint!("{rendered}"),
            Err(_) => eprintln!("error: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn suggests_session_ttl_for_typo() {
        let valid = &["session_ttl_secs", "sweep_interval_secs"];
        assert_eq!(
            suggest_key("sesion_ttl_secs", valid),
            Some("session_ttl_secs".to_string())
        );
    }

    #[test]
    fn suggests_credential_field_over_credential_dir() {
        let valid = &["credential_dir", "credential_field", "timeout_secs"];
        assert_eq!(
            suggest_key("credential_feild", valid),
            Some("credential_field".to_string())
        );
    }

    #[test]
    fn no_suggestion_for_distant_typo() {
        assert_eq!(suggest_key("zzzzzz", &["name", "log_level"]), None);
    }

    #[test]
    fn finds_key_in_its_section_only() {
        let content = "[exec]\ntimeout_secs = 5\n\n[vault]\n# timeout_secs = 1\n  timeout_secs = 10\n";
        let o = find_key_offset(content, &path(&["vault"]), "timeout_secs").unwrap();
        assert_eq!(&content[o..o + 12], "timeout_secs");
        assert!(content[..o].ends_with("\n  "));

        let o = find_key_offset(content, &path(&["exec"]), "timeout_secs").unwrap();
        assert_eq!(o, "[exec]\n".len());
    }

    #[test]
    fn missing_section_yields_no_offset() {
        let content = "[exec]\ntimeout_secs = 1\n";
        assert!(find_key_offset(content, &path(&["vault"]), "timeout_secs").is_none());
    }

    #[test]
    fn top_level_search_stops_at_first_header() {
        let content = "[vault]\nbogus = 1\n";
        assert!(find_key_offset(content, &[], "bogus").is_none());
        assert_eq!(find_key_offset("bogus = 1\n", &[], "bogus"), Some(0));
    }

    #[test]
    fn key_prefix_is_not_a_match() {
        let content = "[exec]\ntimeout_secs_extra = 1\n";
        assert!(find_key_offset(content, &path(&["exec"]), "timeout_secs").is_none());
    }

    #[test]
    fn validation_error_names_its_field() {
        let err = ConfigError::Validation {
            field: "exec.line_buffer".into(),
            message: "must be greater than 0".into(),
        };
        assert_eq!(err.key(), Some("exec.line_buffer"));
        assert_eq!(err.to_string(), "invalid `exec.line_buffer`: must be greater than 0");
    }
}
