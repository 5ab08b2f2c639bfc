// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for ephem.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::CapturedOutput;

/// The primary error type used across the vault, ledger, and execution pipeline.
#[derive(Debug, Error)]
pub enum EphemError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Persistent store errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// AEAD or key-derivation failures that are not attributable to the caller.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A live session with this id already exists.
    #[error("session already exists: {session_id}")]
    DuplicateSession { session_id: String },

    /// No session (or recovery record) with this id exists.
    #[error("unknown session: {session_id}")]
    UnknownSession { session_id: String },

    /// The session or recovery record is past its expiry.
    #[error("session expired: {session_id}")]
    Expired { session_id: String },

    /// The requester is not the owner of the recovery record.
    ///
    /// Displays identically to [`EphemError::CorruptBlob`].
    #[error("recovery failed")]
    AccessDenied,

    /// The recovery blob failed authentication or could not be decoded.
    ///
    /// Displays identically to [`EphemError::AccessDenied`].
    #[error("recovery failed")]
    CorruptBlob,

    /// The requested credential field is not present in the session payload.
    /// Callers fall back to ambient credentials.
    #[error("credential field `{field}` not present")]
    MissingCredential { field: String },

    /// The transient credential artifact could not be created.
    #[error("failed to write credential artifact in {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external process could not be started.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external process exceeded its wall-clock ceiling and was killed.
    #[error("execution timed out after {duration:?}")]
    Timeout {
        duration: Duration,
        output: Box<CapturedOutput>,
    },

    /// The external process exited with a non-zero status.
    #[error("process exited with status {exit_code}")]
    ProcessFailure {
        exit_code: i32,
        output: Box<CapturedOutput>,
    },

    /// The execution was cancelled while running and the process was killed.
    #[error("execution cancelled")]
    Cancelled { output: Box<CapturedOutput> },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EphemError {
    /// True for the errors that must be surfaced to users only as "recovery failed".
    pub fn is_recovery_failure(&self) -> bool {
        matches!(self, EphemError::AccessDenied | EphemError::CorruptBlob)
    }

    /// Output captured before an execution failed, if this error carries any.
    pub fn captured_output(&self) -> Option<&CapturedOutput> {
        match self {
            EphemError::Timeout { output, .. }
            | EphemError::ProcessFailure { output, .. }
            | EphemError::Cancelled { output } => Some(output),
            _ => None,
        }
    }
}
