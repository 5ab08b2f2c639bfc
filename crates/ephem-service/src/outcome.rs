// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! What the presentation layer is told about seal and recover calls.

use std::time::Duration;

use ephem_core::EphemError;

/// Result of a `seal_recovery` or `recover` call, safe to show to a user.
///
/// Wrong-owner and tampered-blob failures produce the same message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub remaining_ttl: Duration,
    message: String,
}

impl RecoveryOutcome {
    pub fn from_result(result: &Result<Duration, EphemError>) -> Self {
        match result {
            Ok(remaining) => Self {
                success: true,
                remaining_ttl: *remaining,
                message: format!("session available for {}", format_remaining(*remaining)),
            },
            Err(e) => Self {
                success: false,
                remaining_ttl: Duration::ZERO,
                message: failure_message(e).to_string(),
            },
        }
    }

    pub fn user_message(&self) -> &str {
        &self.message
    }
}

fn failure_message(error: &EphemError) -> &'static str {
    // Wrong owner and tampering must read the same.
    if error.is_recovery_failure() {
        return "recovery failed";
    }
    match error {
        EphemError::Expired { .. } => "recovery failed: the session has expired",
        EphemError::UnknownSession { .. } => "recovery failed: no recoverable session",
        _ => "recovery failed",
    }
}

fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, s) => format!("{s}s"),
        (0, m, s) => format!("{m}m {s}s"),
        (h, m, _) => format!("{h}h {m}m"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_and_corrupt_blob_are_indistinguishable() {
        let denied = RecoveryOutcome::from_result(&Err(EphemError::AccessDenied));
        let corrupt = RecoveryOutcome::from_result(&Err(EphemError::CorruptBlob));
        assert_eq!(denied, corrupt);
        assert_eq!(denied.user_message(), "recovery failed");
        assert!(!denied.success);
    }

    #[test]
    fn success_reports_remaining_time() {
        let outcome = RecoveryOutcome::from_result(&Ok(Duration::from_secs(125)));
        assert!(outcome.success);
        assert_eq!(outcome.remaining_ttl, Duration::from_secs(125));
        assert_eq!(outcome.user_message(), "session available for 2m 5s");
    }

    #[test]
    fn hours_are_summarized() {
        assert_eq!(format_remaining(Duration::from_secs(3 * 3600 + 61)), "3h 1m");
        assert_eq!(format_remaining(Duration::from_secs(9)), "9s");
    }
}
