// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for ephem.
//!
//! Provides the error taxonomy shared by every crate in the workspace, the
//! non-secret data model (recovery records, captured process output), and the
//! traits for the collaborators that live outside the secret pipeline: the
//! persistent record store and the wall clock.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::EphemError;
pub use traits::{Clock, RecoveryStore, SystemClock};
pub use types::{CapturedOutput, RecordStatus, RecoveryRecord, SessionId};
