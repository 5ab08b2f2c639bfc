// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running an external change-apply process against a vault session.
//!
//! - [`CredentialInjector`] materializes one credential field of a session as
//!   a short-lived file plus environment mapping, released through a
//!   [`CredentialHandle`] guard.
//! - [`ExecutionStreamer`] spawns the process, hands each output line to a
//!   callback as it arrives, and enforces timeout and cancellation.
//! - [`ProgressTracker`] turns those lines into a progress summary.

pub mod command;
pub mod credential;
pub mod progress;
pub mod streamer;

pub use command::CommandSpec;
pub use credential::{CredentialHandle, CredentialInjector, InjectorStats, sweep_stale_artifacts};
pub use progress::{LineEvent, ProgressTracker, ResourceAction};
pub use streamer::{ExecutionState, ExecutionStreamer, OutputLine, OutputStream};
