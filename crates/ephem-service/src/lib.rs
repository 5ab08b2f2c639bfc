// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The command-layer facade over the vault, ledger, and execution pipeline.
//!
//! [`CoreService`] is constructed once per process and shared by reference
//! with whatever dispatches commands. [`SweepScheduler`] drives the periodic
//! expiry sweeps, and [`install_signal_handler`] turns SIGINT/SIGTERM into a
//! cancellation token.

pub mod outcome;
pub mod scheduler;
pub mod service;
pub mod shutdown;

pub use outcome::RecoveryOutcome;
pub use scheduler::SweepScheduler;
pub use service::{CoreService, SweepReport};
pub use shutdown::install_signal_handler;
