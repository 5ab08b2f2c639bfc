// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for ephem integration tests.
//!
//! Provides deterministic collaborators and harness infrastructure for fast,
//! CI-runnable tests without a real database or wall clock.
//!
//! # Components
//!
//! - [`ManualClock`] - Clock that only moves when told to
//! - [`MemoryRecoveryStore`] - In-memory `RecoveryStore`
//! - [`TestHarness`] - Temp directories plus a fast, test-sized configuration

pub mod clock;
pub mod harness;
pub mod memory_store;

pub use clock::ManualClock;
pub use harness::TestHarness;
pub use memory_store::MemoryRecoveryStore;
