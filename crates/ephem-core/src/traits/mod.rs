// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Traits for collaborators outside the secret pipeline.

pub mod clock;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use store::RecoveryStore;
