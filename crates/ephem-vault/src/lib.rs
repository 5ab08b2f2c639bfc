// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Short-lived secret storage with crash recovery.
//!
//! [`VaultService`] holds per-session payloads in memory, each encrypted under
//! its own random AES-256-GCM key that is zeroed when the session closes or
//! expires. [`RecoveryLedger`] persists a copy of a session payload encrypted
//! under a key derived from the owner identifier, so a session can be rebuilt
//! after the process is lost.

pub mod crypto;
pub mod kdf;
pub mod ledger;
pub mod locks;
pub mod payload;
pub mod vault;

pub use ledger::RecoveryLedger;
pub use locks::{SessionGuard, SessionLocks};
pub use payload::Payload;
pub use vault::{SessionInfo, VaultService};
