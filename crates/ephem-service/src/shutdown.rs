// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signal-driven shutdown.
//!
//! SIGTERM or SIGINT cancels the returned [`CancellationToken`]; `serve`
//! then cancels every execution and zeroes the vault.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Spawns a task that cancels the returned token on the first shutdown signal.
///
/// Cancelling the token yourself stops the task without further effect.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let watched = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            signal = wait_for_signal() => {
                info!(signal, "shutdown signal received");
                watched.cancel();
            }
            _ = watched.cancelled() => {
                debug!("shutdown requested without a signal");
            }
        }
    });

    token
}

/// Resolves with the name of the first signal that arrives.
async fn wait_for_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                Ok(()) = tokio::signal::ctrl_c() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                ctrl_c_or_pending().await
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c_or_pending().await
    }
}

/// A failed Ctrl+C registration must not look like a signal.
async fn ctrl_c_or_pending() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(e) => {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending().await
        }
    }
}
