// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic expiry sweeps.
//!
//! The vault and the recovery ledger sweep on independent periods; the
//! ledger's is normally much longer than the vault TTL so records outlive
//! the sessions they snapshot.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::CoreService;

pub struct SweepScheduler {
    service: Arc<CoreService>,
    vault_interval: Duration,
    ledger_interval: Duration,
}

impl SweepScheduler {
    pub fn new(service: Arc<CoreService>, vault_interval: Duration, ledger_interval: Duration) -> Self {
        // tokio intervals reject a zero period.
        let floor = Duration::from_millis(1);
        Self {
            service,
            vault_interval: vault_interval.max(floor),
            ledger_interval: ledger_interval.max(floor),
        }
    }

    /// Uses `[vault].sweep_interval_secs` and `[recovery].sweep_interval_secs`.
    pub fn from_config(service: Arc<CoreService>) -> Self {
        let vault_interval = Duration::from_secs(service.config().vault.sweep_interval_secs);
        let ledger_interval = Duration::from_secs(service.config().recovery.sweep_interval_secs);
        Self::new(service, vault_interval, ledger_interval)
    }

    /// Runs both sweeps until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut vault_tick = tokio::time::interval(self.vault_interval);
        let mut ledger_tick = tokio::time::interval(self.ledger_interval);
        vault_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ledger_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the first immediate ticks.
        vault_tick.tick().await;
        ledger_tick.tick().await;

        info!(
            vault_interval_secs = self.vault_interval.as_secs(),
            ledger_interval_secs = self.ledger_interval.as_secs(),
            "sweep scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("sweep scheduler shutting down");
                    break;
                }
                _ = vault_tick.tick() => {
                    let now = self.service.clock().now();
                    let removed = self.service.vault().sweep(now).await;
                    debug!(removed, "vault sweep tick");
                }
                _ = ledger_tick.tick() => {
                    let now = self.service.clock().now();
                    match self.service.ledger().sweep_expired(now).await {
                        Ok(removed) => debug!(removed, "ledger sweep tick"),
                        Err(e) => warn!(error = %e, "ledger sweep failed (non-fatal)"),
                    }
                }
            }
        }
    }
}
