// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ephem serve` and `ephem sweep` command implementations.
//!
//! `serve` owns the process-wide [`CoreService`]: it clears stale credential
//! artifacts, runs the sweep scheduler, and on SIGTERM/Ctrl+C cancels every
//! execution and zeroes the vault before exiting.

use std::sync::Arc;

use ephem_config::EphemConfig;
use ephem_core::{Clock, EphemError, SystemClock};
use ephem_service::{CoreService, SweepReport, SweepScheduler, install_signal_handler};
use tracing::{info, warn};

/// Result of a one-shot `ephem sweep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepOnce {
    pub sweep: SweepReport,
    pub stale_artifacts: usize,
}

/// Run the scheduler until a shutdown signal arrives.
pub async fn run_serve(config: EphemConfig) -> Result<(), EphemError> {
    info!(name = %config.service.name, "starting ephem serve");
    let service = Arc::new(CoreService::open(config, Arc::new(SystemClock)).await?);

    let stale = service.startup()?;
    if stale > 0 {
        warn!(count = stale, "removed credential artifacts left by a previous process");
    }

    let cancel = install_signal_handler();
    let scheduler = SweepScheduler::from_config(service.clone()).spawn(cancel.clone());

    cancel.cancelled().await;
    if let Err(e) = scheduler.await {
        warn!(error = %e, "sweep scheduler task ended abnormally");
    }

    service.shutdown().await;
    info!("ephem serve shutdown complete");
    Ok(())
}

/// Run one sweep of both stores and the credential directory.
///
/// A fresh process has an empty vault, so in practice this clears expired
/// recovery records and stale artifacts.
pub async fn run_sweep_once(config: EphemConfig) -> Result<SweepOnce, EphemError> {
    let clock = Arc::new(SystemClock);
    let service = CoreService::open(config, clock.clone()).await?;
    let stale_artifacts = service.startup()?;
    let sweep = service.sweep_tick(clock.now()).await?;
    Ok(SweepOnce {
        sweep,
        stale_artifacts,
    })
}
