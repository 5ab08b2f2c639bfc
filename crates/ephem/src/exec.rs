// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ephem exec` command implementation.
//!
//! One-shot flow: open a session, load the tenant credential and any extra
//! fields, seal a recovery record, stream the command with progress on
//! stderr, record the outcome, and close the session.
//!
//! SIGINT or SIGTERM stops the run: the child's process group is killed and
//! its credential released, the record is marked failed, and the session is
//! closed before the process exits with 130.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use ephem_config::EphemConfig;
use ephem_core::{CapturedOutput, EphemError, SystemClock};
use ephem_exec::CommandSpec;
use ephem_service::{CoreService, install_signal_handler};
use ephem_vault::Payload;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// User the session and recovery record belong to.
    #[arg(long)]
    pub owner: String,

    /// Tenant whose credential is injected.
    #[arg(long)]
    pub tenant: String,

    /// File holding the tenant credential (stored under `exec.credential_field`).
    #[arg(long, value_name = "PATH")]
    pub credential_file: Option<PathBuf>,

    /// Extra session field as `key=value`. May be repeated.
    #[arg(long, value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Override `exec.timeout_secs` for this run.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Working directory for the command.
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Command and arguments to run.
    #[arg(last = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

/// Runs the command and returns the process exit code to use.
pub async fn run_exec(config: EphemConfig, args: ExecArgs) -> i32 {
    match execute(config, args).await {
        Ok(output) => {
            print!("{}", output.stdout);
            0
        }
        Err(e) => {
            eprintln!("ephem exec: {e}");
            exit_code_for(&e)
        }
    }
}

async fn execute(config: EphemConfig, args: ExecArgs) -> Result<CapturedOutput, EphemError> {
    let stop = install_signal_handler();
    let result = execute_until(config, args, &stop).await;
    // Ends the signal watcher task.
    stop.cancel();
    result
}

async fn execute_until(
    config: EphemConfig,
    args: ExecArgs,
    stop: &CancellationToken,
) -> Result<CapturedOutput, EphemError> {
    let fields = build_payload(&config, &args)?;
    let command = build_command(&args)?;

    let service = CoreService::open(config, Arc::new(SystemClock)).await?;
    service.startup()?;

    let session_id = service.open_session(&args.owner, &args.tenant).await?;
    let result = run_until_stopped(
        &service,
        session_id.as_str(),
        run_in_session(&service, session_id.as_str(), &args.owner, fields, &command),
        stop,
    )
    .await;

    if let Err(e) = service.mark_outcome(session_id.as_str(), result.is_ok()).await {
        warn!(session_id = %session_id, error = %e, "could not record execution outcome");
    }
    service.close_session(session_id.as_str()).await;
    service.shutdown().await;
    result
}

/// Drives `run` until it finishes or `stop` fires.
///
/// Once the execution is registered, stopping cancels it and keeps polling
/// `run` so the streamer can kill the child and release the credential.
/// Before that point `run` is dropped and nothing is spawned.
async fn run_until_stopped<F>(
    service: &CoreService,
    session_id: &str,
    run: F,
    stop: &CancellationToken,
) -> Result<CapturedOutput, EphemError>
where
    F: Future<Output = Result<CapturedOutput, EphemError>>,
{
    tokio::pin!(run);
    tokio::select! {
        result = &mut run => result,
        () = stop.cancelled() => {
            warn!(session_id = %session_id, "interrupted, stopping execution");
            if service.is_executing(session_id) {
                let (_, result) = tokio::join!(service.cancel_execution(session_id), &mut run);
                result
            } else {
                Err(EphemError::Cancelled {
                    output: Box::default(),
                })
            }
        }
    }
}

async fn run_in_session(
    service: &CoreService,
    session_id: &str,
    owner: &str,
    fields: Payload,
    command: &CommandSpec,
) -> Result<CapturedOutput, EphemError> {
    service.store_secrets(session_id, fields).await?;
    let recoverable_for = service.seal_recovery(session_id, owner).await?;
    info!(session_id = %session_id, recoverable_secs = recoverable_for.as_secs(), "recovery record sealed");

    service
        .begin_execution(session_id, command, |progress| {
            eprintln!("{progress}");
            Ok(())
        })
        .await
}

fn build_payload(config: &EphemConfig, args: &ExecArgs) -> Result<Payload, EphemError> {
    let mut payload = Payload::new();
    for pair in &args.set {
        let (key, value) = pair
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| EphemError::Config(format!("--set expects key=value, got `{pair}`")))?;
        payload.insert(key, value);
    }
    if let Some(path) = &args.credential_file {
        let credential = std::fs::read_to_string(path)
            .map_err(|e| EphemError::Config(format!("cannot read {}: {e}", path.display())))?;
        payload.insert(config.exec.credential_field.as_str(), credential);
    }
    Ok(payload)
}

fn build_command(args: &ExecArgs) -> Result<CommandSpec, EphemError> {
    let (program, rest) = args
        .command
        .split_first()
        .ok_or_else(|| EphemError::Config("no command given".into()))?;
    let mut command = CommandSpec::new(program.as_str()).args(rest.iter().cloned());
    if let Some(secs) = args.timeout {
        command = command.timeout(Duration::from_secs(secs));
    }
    if let Some(dir) = &args.workdir {
        command = command.current_dir(dir.clone());
    }
    Ok(command)
}

/// Mirrors the child's exit code where there is one.
fn exit_code_for(error: &EphemError) -> i32 {
    match error {
        EphemError::ProcessFailure { exit_code, .. } if *exit_code > 0 => *exit_code,
        EphemError::Timeout { .. } => 124,
        EphemError::Cancelled { .. } => 130,
        _ => 1,
    }
}
