// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ephem - short-lived credential vault and change-apply runner.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod exec;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ephem_config::EphemConfig;

/// Ephem - short-lived credential vault and change-apply runner.
#[derive(Parser, Debug)]
#[command(name = "ephem", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the XDG hierarchy.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the sweep scheduler until SIGTERM or Ctrl+C.
    Serve,
    /// Run one command with a tenant credential injected.
    Exec(exec::ExecArgs),
    /// Run one vault and ledger sweep, then exit.
    Sweep,
}

fn load_config(path: Option<&PathBuf>) -> EphemConfig {
    let loaded = match path {
        Some(path) => ephem_config::load_and_validate_path(path),
        None => ephem_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            ephem_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("ephem: use --help for available commands");
        return;
    };

    let config = load_config(cli.config.as_ref());
    init_tracing(&config.service.log_level);

    let code = match command {
        Commands::Serve => match serve::run_serve(config).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("ephem serve: {e}");
                1
            }
        },
        Commands::Exec(args) => exec::run_exec(config, args).await,
        Commands::Sweep => match serve::run_sweep_once(config).await {
            Ok(report) => {
                println!(
                    "swept {} session(s), {} recovery record(s), {} stale credential file(s)",
                    report.sweep.sessions_removed,
                    report.sweep.records_removed,
                    report.stale_artifacts
                );
                0
            }
            Err(e) => {
                eprintln!("ephem sweep: {e}");
                1
            }
        },
    };
    std::process::exit(code);
}

/// Initialize the tracing subscriber with an env filter.
///
/// `RUST_LOG` wins over the configured level. Logs go to stderr so that
/// command output on stdout stays clean.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ephem={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
