//! CLI entry point for the catalog downloader.

use std::process::ExitCode;

use anyhow::{Context, Result};
use catalog_core::{Coordinator, RunOutcome};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

/// Conventional exit status for SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > --log-level > verbose flag > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.default_log_level()));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let config = args.to_config();
    info!(query = %config.query, mode = %config.mode, "catalog downloader starting");

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let coordinator = Coordinator::prepare(config, cancel)
        .await
        .context("failed to set up the run")?;
    let results = coordinator.config().query_dir();
    let report = coordinator
        .run()
        .await
        .context("run finished but its summary could not be saved")?;

    print!("{}", report.render());
    println!("  results: {}", results.display());

    Ok(exit_code(&report.outcome))
}

/// First Ctrl-C asks the pipeline to wind down; a second one exits at once.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("cannot listen for Ctrl-C, interrupts will not be graceful");
            return;
        }
        warn!("interrupt received, finishing in-flight requests (Ctrl-C again to abort)");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("second interrupt, aborting");
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
    });
}

fn exit_code(outcome: &RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Completed => ExitCode::SUCCESS,
        RunOutcome::Interrupted => ExitCode::from(EXIT_INTERRUPTED),
        RunOutcome::ResolutionFailed { .. } | RunOutcome::ProxiesExhausted => ExitCode::FAILURE,
    }
}
