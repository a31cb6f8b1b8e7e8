//! dirmeta - Concurrent Directory Metadata Tracker
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use dirmeta::config::{CliArgs, TrackerConfig};
use dirmeta::progress::{print_header, print_summary, ProgressReporter};
use dirmeta::track::{SidecarEntryFactory, TokenPool, TreeTracker};
use dirmeta::visit::checksum_visitor;
use std::panic;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = TrackerConfig::from_args(args).context("Invalid configuration")?;

    // Print header
    if config.show_progress {
        print_header(&config.root, config.file_tokens, &config.sidecar_name);
    }

    // Create tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    runtime.block_on(run_tracker(config))
}

async fn run_tracker(config: TrackerConfig) -> Result<()> {
    // Wire the sidecar factory to the bundled checksum visitor
    let factory = SidecarEntryFactory::new(
        config.entry_options(),
        checksum_visitor(),
        TokenPool::new(config.dir_tokens),
    );
    let tracker = TreeTracker::new(config.clone(), Arc::new(factory));
    let stats = Arc::clone(tracker.stats());

    // Create progress reporter
    let progress = if config.show_progress {
        Some(Arc::new(ProgressReporter::new()))
    } else {
        None
    };

    let ticker = progress.as_ref().map(|p| {
        let progress = Arc::clone(p);
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(200));
            loop {
                tick.tick().await;
                progress.update(&stats);
            }
        })
    });

    // Run the walk, surfacing recoverable errors as they arrive
    let mut running = tracker.spawn();
    while let Some(e) = running.errors.recv().await {
        warn!("{e}");
    }

    let outcome = running
        .handle
        .await
        .unwrap_or_else(|e| panic::resume_unwind(e.into_panic()));

    if let Some(ticker) = ticker {
        ticker.abort();
    }
    if let Some(ref p) = progress {
        p.finish_and_clear();
    }

    let summary = outcome.context("Tracking failed")?;

    // Print summary
    print_summary(&summary, &config.root);

    if summary.errors > 0 {
        info!(errors = summary.errors, "Tracking completed with errors");
    }

    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("dirmeta=debug,warn")
    } else {
        EnvFilter::new("dirmeta=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
