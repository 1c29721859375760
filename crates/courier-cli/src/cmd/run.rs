//! `courier run` - deliver pending retries and unread source positions

use anyhow::{Context, Result};
use clap::Args;
use signal_hook::consts::{SIGINT, SIGTERM};

use courier_core::{SharedProgress, ShutdownSignal};
use courier_pipeline::{Pipeline, RunMode};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Only redeliver previously failed retriable events; read no new data
    #[arg(long)]
    pub retry_only: bool,

    /// Persist raw destination responses as REPORT records
    #[arg(long)]
    pub record_reports: bool,
}

/// First signal: stop after the current blob.
/// Second signal: exit immediately.
fn setup_signal_handler(shutdown: &ShutdownSignal) -> Result<()> {
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(signal, 130, shutdown.flag())
            .context("failed to register signal handler")?;
        signal_hook::flag::register(signal, shutdown.flag())
            .context("failed to register signal handler")?;
    }
    Ok(())
}

pub fn run(args: RunArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let mut pipeline_config = config.pipeline.clone();
    pipeline_config.record_reports |= args.record_reports;
    let mode = if args.retry_only {
        RunMode::RetryOnly
    } else {
        RunMode::Full
    };

    let sources = config
        .source()?
        .open(&pipeline_config)
        .context("failed to open source")?;
    if sources.is_empty() {
        log::warn!("source matched no locations, nothing to deliver");
        return Ok(());
    }
    let sink = config
        .sink()?
        .build(&pipeline_config)
        .context("failed to build sink")?;
    let store = super::open_store(config)?;

    let shutdown = ShutdownSignal::new();
    setup_signal_handler(&shutdown)?;

    log::info!(
        "Delivering {} location(s) to {} (checkpoint: {})",
        sources.len(),
        sink.name(),
        config.checkpoint.path.display()
    );

    let report = Pipeline::new(pipeline_config, sink, store)?
        .with_shutdown(shutdown)
        .with_progress(progress.clone())
        .run(sources, mode)?;

    report.log();
    if report.interrupted {
        progress.println("Interrupted. Rerun the same command to resume.");
    } else if report.events.failed_retriable > 0 {
        progress.println(format!(
            "{} events still failing with retriable errors; rerun with --retry-only to redeliver them",
            report.events.failed_retriable
        ));
    }
    Ok(())
}
