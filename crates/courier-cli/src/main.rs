//! courier - resumable batch delivery of events to external destinations
//!
//! Reads events from files or paginated HTTP tables, delivers them in
//! batches with bounded retries, and checkpoints progress so interrupted or
//! partially failed runs can be resumed.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Resumable batch delivery of events to external destinations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./courier.toml or ~/.config/courier/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Checkpoint DAG name (overrides [pipeline].dag_name)
    #[arg(long, global = true)]
    dag: Option<String>,

    /// Maximum delivery attempts per item
    #[arg(long, global = true)]
    max_attempts: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Deliver pending retries, then every unread source position
    Run(cmd::run::RunArgs),
    /// Inspect or prune the checkpoint log
    Checkpoint(cmd::checkpoint::CheckpointArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(courier_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug; status lines show activity
    //   non-TTY: info unless --debug; logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    courier_core::init_logging(quiet, cli.debug, multi);

    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };
    if let Some(dag) = cli.dag {
        config.pipeline.dag_name = dag;
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.pipeline.max_attempts = max_attempts;
    }

    match cli.command {
        Command::Run(args) => cmd::run::run(args, &config, &progress),
        Command::Checkpoint(args) => cmd::checkpoint::run(args, &config),
        Command::Config => {
            cmd::show_config(&config);
            Ok(())
        }
    }
}
