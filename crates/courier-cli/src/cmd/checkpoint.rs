//! `courier checkpoint` - inspect and prune the checkpoint log

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color};

use courier_core::{fmt_num, merge_ranges};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct CheckpointArgs {
    #[command(subcommand)]
    pub action: CheckpointAction,
}

#[derive(Subcommand, Debug)]
pub enum CheckpointAction {
    /// Per-location progress and failure counts
    Status,
    /// Processed position ranges of one location
    Ranges {
        /// Source location (file path or table URL)
        location: String,
    },
    /// Remove this DAG's records older than N days
    Cleanup {
        /// Age in days (default: [checkpoint].cleanup_days)
        #[arg(long)]
        days: Option<i64>,
    },
}

pub fn run(args: CheckpointArgs, config: &Config) -> Result<()> {
    match args.action {
        CheckpointAction::Status => status(config),
        CheckpointAction::Ranges { location } => ranges(config, &location),
        CheckpointAction::Cleanup { days } => {
            cleanup(config, days.unwrap_or(config.checkpoint.cleanup_days))
        }
    }
}

fn fmt_time(t: Option<DateTime<Utc>>) -> String {
    t.map_or("-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn status(config: &Config) -> Result<()> {
    let store = super::open_store(config)?;
    let status = store.status()?;

    eprintln!("DAG {} (last run: {})", status.dag_name, fmt_time(status.last_run));
    if status.locations.is_empty() {
        eprintln!("No checkpointed locations.");
        return Ok(());
    }

    let mut table = super::table(&[
        "Location",
        "Blobs",
        "Rows",
        "Pending retry",
        "Failed",
        "Reports",
        "Last retry",
    ]);
    for loc in &status.locations {
        let pending = if loc.pending_retriable > 0 {
            Cell::new(fmt_num(loc.pending_retriable)).fg(Color::Yellow)
        } else {
            Cell::new("0").fg(Color::DarkGrey)
        };
        let failed = if loc.permanent_failures > 0 {
            Cell::new(fmt_num(loc.permanent_failures)).fg(Color::Red)
        } else {
            Cell::new("0").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(&loc.location),
            Cell::new(fmt_num(loc.blobs)),
            Cell::new(fmt_num(loc.rows as usize)),
            pending,
            failed,
            Cell::new(loc.reports),
            Cell::new(fmt_time(loc.last_retry)),
        ]);
    }

    eprintln!("\n{table}");
    eprintln!("{} locations total", status.locations.len());
    Ok(())
}

fn ranges(config: &Config, location: &str) -> Result<()> {
    let store = super::open_store(config)?;
    let ranges = store.processed_ranges(location)?;
    if ranges.is_empty() {
        eprintln!("No processed ranges for {location}.");
        return Ok(());
    }

    let merged = merge_ranges(&ranges);
    let mut table = super::table(&["Start", "End", "Length"]);
    for r in &merged {
        table.add_row(vec![
            Cell::new(r.position),
            Cell::new(r.end()),
            Cell::new(r.length),
        ]);
    }

    eprintln!("\n{table}");
    eprintln!(
        "{} BLOB records merged into {} ranges",
        ranges.len(),
        merged.len()
    );
    Ok(())
}

fn cleanup(config: &Config, days: i64) -> Result<()> {
    let mut store = super::open_store(config)?;
    let removed = store.cleanup(days)?;
    if removed == 0 {
        eprintln!("Nothing to clean up.");
    } else {
        eprintln!(
            "Removed {} records older than {days} days from {}",
            fmt_num(removed),
            config.checkpoint.path.display()
        );
    }
    Ok(())
}
