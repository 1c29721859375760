pub mod checkpoint;
pub mod run;

use std::time::Duration;

use anyhow::Result;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use courier_checkpoint::CheckpointStore;
use courier_connectors::SourceSettings;

use crate::config::Config;

pub(crate) fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            header
                .iter()
                .map(|h| Cell::new(h).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    table
}

/// Open the configured checkpoint log for the configured DAG.
pub(crate) fn open_store(config: &Config) -> Result<CheckpointStore> {
    let store = CheckpointStore::open_jsonl(&config.checkpoint.path, &config.pipeline.dag_name)?
        .with_append_retries(
            config.checkpoint.append_retries,
            Duration::from_millis(config.checkpoint.append_backoff_ms),
        );
    Ok(store)
}

fn describe_source(source: &SourceSettings) -> String {
    match source {
        SourceSettings::File {
            path: Some(path), ..
        } => format!("file {}", path.display()),
        SourceSettings::File {
            pattern: Some(pattern),
            ..
        } => format!("files {pattern}"),
        SourceSettings::File { .. } => "file (no path)".to_string(),
        SourceSettings::Http { url, .. } => format!("http {url}"),
    }
}

pub fn show_config(config: &Config) {
    let p = &config.pipeline;
    let mut table = table(&["Setting", "Value"]);

    table.add_row(vec!["DAG name", &p.dag_name]);
    table.add_row(vec![
        "Checkpoint log",
        &config.checkpoint.path.display().to_string(),
    ]);
    table.add_row(vec!["Page size", &p.page_size.to_string()]);
    table.add_row(vec![
        "Retries",
        &format!("{} attempts, {}ms base delay", p.max_attempts, p.base_delay_ms),
    ]);
    table.add_row(vec!["Fan-out width", &p.fan_out_width.to_string()]);
    table.add_row(vec!["HTTP timeout", &format!("{}s", p.http_timeout_secs)]);
    table.add_row(vec![
        "Record reports",
        if p.record_reports { "yes" } else { "no" },
    ]);
    table.add_row(vec![
        "Source",
        &config
            .source
            .as_ref()
            .map_or("not set".to_string(), describe_source),
    ]);
    match &config.sink {
        Some(sink) => {
            let limits = sink.limits();
            table.add_row(vec!["Destination", sink.destination.name()]);
            table.add_row(vec!["Endpoint", &sink.endpoint]);
            table.add_row(vec![
                "Token",
                if sink.token.is_some() {
                    "configured"
                } else {
                    "not set"
                },
            ]);
            table.add_row(vec![
                "Batch limits",
                &format!(
                    "{} items, {} B/item, {} B/batch",
                    limits.max_count,
                    limits
                        .max_bytes_per_item
                        .map_or("-".to_string(), |n| n.to_string()),
                    limits
                        .max_bytes_per_batch
                        .map_or("-".to_string(), |n| n.to_string()),
                ),
            ]);
        }
        None => {
            table.add_row(vec!["Destination", "not set"]);
        }
    }

    eprintln!("\n{table}");
}
