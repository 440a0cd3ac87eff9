//! `basemerge status` — per-target freshness of merged tables.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use basemerge_sync::freshness::{format_datetime_age, status_at};
use basemerge_sync::{FreshnessSignal, TargetStatus};

/// Arguments for `basemerge status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;

        let statuses =
            status_at(&home).context("failed to load status — run `basemerge init` first")?;
        if self.json {
            print_json(&statuses)?;
            return Ok(());
        }

        print_table(&statuses);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusReportJson<'a> {
    summary: StatusSummaryJson,
    targets: Vec<TargetStatusJson<'a>>,
}

#[derive(Serialize)]
struct StatusSummaryJson {
    targets: usize,
    needs_sync: usize,
}

#[derive(Serialize)]
struct TargetStatusJson<'a> {
    #[serde(flatten)]
    status: &'a TargetStatus,
    last_sync_age: String,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "target")]
    target: String,
    #[tabled(rename = "merged table")]
    merged_table: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "rows")]
    rows: String,
    #[tabled(rename = "last sync")]
    last_sync: String,
}

fn needs_sync(statuses: &[TargetStatus]) -> usize {
    statuses
        .iter()
        .filter(|s| s.signal != FreshnessSignal::Current)
        .count()
}

fn last_sync_age(status: &TargetStatus) -> String {
    status
        .last_synced
        .map(format_datetime_age)
        .unwrap_or_else(|| "never".to_string())
}

fn print_json(statuses: &[TargetStatus]) -> Result<()> {
    let payload = StatusReportJson {
        summary: StatusSummaryJson {
            targets: statuses.len(),
            needs_sync: needs_sync(statuses),
        },
        targets: statuses
            .iter()
            .map(|status| TargetStatusJson {
                status,
                last_sync_age: last_sync_age(status),
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(statuses: &[TargetStatus]) {
    let pending = needs_sync(statuses);
    println!(
        "basemerge v{} | {} targets | {} need sync",
        env!("CARGO_PKG_VERSION"),
        statuses.len(),
        pending,
    );

    if statuses.is_empty() {
        println!("No targets configured.");
        return;
    }

    let rows: Vec<StatusTableRow> = statuses
        .iter()
        .map(|s| StatusTableRow {
            target: s.mapping_table.to_string(),
            merged_table: s.merged_table.to_string(),
            status: colorize(&s.signal),
            rows: s.rows.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
            last_sync: last_sync_age(s),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if pending > 0 {
        println!("Run 'basemerge sync --all' to bring merged tables up to date.");
    }
}

fn colorize(signal: &FreshnessSignal) -> String {
    let label = signal.to_string();
    match signal {
        FreshnessSignal::NeverSynced => label.bright_black().bold().to_string(),
        FreshnessSignal::Unprovisioned => label.red().bold().to_string(),
        FreshnessSignal::Pending { .. } => label.yellow().bold().to_string(),
        FreshnessSignal::Current => label.green().bold().to_string(),
    }
}
