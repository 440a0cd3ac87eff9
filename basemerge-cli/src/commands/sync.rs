//! `basemerge sync` — join, classify and write the difference.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use basemerge_sync::{
    pipeline::{self, ProvisionLedger, SyncScope},
    ProvisionOutcome, RunReport, TargetReport,
};

/// Arguments for `basemerge sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Mapping table of the target to sync (omit when using `--all`).
    pub target: Option<String>,

    /// Sync every configured target.
    #[arg(long, conflicts_with = "target")]
    pub all: bool,

    /// Show what would be written without touching the base.
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;

        let scope = match (self.all, self.target) {
            (true, _) => SyncScope::All,
            (false, Some(name)) => SyncScope::Target(name),
            (false, None) => bail!("provide a mapping table name or use --all"),
        };
        let label = match &scope {
            SyncScope::All => "sync --all".to_string(),
            SyncScope::Target(name) => format!("sync of '{name}'"),
        };

        let report = pipeline::run(&home, scope, self.dry_run, &mut ProvisionLedger::new())
            .with_context(|| format!("{label} failed"))?;
        print_report(&report);

        if !report.failures.is_empty() {
            bail!("{} target(s) failed", report.failures.len());
        }
        Ok(())
    }
}

fn print_report(report: &RunReport) {
    if report.targets.is_empty() && report.failures.is_empty() {
        println!("No targets configured. Run `basemerge init` first.");
        return;
    }
    for target in &report.targets {
        print_target(target);
    }
    for failure in &report.failures {
        println!(
            "{} '{}' — {}",
            "✗".red().bold(),
            failure.mapping_table,
            failure.error
        );
    }
}

fn print_target(r: &TargetReport) {
    let prefix = if r.dry_run { "[dry-run] " } else { "" };

    if r.is_noop() && r.issues.is_empty() {
        println!(
            "{prefix}{} '{}' — nothing to do ({} unchanged)",
            "✓".green(),
            r.merged_table,
            r.unchanged
        );
        return;
    }

    let mark = if r.issues.is_empty() {
        "✓".green()
    } else {
        "!".yellow()
    };
    let (inserted, deleted) = if r.dry_run {
        (r.inserted.would_write, r.deleted.would_write)
    } else {
        (r.inserted.written, r.deleted.written)
    };
    println!(
        "{prefix}{mark} '{}' ← '{}' (+{inserted} / -{deleted}, {} unchanged)",
        r.merged_table, r.mapping_table, r.unchanged
    );

    match r.provision {
        ProvisionOutcome::Created => println!("  +  created table '{}'", r.merged_table),
        ProvisionOutcome::WouldCreate => {
            println!("  ~  would create table '{}'", r.merged_table)
        }
        _ => {}
    }
    let skipped = r.inserted.skipped + r.deleted.skipped;
    if skipped > 0 {
        println!("  ·  {skipped} row(s) skipped");
    }
    for issue in &r.issues {
        println!("  {} {}", "!".yellow(), issue);
    }
}
