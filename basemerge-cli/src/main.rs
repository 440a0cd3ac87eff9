//! basemerge — keep merged tables in sync with their source and mapping tables.
//!
//! # Usage
//!
//! ```text
//! basemerge init [--base <path>] [--sample-data]
//! basemerge sync <mapping-table> [--dry-run]
//! basemerge sync --all [--dry-run]
//! basemerge status [--json]
//! basemerge diff <mapping-table>
//! basemerge daemon start|stop|status|sync
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, diff::DiffArgs, init::InitArgs, status::StatusArgs, sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "basemerge",
    version,
    about = "Join source and mapping tables into merged tables, writing only the difference",
    long_about = None,
)]
struct Cli {
    /// Log pipeline progress to stderr (`RUST_LOG` refines the filter).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the default configuration and, optionally, a sample base.
    Init(InitArgs),

    /// Join, classify and write the difference into merged tables.
    Sync(SyncArgs),

    /// Show per-target freshness of merged tables.
    Status(StatusArgs),

    /// Show a unified diff of what sync would change for a target.
    Diff(DiffArgs),

    /// Run or control the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let daemon_start = matches!(
        cli.command,
        Commands::Daemon {
            command: DaemonCommand::Start(_)
        }
    );
    // `daemon start` installs its own subscriber.
    if cli.verbose && !daemon_start {
        basemerge_daemon::init_tracing(false);
    }

    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
