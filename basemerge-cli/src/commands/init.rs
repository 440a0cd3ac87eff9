//! `basemerge init [--base <path>] [--sample-data]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use basemerge_core::{base, config, Base};

/// Write the default configuration and create the base file if missing.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Base file location (default: ~/.basemerge/base.json).
    #[arg(long, value_name = "PATH")]
    pub base: Option<PathBuf>,

    /// Seed a new base with a source table and two team mapping tables.
    #[arg(long)]
    pub sample_data: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;

        let base_path = match self.base {
            Some(path) if path.is_relative() => Some(
                std::env::current_dir()
                    .context("cannot resolve current directory")?
                    .join(path),
            ),
            other => other,
        };

        let cfg = config::init_at(&home, base_path).context("failed to write configuration")?;
        println!(
            "✓ Configuration at {}",
            config::config_path_at(&home).display()
        );

        let path = cfg.base_path_at(&home);
        if path.exists() {
            println!("  Base file already present: {}", path.display());
            return Ok(());
        }

        let (store, label) = if self.sample_data {
            (base::sample(), "sample")
        } else {
            (Base::new(), "empty")
        };
        base::save(&path, &store)
            .with_context(|| format!("failed to write base file '{}'", path.display()))?;
        println!("  Created {label} base: {}", path.display());
        println!(
            "  {} target(s): {}",
            cfg.targets.len(),
            cfg.targets
                .iter()
                .map(|t| t.mapping_table.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }
}
