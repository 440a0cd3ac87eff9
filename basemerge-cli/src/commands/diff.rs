//! `basemerge diff <mapping-table>` — show what a sync would change.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use basemerge_sync::diff_target;

/// Arguments for `basemerge diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Mapping table of the target to diff.
    pub target: String,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;

        let diff = diff_target(&home, &self.target)
            .with_context(|| format!("diff failed for '{}'", self.target))?;

        if diff.is_empty() {
            println!("No differences for '{}'.", diff.merged_table);
            return Ok(());
        }

        if !diff.provisioned {
            println!("# '{}' does not exist yet; sync will create it", diff.merged_table);
        }
        print!("{}", diff.unified_diff);
        if !diff.unified_diff.ends_with('\n') {
            println!();
        }
        println!("# {} insert(s), {} delete(s)", diff.inserts, diff.deletes);

        Ok(())
    }
}
