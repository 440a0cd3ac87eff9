//! Per-target sync state.
//!
//! Persists a `SyncState` JSON document at
//! `<home>/.basemerge/state/<key>.json`, where the key is the mapping table
//! name encoded by [`state_key`]. Writes use the same atomic `.tmp` + rename pattern as the
//! config and base files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use basemerge_core::config;

use crate::error::{io_err, SyncError};

/// What the last real (non dry-run) sync of a target did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    pub synced_at: DateTime<Utc>,
    pub merged_table: String,
    #[serde(default)]
    pub inserted: usize,
    #[serde(default)]
    pub deleted: usize,
    /// Destination row count after the sync.
    #[serde(default)]
    pub rows: usize,
    #[serde(default)]
    pub issues: usize,
}

/// File stem for a target.
///
/// ASCII letters, digits and `-` are kept, a space becomes `_`, and every
/// other byte is written as `%XX`. Distinct names give distinct keys.
pub fn state_key(mapping_table: &str) -> String {
    let mut key = String::with_capacity(mapping_table.len());
    for byte in mapping_table.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' => key.push(char::from(byte)),
            b' ' => key.push('_'),
            other => key.push_str(&format!("%{other:02X}")),
        }
    }
    key
}

/// `~/.basemerge/state/<key>.json`
pub fn state_path_at(home: &Path, mapping_table: &str) -> PathBuf {
    config::root_at(home)
        .join("state")
        .join(format!("{}.json", state_key(mapping_table)))
}

/// Load the state for a target. `None` if it has never been synced.
pub fn load_at(home: &Path, mapping_table: &str) -> Result<Option<SyncState>, SyncError> {
    let path = state_path_at(home, mapping_table);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Save the state for a target atomically.
pub fn save_at(home: &Path, mapping_table: &str, state: &SyncState) -> Result<(), SyncError> {
    let path = state_path_at(home, mapping_table);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid state path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}
