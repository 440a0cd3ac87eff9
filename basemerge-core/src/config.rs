//! YAML configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.basemerge/
//!   config.yaml   (mode 0600, created by `init`)
//! ```
//!
//! # API pattern
//!
//! Every filesystem function has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::TableName;

pub const CONFIG_VERSION: u32 = 1;
pub const DEFAULT_SOURCE_TABLE: &str = "Source Data";
pub const DEFAULT_JOIN_KEY: &str = "Concept Name";
pub const DEFAULT_TARGETS: [&str; 2] = ["Team A Mapping", "Team B Mapping"];
pub const MERGED_TABLE_SUFFIX: &str = " Merged Table";

// ---------------------------------------------------------------------------
// 1. Model
// ---------------------------------------------------------------------------

/// One mapping table synchronized against the source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub mapping_table: TableName,
    /// Destination table; defaults to `<mapping_table> Merged Table`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_table: Option<TableName>,
}

impl TargetConfig {
    pub fn new(mapping_table: impl Into<TableName>) -> Self {
        Self {
            mapping_table: mapping_table.into(),
            merged_table: None,
        }
    }

    pub fn merged_table_name(&self) -> TableName {
        self.merged_table.clone().unwrap_or_else(|| {
            TableName(format!("{}{}", self.mapping_table.0, MERGED_TABLE_SUFFIX))
        })
    }
}

/// Token-bucket limits applied before each write batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_capacity: default_burst_capacity(),
            enabled: true,
        }
    }
}

/// Backoff applied when the store reports throttling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Single attempt, no waiting.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between scheduled syncs of every target.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Also sync when the base file changes on disk.
    #[serde(default = "default_true")]
    pub watch_base: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            watch_base: true,
        }
    }
}

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub version: u32,
    /// Base file; relative paths resolve against `~/.basemerge/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<PathBuf>,
    #[serde(default = "default_source_table")]
    pub source_table: TableName,
    #[serde(default = "default_join_key")]
    pub join_key: String,
    #[serde(default = "default_targets")]
    pub targets: Vec<TargetConfig>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            base_path: None,
            source_table: default_source_table(),
            join_key: default_join_key(),
            targets: default_targets(),
            batch_size: default_batch_size(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Resolve the base file location against `home`.
    pub fn base_path_at(&self, home: &Path) -> PathBuf {
        match &self.base_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root_at(home).join(path),
            None => root_at(home).join("base.json"),
        }
    }

    /// Find a target by mapping table name.
    pub fn target(&self, mapping_table: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.mapping_table.0 == mapping_table)
    }

    /// Reject configurations the pipeline cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.join_key.trim().is_empty() {
            return Err(ConfigError::Invalid("join_key must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.rate_limit.enabled
            && (self.rate_limit.requests_per_second == 0 || self.rate_limit.burst_capacity == 0)
        {
            return Err(ConfigError::Invalid(
                "rate_limit needs non-zero requests_per_second and burst_capacity".into(),
            ));
        }
        let mut mappings = BTreeSet::new();
        for target in &self.targets {
            if target.mapping_table == self.source_table {
                return Err(ConfigError::Invalid(format!(
                    "target '{}' is the source table",
                    target.mapping_table
                )));
            }
            if !mappings.insert(&target.mapping_table) {
                return Err(ConfigError::Invalid(format!(
                    "mapping table '{}' is configured more than once",
                    target.mapping_table
                )));
            }
        }
        // A merged table is written to and pruned, so it must never be an
        // input table.
        let mut merged = BTreeSet::new();
        for target in &self.targets {
            let name = target.merged_table_name();
            if name == self.source_table || mappings.contains(&name) {
                return Err(ConfigError::Invalid(format!(
                    "merged table '{}' of target '{}' is an input table",
                    name, target.mapping_table
                )));
            }
            if !merged.insert(target.merged_table_name()) {
                return Err(ConfigError::Invalid(format!(
                    "merged table '{}' is used by more than one target",
                    target.merged_table_name()
                )));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_requests_per_second() -> u32 {
    5
}
fn default_burst_capacity() -> u32 {
    5
}
fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_interval_secs() -> u64 {
    60
}
fn default_batch_size() -> usize {
    50
}
fn default_source_table() -> TableName {
    TableName::from(DEFAULT_SOURCE_TABLE)
}
fn default_join_key() -> String {
    DEFAULT_JOIN_KEY.to_string()
}
fn default_targets() -> Vec<TargetConfig> {
    DEFAULT_TARGETS.iter().map(|name| TargetConfig::new(*name)).collect()
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.basemerge/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".basemerge")
}

/// `<home>/.basemerge/config.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load and validate `<home>/.basemerge/config.yaml`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: SyncConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncConfig, ConfigError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 4. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the config.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &SyncConfig) -> Result<(), ConfigError> {
    let root = root_at(home);
    if !root.exists() {
        std::fs::create_dir_all(&root)?;
        set_dir_permissions(&root)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &SyncConfig) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// 5. Init
// ---------------------------------------------------------------------------

/// Write the default config, optionally pointing at `base_path`.
///
/// Idempotent: if the file already exists, loads and returns it unchanged.
pub fn init_at(home: &Path, base_path: Option<PathBuf>) -> Result<SyncConfig, ConfigError> {
    if config_path_at(home).exists() {
        return load_at(home);
    }
    let config = SyncConfig {
        base_path,
        ..SyncConfig::default()
    };
    save_at(home, &config)?;
    Ok(config)
}

/// `init_at` convenience wrapper.
pub fn init(base_path: Option<PathBuf>) -> Result<SyncConfig, ConfigError> {
    init_at(&home()?, base_path)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// The current user's home directory.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
