//! Config error-message, atomic-write-safety, and init integration tests.

use assert_fs::prelude::*;
use basemerge_core::{
    config::{self, SyncConfig, TargetConfig},
    ConfigError, TableName,
};
use predicates::prelude::predicate;
use std::fs;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_mentions_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config not found"));
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".basemerge/config.yaml")
        .write_binary(b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"), "must contain file path, got: {err}");
}

#[test]
fn load_invalid_values_returns_invalid() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".basemerge/config.yaml")
        .write_str("version: 1\njoin_key: \"  \"\n")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
}

#[test]
fn minimal_yaml_fills_in_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".basemerge/config.yaml")
        .write_str(
            "version: 1\n\
             targets:\n  - mapping_table: Team C Mapping\n    merged_table: Team C Out\n",
        )
        .expect("write");

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.source_table, TableName::from("Source Data"));
    assert_eq!(loaded.join_key, "Concept Name");
    assert_eq!(loaded.batch_size, 50);
    assert_eq!(
        loaded.targets,
        vec![TargetConfig {
            mapping_table: TableName::from("Team C Mapping"),
            merged_table: Some(TableName::from("Team C Out")),
        }]
    );
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_cleans_up_tmp_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &SyncConfig::default()).expect("save");

    home.child(".basemerge/config.yaml").assert(predicate::path::exists());
    home.child(".basemerge/config.yaml.tmp")
        .assert(predicate::path::missing());
}

#[test]
fn save_and_load_roundtrip() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut written = SyncConfig::default();
    written.targets.push(TargetConfig::new("Team C Mapping"));
    written.rate_limit.requests_per_second = 2;
    config::save_at(home.path(), &written).expect("save");

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded, written);
}

#[cfg(unix)]
#[test]
fn config_file_is_private() {
    use std::os::unix::fs::PermissionsExt;

    let home = assert_fs::TempDir::new().expect("tempdir");
    config::init_at(home.path(), None).expect("init");
    let mode = fs::metadata(config::config_path_at(home.path()))
        .expect("metadata")
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(mode, 0o600);
}

// ---------------------------------------------------------------------------
// 3. Init
// ---------------------------------------------------------------------------

#[test]
fn init_writes_default_yaml() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::init_at(home.path(), None).expect("init");

    let yaml = fs::read_to_string(config::config_path_at(home.path())).expect("read");
    assert!(yaml.contains("Source Data"));
    assert!(yaml.contains("Team A Mapping"));
    assert!(yaml.contains("Concept Name"));
}

// ---------------------------------------------------------------------------
// 4. Validation of table roles
// ---------------------------------------------------------------------------

fn with_team_a_merged_into(table: &str) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.targets[0].merged_table = Some(TableName::from(table));
    config
}

#[test]
fn merged_table_cannot_be_the_source_table() {
    let err = with_team_a_merged_into("Source Data").validate().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
    assert!(err.to_string().contains("Source Data"));
}

#[test]
fn merged_table_cannot_be_its_own_mapping_table() {
    let err = with_team_a_merged_into("Team A Mapping").validate().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
}

#[test]
fn merged_table_cannot_be_another_targets_mapping_table() {
    let err = with_team_a_merged_into("Team B Mapping").validate().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
    assert!(err.to_string().contains("Team B Mapping"));
}

#[test]
fn mapping_table_cannot_be_configured_twice() {
    let mut config = SyncConfig::default();
    config.targets.push(TargetConfig {
        mapping_table: TableName::from("Team A Mapping"),
        merged_table: Some(TableName::from("Team A Copy")),
    });
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("more than once"), "got: {err}");
}

#[test]
fn source_as_merged_table_is_rejected_on_load() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".basemerge/config.yaml")
        .write_str(
            "version: 1\n\
             targets:\n  - mapping_table: Team A Mapping\n    merged_table: Source Data\n",
        )
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
}
