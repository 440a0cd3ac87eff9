use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::{json, Value};
use tempfile::TempDir;

use basemerge_core::{base, Row, TableName, TableStore};

fn basemerge_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("basemerge"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

fn init_sample(home: &Path) -> PathBuf {
    basemerge_cmd(home)
        .args(["init", "--sample-data"])
        .assert()
        .success();
    home.join(".basemerge").join("base.json")
}

fn sync_all(home: &Path) {
    basemerge_cmd(home).args(["sync", "--all"]).assert().success();
}

fn status_json(home: &Path) -> Value {
    let assert = basemerge_cmd(home)
        .args(["status", "--json"])
        .assert()
        .success();
    serde_json::from_slice(&assert.get_output().stdout).expect("status JSON")
}

fn states(status: &Value) -> Vec<(String, String)> {
    status["targets"]
        .as_array()
        .expect("targets array")
        .iter()
        .map(|t| {
            (
                t["mapping_table"].as_str().unwrap_or_default().to_string(),
                t["signal"]["state"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

fn add_mapping_row(base_file: &Path, mapping: &str, row: Value) {
    let mut store = base::load(base_file).expect("load base");
    let row = Row::from_json(row).expect("row");
    store
        .create_records(&TableName::from(mapping), &[row])
        .expect("create record");
    base::save(base_file, &store).expect("save base");
}

#[test]
fn status_json_tracks_freshness_through_a_sync() {
    let home = TempDir::new().expect("home");
    let base_file = init_sample(home.path());

    let before = status_json(home.path());
    assert_eq!(before["summary"], json!({ "targets": 2, "needs_sync": 2 }));
    assert_eq!(
        states(&before),
        vec![
            ("Team A Mapping".to_string(), "never_synced".to_string()),
            ("Team B Mapping".to_string(), "never_synced".to_string()),
        ]
    );
    assert_eq!(before["targets"][0]["last_sync_age"], json!("never"));

    sync_all(home.path());
    let after = status_json(home.path());
    assert_eq!(after["summary"]["needs_sync"], json!(0));
    assert!(states(&after).iter().all(|(_, s)| s == "current"));
    assert_eq!(after["targets"][0]["rows"], json!(2));

    add_mapping_row(
        &base_file,
        "Team A Mapping",
        json!({"Concept Name": "Court Classic", "Team A Owner": "Kim"}),
    );
    let pending = status_json(home.path());
    let team_a = &pending["targets"][0];
    assert_eq!(team_a["signal"], json!({"state": "pending", "inserts": 1, "deletes": 0}));
    assert_eq!(pending["targets"][1]["signal"]["state"], json!("current"));
}

#[test]
fn status_table_lists_targets() {
    let home = TempDir::new().expect("home");
    init_sample(home.path());
    basemerge_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("Team A Mapping Merged Table"))
        .stdout(contains("NEVER SYNCED"))
        .stdout(contains("basemerge sync --all"));
}

#[test]
fn diff_of_unsynced_target_is_all_additions() {
    let home = TempDir::new().expect("home");
    init_sample(home.path());

    let assert = basemerge_cmd(home.path())
        .args(["diff", "Team B Mapping"])
        .assert()
        .success()
        .stdout(contains("does not exist yet"));
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");

    assert!(stdout.contains("+++ b/Team B Mapping Merged Table"));
    assert!(
        stdout
            .lines()
            .any(|line| line.starts_with('+') && line.contains("Prototype X")),
        "expected an added row for the unmatched mapping entry"
    );
    assert!(stdout.contains("# 2 insert(s), 0 delete(s)"));
}

#[test]
fn diff_shows_upstream_edit_only() {
    let home = TempDir::new().expect("home");
    let base_file = init_sample(home.path());
    sync_all(home.path());

    basemerge_cmd(home.path())
        .args(["diff", "Team A Mapping"])
        .assert()
        .success()
        .stdout(contains("No differences"));

    add_mapping_row(
        &base_file,
        "Team A Mapping",
        json!({"Concept Name": "Court Classic", "Team A Owner": "Kim"}),
    );

    let assert = basemerge_cmd(home.path())
        .args(["diff", "Team A Mapping"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    let changed: Vec<&str> = stdout
        .lines()
        .filter(|l| {
            (l.starts_with('+') || l.starts_with('-'))
                && !l.starts_with("+++")
                && !l.starts_with("---")
        })
        .collect();
    assert_eq!(changed.len(), 1, "only the new row should differ: {stdout}");
    assert!(changed[0].starts_with('+') && changed[0].contains("Kim"));
}
