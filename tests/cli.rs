#![cfg(feature = "sqlite")]

use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn bgawb_bin() -> String {
    env!("CARGO_BIN_EXE_bgawb").to_string()
}

/// A minimal game project whose test databases live in `server`.
fn project(server: &Path, test_db_extra: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("version.php"),
        "<?php\n$game_version_hearts = '1';\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("dbmodel.sql"),
        "CREATE TABLE card (card_id INTEGER PRIMARY KEY, card_type TEXT);\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("bgaproject.yml"),
        format!(
            "testDb:\n  driver: sqlite\n  host: '{}'\n  user: root\n  pass: hunter2\n{}",
            server.display(),
            test_db_extra
        ),
    )
    .unwrap();
    dir
}

#[test]
fn test_config_prints_masked_json() {
    let server = TempDir::new().unwrap();
    let dir = project(server.path(), "  name: t1\n");
    let output = Command::new(bgawb_bin())
        .args(["--project-dir", dir.path().to_str().unwrap(), "config"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["name"], "t1");
    assert_eq!(json["driver"], "sqlite");
    assert_eq!(json["pass"], "*******");
    assert!(!stdout.contains("hunter2"));
}

#[test]
fn test_env_var_fallback_for_project_dir() {
    let server = TempDir::new().unwrap();
    let dir = project(server.path(), "  name: t_env\n");
    let output = Command::new(bgawb_bin())
        .arg("config")
        .env("BGAWB_PROJECT_DIR", dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("t_env"));
}

#[test]
fn test_create_truncate_drop_roundtrip() {
    let server = TempDir::new().unwrap();
    let dir = project(server.path(), "  namePrefix: cli_\n");
    let project_dir = dir.path().to_str().unwrap();

    let output = Command::new(bgawb_bin())
        .args(["--project-dir", project_dir, "create"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "create failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    assert!(name.starts_with("cli_"));
    let file = server.path().join(format!("{}.sqlite3", name));
    assert!(file.is_file());

    let output = Command::new(bgawb_bin())
        .args(["--project-dir", project_dir, "truncate", "--name", &name])
        .output()
        .unwrap();
    assert!(output.status.success());

    let output = Command::new(bgawb_bin())
        .args(["--project-dir", project_dir, "drop", "--name", &name])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(!file.exists());
}

#[test]
fn test_drop_unknown_database_fails_with_json_log() {
    let server = TempDir::new().unwrap();
    let dir = project(server.path(), "");
    let output = Command::new(bgawb_bin())
        .args([
            "--project-dir",
            dir.path().to_str().unwrap(),
            "drop",
            "--name",
            "never_created",
        ])
        .env("BGAWB_JSON", "true")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("\"msg\""), "expected JSON output, got: {}", stderr);
    assert!(stderr.contains("never_created"));
}

#[test]
fn test_missing_config_fails() {
    let dir = TempDir::new().unwrap();
    let output = Command::new(bgawb_bin())
        .args(["--project-dir", dir.path().to_str().unwrap(), "config"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bgaproject.yml") || stderr.contains("project config"));
}

#[test]
fn test_truncate_requires_name() {
    let output = Command::new(bgawb_bin()).args(["truncate"]).output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--name"));
}
