//! CLI integration tests for datamigrate.
//!
//! These tests verify argument parsing, help output, exit codes and an
//! offline handle run against a corpus on disk.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Get a command for the datamigrate binary.
fn cmd() -> Command {
    Command::cargo_bin("datamigrate").unwrap()
}

fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("datamigrate.yaml");
    fs::write(&path, content).unwrap();
    path
}

fn write_corpus(root: &Path) {
    let app = root.join("demo");
    fs::create_dir_all(&app).unwrap();
    let payload = serde_json::json!({
        "model": "demo.Item",
        "exported_at": "2024-01-01T00:00:00.000000Z",
        "data": [
            {"id": 1, "name": "a", "bk_biz_id": 2},
            {"id": 2, "name": "b", "bk_biz_id": 3}
        ],
        "stats": {"total": 2}
    });
    fs::write(app.join("Item.json"), payload.to_string()).unwrap();
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("handle"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("set-auto-increment"));
}

#[test]
fn test_global_flag_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("[default: datamigrate.yaml]"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_export_subcommand_help() {
    cmd()
        .args(["export", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--model"))
        .stdout(predicate::str::contains("--out"))
        .stdout(predicate::str::contains("--skip-empty-file"))
        .stdout(predicate::str::contains("--write-empty-file"))
        .stdout(predicate::str::contains("--enable-handle"));
}

#[test]
fn test_handle_subcommand_help() {
    cmd()
        .args(["handle", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--split-by-biz"))
        .stdout(predicate::str::contains("--exclude-biz-ids"))
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn test_import_subcommand_help() {
    cmd()
        .args(["import", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--conflict"))
        .stdout(predicate::str::contains("[default: update]"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("datamigrate"));
}

// =============================================================================
// Argument Errors
// =============================================================================

#[test]
fn test_invalid_conflict_strategy_rejected() {
    cmd()
        .args(["import", "--input", "corpus", "--conflict", "merge"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_skip_and_write_empty_conflict() {
    cmd()
        .args([
            "export",
            "--out",
            "corpus",
            "--skip-empty-file",
            "--write-empty-file",
        ])
        .assert()
        .failure();
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_2() {
    cmd()
        .args([
            "--config",
            "nonexistent_config_file.yaml",
            "handle",
            "--input",
            "in",
            "--out",
            "out",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "handle",
            "--input",
            "in",
            "--out",
            "out",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("YAML error"));
}

#[test]
fn test_zero_batch_size_exits_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "import:\n  batch_size: 0\n");

    cmd()
        .args(["--config", config.to_str().unwrap(), "import", "--input", "in"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("import.batch_size"));
}

#[test]
fn test_export_without_manifest_exits_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "export:\n  batch_size: 10\n");

    cmd()
        .args(["--config", config.to_str().unwrap(), "export", "--out", "out"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("schema_manifest is required"));
}

// =============================================================================
// Handle Runs (no database needed)
// =============================================================================

#[test]
fn test_handle_copies_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "handle:\n  batch_size: 1\n");
    let input = dir.path().join("in");
    let out = dir.path().join("out");
    write_corpus(&input);

    cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "handle",
            "--input",
            input.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Handle completed!"))
        .stdout(predicate::str::contains("Rows: 2 -> 2"));

    assert!(out.join("demo").join("Item.json").exists());
    assert!(out.join("handle_report.md").exists());
}

#[test]
fn test_handle_excludes_biz_ids_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "handle:\n  batch_size: 100\n");
    let input = dir.path().join("in");
    let out = dir.path().join("out.zip");
    write_corpus(&input);

    cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "--output-json",
            "handle",
            "--input",
            input.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
            "--exclude-biz-ids",
            "3,99",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"rows_in\": 2"))
        .stdout(predicate::str::contains("\"rows_out\": 1"));

    assert!(out.is_file());
}

#[test]
fn test_handle_accepts_negative_biz_ids() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "handle:\n  batch_size: 100\n");
    let input = dir.path().join("in");
    let out = dir.path().join("out");
    write_corpus(&input);

    cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "--output-json",
            "handle",
            "--input",
            input.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
            "--exclude-biz-ids",
            "-7,3",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"rows_out\": 1"));
}

#[test]
fn test_handle_dry_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "handle:\n  batch_size: 100\n");
    let input = dir.path().join("in");
    let out = dir.path().join("out");
    write_corpus(&input);

    cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "handle",
            "--input",
            input.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run completed!"));

    assert!(!out.exists());
}
