//! Integration tests for the tunecache binary
//!
//! Runs the compiled binary against a temporary cache directory.

use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Helper to run the CLI with given args against `cache_dir` and capture output
fn run_cli(cache_dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_tunecache"))
        .args(args)
        .env("TUNECACHE_DIR", cache_dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute tunecache")
}

#[test]
fn test_help_flag_exits_successfully() {
    let tmp = TempDir::new().unwrap();
    let output = run_cli(tmp.path(), &["--help"]);
    assert!(output.status.success(), "Expected --help to exit successfully");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("tunecache"), "Help should mention tunecache");
    assert!(stdout.contains("repair"), "Help should list the repair command");
}

#[test]
fn test_dir_creates_type_directory() {
    let tmp = TempDir::new().unwrap();
    let output = run_cli(tmp.path(), &["dir", "--cache-type", "benchmark"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.trim().ends_with("benchmark"), "{}", stdout);
    assert!(tmp.path().join("benchmark").is_dir());
}

#[test]
fn test_invalid_cache_type_prints_error_and_exits() {
    let tmp = TempDir::new().unwrap();
    let output = run_cli(tmp.path(), &["clear", "--cache-type", "results"]);

    assert!(!output.status.success(), "Expected invalid cache type to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown cache type"), "{}", stderr);
}

#[test]
fn test_validate_empty_store_as_json() {
    let tmp = TempDir::new().unwrap();
    let output = run_cli(tmp.path(), &["validate", "--json"]);

    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(report["total_entries"], 0);
    assert_eq!(report["health_score"], 100.0);
    assert_eq!(report["is_valid"], true);
}

#[test]
fn test_validate_fails_on_corrupt_entry_and_repair_fixes_it() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("optimization");
    fs::create_dir_all(&dir).unwrap();
    let corrupt = dir.join(format!("{}.json", "0".repeat(64)));
    fs::write(&corrupt, "{ truncated").unwrap();

    let output = run_cli(tmp.path(), &["validate"]);
    assert!(!output.status.success(), "Validation should fail on a corrupt entry");
    assert!(String::from_utf8_lossy(&output.stdout).contains("Invalid JSON"));

    let output = run_cli(tmp.path(), &["repair", "--dry-run"]);
    assert!(output.status.success());
    assert!(corrupt.exists(), "Dry run must not delete");

    let output = run_cli(tmp.path(), &["repair", "--json"]);
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["deleted"], 1);
    assert!(!corrupt.exists());
}

#[test]
fn test_clear_twice_is_safe() {
    let tmp = TempDir::new().unwrap();

    let first = run_cli(tmp.path(), &["clear"]);
    let second = run_cli(tmp.path(), &["clear"]);

    assert!(first.status.success());
    assert!(second.status.success());
    assert!(String::from_utf8_lossy(&second.stdout).contains("Cleared 0"));
}
