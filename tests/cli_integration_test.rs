//! Integration tests for the sql-uploader binary
//!
//! Every test runs the real binary against temporary files and, where a
//! target is needed, a DuckDB database file.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const DUMP: &str = "-- test dump\n\
CREATE TABLE items (id INTEGER, name VARCHAR);\n\
INSERT INTO items VALUES (1, 'a;b');\n\
INSERT INTO items VALUES (2, 'c');\n\
INSERT INTO items VALUES (3, 'd');\n";

fn sql_uploader_bin(dir: &Path) -> Command {
    let config = dir.join("config.yaml");
    if !config.exists() {
        std::fs::write(&config, "policy: schema-first\n").unwrap();
    }
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sql-uploader"));
    cmd.current_dir(dir)
        .env("SQL_UPLOADER_CONFIG", &config)
        .env_remove("DATABASE_URL")
        .env_remove("MYSQL_URL")
        .env_remove("DB_HOST")
        .env_remove("DB_NAME")
        .env_remove("RUST_LOG");
    cmd
}

fn write_dump(dir: &Path) -> PathBuf {
    let path = dir.join("dump.sql");
    std::fs::write(&path, DUMP).unwrap();
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// =============================================================================
// plan
// =============================================================================

#[test]
fn test_plan_json() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path());

    let output = sql_uploader_bin(dir.path())
        .args(["plan", dump.to_str().unwrap(), "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", stderr(&output));

    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["statements"], 4);
    // Under the small-file threshold: one chunk.
    assert_eq!(json["policy"], "single");
    assert_eq!(json["chunks"].as_array().unwrap().len(), 1);
    assert_eq!(json["discarded_tail"], 0);
}

#[test]
fn test_plan_with_forced_policy_and_kept_chunks() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path());
    let chunks = dir.path().join("chunks");

    let output = sql_uploader_bin(dir.path())
        .args([
            "plan",
            dump.to_str().unwrap(),
            "--small-file-threshold",
            "0",
            "--keep-chunks",
            chunks.to_str().unwrap(),
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", stderr(&output));

    let text = stdout(&output);
    assert!(text.contains("schema-first"));
    assert!(text.contains("2 chunk(s)"));
    assert!(chunks.join("chunk_001.sql").exists());
    assert!(chunks.join("chunk_002.sql").exists());
}

#[test]
fn test_plan_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let output = sql_uploader_bin(dir.path())
        .args(["plan", "does-not-exist.sql"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("input file not found"));
}

// =============================================================================
// upload
// =============================================================================

#[test]
fn test_upload_into_duckdb_file() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path());
    let url = format!("duckdb://{}", dir.path().join("target.duckdb").display());

    let output = sql_uploader_bin(dir.path())
        .args([
            "upload",
            dump.to_str().unwrap(),
            "--url",
            &url,
            "-d",
            "shop",
            "--chunk-delay",
            "0",
            "--retry-delay",
            "0",
            "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", stderr(&output));

    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["chunks_total"], 1);
    assert_eq!(json["chunks_uploaded"], 1);
    assert_eq!(json["statements_executed"], 4);
    assert_eq!(json["statement_errors"], 0);
    assert_eq!(json["cancelled"], false);
}

#[test]
fn test_upload_missing_file_fails_before_connecting() {
    let dir = TempDir::new().unwrap();
    let output = sql_uploader_bin(dir.path())
        .args([
            "upload",
            "missing.sql",
            "--url",
            "mysql://root@127.0.0.1:9/shop",
        ])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("input file not found"), "{}", err);
    assert!(!err.contains("cannot reach target"));
}

#[test]
fn test_upload_without_connection_fails() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path());
    let output = sql_uploader_bin(dir.path())
        .args(["upload", dump.to_str().unwrap()])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(stderr(&output).contains("no target connection configured"));
}

#[test]
fn test_upload_refuses_system_schema() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path());
    let output = sql_uploader_bin(dir.path())
        .args([
            "upload",
            dump.to_str().unwrap(),
            "--url",
            "duckdb://:memory:",
            "-d",
            "information_schema",
        ])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("system schema"));
}

// =============================================================================
// check / completions / config
// =============================================================================

#[test]
fn test_check_duckdb() {
    let dir = TempDir::new().unwrap();
    let output = sql_uploader_bin(dir.path())
        .args(["check", "--url", "duckdb://:memory:", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", stderr(&output));

    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["reachable"], true);
    assert_eq!(json["target"], "duckdb://:memory:");
}

#[test]
fn test_completions() {
    let dir = TempDir::new().unwrap();
    let output = sql_uploader_bin(dir.path())
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("sql-uploader"));
}

#[test]
fn test_bad_config_file_is_reported() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.yaml"), "chunk_size: 5\n").unwrap();
    let dump = write_dump(dir.path());

    let output = sql_uploader_bin(dir.path())
        .args(["plan", dump.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("invalid config file"));
}
