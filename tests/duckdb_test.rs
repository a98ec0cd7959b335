//! End-to-end loads into an embedded DuckDB target.

use dump_gen::{DumpConfig, DumpGenerator, Flavor};
use sql_uploader::config::{ConfigLayer, LoaderConfig};
use sql_uploader::error::LoadError;
use sql_uploader::loader::Loader;
use sql_uploader::preflight::PreflightMode;
use sql_uploader::target::{Connector, DuckDbConnector, Session};
use std::path::Path;
use tempfile::TempDir;

fn config(budget: u64) -> LoaderConfig {
    let layer = ConfigLayer {
        database_url: Some("duckdb://:memory:".to_string()),
        database: Some("shop".to_string()),
        small_file_threshold_mb: Some(0),
        chunk_delay_secs: Some(0.0),
        retry_delay_secs: Some(0.0),
        commit_every: Some(3),
        ..Default::default()
    };
    let mut config = layer.resolve().unwrap();
    config.chunk_budget = budget;
    config
}

fn count(connector: &DuckDbConnector, sql: &str) -> u64 {
    let mut session = connector.connect().unwrap();
    session.query_column(sql).unwrap()[0].parse().unwrap()
}

fn write_dump(dir: &Path, name: &str, sql: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, sql).unwrap();
    path
}

#[test]
fn test_load_small_dump_in_chunks() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(
        dir.path(),
        "shop.sql",
        "-- shop dump\n\
         CREATE TABLE items (id INTEGER, name VARCHAR);\n\
         INSERT INTO items VALUES (1, 'semi;colon');\n\
         INSERT INTO items VALUES (2, 'it''s');\n\
         INSERT INTO items VALUES (3, 'x');\n",
    );
    let connector = DuckDbConnector::in_memory().unwrap();
    let config = config(64);

    let summary = Loader::new(&connector, &config).run(&dump).unwrap();

    assert!(summary.is_success());
    // Schema chunk plus one chunk per INSERT at a 64 byte budget.
    assert_eq!(summary.chunks_total, 4);
    assert_eq!(summary.statements_executed, 4);
    assert_eq!(
        count(&connector, "SELECT CAST(COUNT(*) AS VARCHAR) FROM shop.items"),
        3
    );
    let mut session = connector.connect().unwrap();
    let names = session
        .query_column("SELECT name FROM shop.items ORDER BY id")
        .unwrap();
    assert_eq!(names, vec!["semi;colon", "it's", "x"]);
}

#[test]
fn test_load_generated_dump() {
    let dir = TempDir::new().unwrap();
    let dump_config = DumpConfig {
        flavor: Flavor::Portable,
        tables: 3,
        rows_per_table: 50,
        batch_size: 10,
        tricky_ratio: 1.0,
        ..Default::default()
    };
    let (sql, stats) = DumpGenerator::new(dump_config).generate_to_string().unwrap();
    let dump = write_dump(dir.path(), "generated.sql", &sql);

    let connector = DuckDbConnector::in_memory().unwrap();
    let config = config(4096);
    let summary = Loader::new(&connector, &config).run(&dump).unwrap();

    assert!(summary.is_success(), "{:?}", summary.failure());
    assert_eq!(summary.statement_errors, 0);
    assert_eq!(summary.statements_executed as u64, stats.statements);
    for table in ["table_001", "table_002", "table_003"] {
        let sql = format!("SELECT CAST(COUNT(*) AS VARCHAR) FROM shop.{}", table);
        assert_eq!(count(&connector, &sql), 50);
    }
}

#[test]
fn test_reload_replaces_previous_contents() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(
        dir.path(),
        "t.sql",
        "CREATE TABLE t (id INTEGER);INSERT INTO t VALUES (1);INSERT INTO t VALUES (2);",
    );
    let connector = DuckDbConnector::in_memory().unwrap();
    let config = config(1024);

    Loader::new(&connector, &config).run(&dump).unwrap();
    let summary = Loader::new(&connector, &config).run(&dump).unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.statement_errors, 0);
    assert_eq!(
        count(&connector, "SELECT CAST(COUNT(*) AS VARCHAR) FROM shop.t"),
        2
    );
}

#[test]
fn test_duplicate_key_with_storage_words_is_a_statement_error() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(
        dir.path(),
        "dupes.sql",
        "CREATE TABLE t (name VARCHAR PRIMARY KEY);\n\
         INSERT INTO t VALUES ('full table');\n\
         INSERT INTO t VALUES ('full table');\n\
         INSERT INTO t VALUES ('no space left');\n",
    );
    let connector = DuckDbConnector::in_memory().unwrap();
    let config = config(1024);

    let summary = Loader::new(&connector, &config).run(&dump).unwrap();

    assert!(summary.critical.is_none());
    assert!(summary.is_success());
    assert_eq!(summary.statement_errors, 1);
    assert_eq!(
        count(&connector, "SELECT CAST(COUNT(*) AS VARCHAR) FROM shop.t"),
        2
    );
}

#[test]
fn test_statement_errors_do_not_stop_the_load() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(
        dir.path(),
        "bad.sql",
        "CREATE TABLE t (id INTEGER);\n\
         INSERT INTO t VALUES (1);\n\
         INSERT INTO missing VALUES (2);\n\
         INSERT INTO t VALUES (3);\n",
    );
    let connector = DuckDbConnector::in_memory().unwrap();
    let config = config(1024);

    let summary = Loader::new(&connector, &config).run(&dump).unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.statement_errors, 1);
    let sample = summary
        .chunks
        .iter()
        .flat_map(|c| c.samples.iter())
        .next()
        .unwrap();
    assert_eq!(sample.ordinal, 3);
    assert!(sample.message.chars().count() <= 103);
    assert_eq!(
        count(&connector, "SELECT CAST(COUNT(*) AS VARCHAR) FROM shop.t"),
        2
    );
}

#[test]
fn test_missing_dump_touches_nothing() {
    let connector = DuckDbConnector::in_memory().unwrap();
    let config = config(1024);

    let err = Loader::new(&connector, &config)
        .run(Path::new("/nonexistent/dump.sql"))
        .unwrap_err();

    assert!(matches!(err, LoadError::InputNotFound(_)));
    let schemas = connector
        .connect()
        .unwrap()
        .query_column(
            "SELECT schema_name FROM information_schema.schemata WHERE schema_name = 'shop'",
        )
        .unwrap();
    assert!(schemas.is_empty());
}

#[test]
fn test_skip_preflight_requires_existing_schema() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), "t.sql", "CREATE TABLE t (id INTEGER);");
    let connector = DuckDbConnector::in_memory().unwrap();
    let mut config = config(1024);
    config.preflight = PreflightMode::Skip;

    let err = Loader::new(&connector, &config).run(&dump).unwrap_err();
    assert!(matches!(err, LoadError::Preflight(_)));

    connector
        .connect()
        .unwrap()
        .execute("CREATE SCHEMA shop")
        .unwrap();
    let summary = Loader::new(&connector, &config).run(&dump).unwrap();
    assert!(summary.is_success());
}

#[test]
fn test_kept_chunks_written_to_directory() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(
        dir.path(),
        "t.sql",
        "CREATE TABLE t (id INTEGER);INSERT INTO t VALUES (1);INSERT INTO t VALUES (2);",
    );
    let connector = DuckDbConnector::in_memory().unwrap();
    let mut config = config(30);
    let chunk_dir = dir.path().join("chunks");
    config.keep_chunks = Some(chunk_dir.clone());

    Loader::new(&connector, &config).run(&dump).unwrap();

    let files = std::fs::read_dir(&chunk_dir).unwrap().count();
    assert_eq!(files, 3);
}
