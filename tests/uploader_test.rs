mod common;

use common::{chunks, Call, ScriptedConnector};
use sql_uploader::cancel::CancelToken;
use sql_uploader::error::LoadError;
use sql_uploader::target::DbError;
use sql_uploader::uploader::{ChunkState, UploadEvent, UploadOptions, Uploader};
use std::cell::RefCell;

fn options() -> UploadOptions {
    UploadOptions::new("shop").without_delays()
}

fn three_chunks() -> Vec<sql_uploader::planner::Chunk> {
    chunks(&[
        &["CREATE TABLE t (id INT)"],
        &["INSERT INTO t VALUES (2)"],
        &["INSERT INTO t VALUES (3)"],
    ])
}

#[test]
fn test_all_chunks_commit_in_order() {
    let target = ScriptedConnector::new();
    let summary = Uploader::new(&target, options()).run(&three_chunks());

    assert!(summary.is_success());
    assert_eq!(summary.chunks_uploaded, 3);
    assert_eq!(summary.statements_executed, 3);
    assert!(summary.retried.is_empty());
    assert_eq!(
        target.committed_like("INSERT"),
        vec!["INSERT INTO t VALUES (2)", "INSERT INTO t VALUES (3)"]
    );
    // One fresh session per chunk.
    assert_eq!(target.count(&Call::Connect), 3);
}

#[test]
fn test_every_session_relaxes_and_selects_schema() {
    let target = ScriptedConnector::new();
    Uploader::new(&target, options()).run(&three_chunks());

    assert_eq!(target.executed_like("USE `shop`").len(), 3);
    assert_eq!(
        target.executed_like("SET SESSION foreign_key_checks = 0").len(),
        3
    );
}

#[test]
fn test_retry_pass_recovers_failed_chunk() {
    let target = ScriptedConnector::new();
    target.fail_on(
        "VALUES (2)",
        DbError::connection("Lost connection to MySQL server during query"),
        1,
    );

    let summary = Uploader::new(&target, options()).run(&three_chunks());

    assert!(summary.is_success());
    assert_eq!(summary.retried, vec![2]);
    assert_eq!(summary.chunks[1].attempts, 2);
    assert_eq!(summary.chunks[1].state, ChunkState::Committed);
    // Chunk 3 is not held back by chunk 2; the retry happens after the main pass.
    assert_eq!(
        target.committed_like("INSERT"),
        vec!["INSERT INTO t VALUES (3)", "INSERT INTO t VALUES (2)"]
    );
}

#[test]
fn test_exhausted_retries_become_permanent() {
    let target = ScriptedConnector::new();
    target.fail_on("VALUES (2)", DbError::connection("gone away"), 10);

    let mut opts = options();
    opts.retry_passes = 2;
    let summary = Uploader::new(&target, opts).run(&three_chunks());

    assert!(!summary.is_success());
    assert_eq!(summary.failed, vec![2]);
    assert_eq!(summary.chunks[1].state, ChunkState::FailedPermanent);
    assert_eq!(summary.chunks[1].attempts, 3);
    assert_eq!(summary.chunks[2].state, ChunkState::Committed);
    assert!(matches!(
        summary.failure(),
        Some(LoadError::ChunksFailed(ref chunks)) if chunks == &vec![2]
    ));
}

#[test]
fn test_critical_failure_stops_everything() {
    let target = ScriptedConnector::new();
    target.fail_on(
        "VALUES (2)",
        DbError::from_server(Some(1114), "The table 't' is full"),
        1,
    );

    let summary = Uploader::new(&target, options()).run(&three_chunks());

    let critical = summary.critical.as_ref().unwrap();
    assert_eq!(critical.chunk, 2);
    assert!(critical.message.contains("is full"));
    assert_eq!(summary.chunks[1].state, ChunkState::Aborted);
    assert_eq!(summary.chunks[2].state, ChunkState::Pending);
    assert_eq!(summary.chunks[2].attempts, 0);
    assert!(target.executed_like("INSERT INTO t VALUES (3)").is_empty());
    assert!(target.count(&Call::Rollback) >= 1);
    assert!(matches!(
        summary.failure(),
        Some(LoadError::Critical { chunk: 2, .. })
    ));
}

#[test]
fn test_cancel_mid_chunk_rolls_back_open_work() {
    let target = ScriptedConnector::new();
    let cancel = CancelToken::new();
    target.cancel_on("VALUES (21)", cancel.clone());

    let plan = chunks(&[
        &["INSERT INTO t VALUES (1)"],
        &[
            "INSERT INTO t VALUES (21)",
            "INSERT INTO t VALUES (22)",
            "INSERT INTO t VALUES (23)",
        ],
    ]);
    let summary = Uploader::new(&target, options())
        .with_cancel(cancel)
        .run(&plan);

    assert!(summary.cancelled);
    assert_eq!(summary.chunks[1].state, ChunkState::Aborted);
    assert_eq!(target.committed_like("INSERT"), vec!["INSERT INTO t VALUES (1)"]);
    assert!(target.executed_like("INSERT INTO t VALUES (22)").is_empty());
    assert_eq!(target.count(&Call::Rollback), 1);

    let err = summary.failure().unwrap();
    assert!(matches!(
        err,
        LoadError::Cancelled {
            completed: 1,
            total: 2
        }
    ));
    assert_eq!(err.exit_code(), 130);
}

#[test]
fn test_failed_commit_rolls_back_then_retries() {
    let target = ScriptedConnector::new();
    target.fail_commits(1);

    let plan = chunks(&[&["INSERT INTO t VALUES (1)", "INSERT INTO t VALUES (2)"]]);
    let summary = Uploader::new(&target, options()).run(&plan);

    assert!(summary.is_success());
    assert_eq!(summary.retried, vec![1]);
    assert_eq!(target.count(&Call::Rollback), 1);
    // The rolled-back attempt left nothing behind.
    assert_eq!(
        target.committed_like("INSERT"),
        vec!["INSERT INTO t VALUES (1)", "INSERT INTO t VALUES (2)"]
    );
    assert_eq!(summary.chunks[0].executed, 2);
}

#[test]
fn test_connect_failure_is_retried() {
    let target = ScriptedConnector::new();
    target.fail_connects(1);

    let plan = chunks(&[&["INSERT INTO t VALUES (1)"]]);
    let summary = Uploader::new(&target, options()).run(&plan);

    assert!(summary.is_success());
    assert_eq!(summary.chunks[0].attempts, 2);
}

#[test]
fn test_statement_errors_are_counted_not_fatal() {
    let target = ScriptedConnector::new();
    target.fail_on("bad", DbError::statement("You have an error in your SQL syntax"), 10);

    let plan = chunks(&[&[
        "INSERT INTO t VALUES (1)",
        "INSERT INTO bad VALUES (2)",
        "INSERT INTO t VALUES (3)",
    ]]);
    let summary = Uploader::new(&target, options()).run(&plan);

    assert!(summary.is_success());
    let chunk = &summary.chunks[0];
    assert_eq!(chunk.state, ChunkState::Committed);
    assert_eq!(chunk.attempts, 1);
    assert_eq!(chunk.executed, 2);
    assert_eq!(chunk.errors, 1);
    assert_eq!(chunk.samples[0].ordinal, 2);
    assert_eq!(summary.statement_errors, 1);
}

#[test]
fn test_commits_every_k_statements() {
    let target = ScriptedConnector::new();
    let mut opts = options();
    opts.commit_every = 2;

    let plan = chunks(&[&[
        "INSERT INTO t VALUES (1)",
        "INSERT INTO t VALUES (2)",
        "INSERT INTO t VALUES (3)",
        "INSERT INTO t VALUES (4)",
        "INSERT INTO t VALUES (5)",
    ]]);
    Uploader::new(&target, opts).run(&plan);

    assert_eq!(target.count(&Call::Commit), 3);
}

#[test]
fn test_observer_sees_lifecycle() {
    let target = ScriptedConnector::new();
    target.fail_on("VALUES (2)", DbError::connection("gone away"), 1);
    let events = RefCell::new(Vec::new());

    Uploader::new(&target, options())
        .with_observer(|event| {
            let label = match event {
                UploadEvent::RunStarted { chunks } => format!("run {}", chunks),
                UploadEvent::ChunkStarted { number, attempt, .. } => {
                    format!("start {}#{}", number, attempt)
                }
                UploadEvent::ChunkFinished { number, state, .. } => {
                    format!("finish {} {:?}", number, state)
                }
                UploadEvent::RetryScheduled { pass, chunks, .. } => {
                    format!("retry {} {:?}", pass, chunks)
                }
                UploadEvent::Progress(_) | UploadEvent::Waiting { .. } => return,
            };
            events.borrow_mut().push(label);
        })
        .run(&three_chunks());

    assert_eq!(
        events.into_inner(),
        vec![
            "run 3",
            "start 1#1",
            "finish 1 Committed",
            "start 2#1",
            "finish 2 FailedRetryable",
            "start 3#1",
            "finish 3 Committed",
            "retry 1 [2]",
            "start 2#2",
            "finish 2 Committed",
        ]
    );
}
