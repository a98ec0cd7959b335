//! Scripted target used by the integration tests.
//!
//! The scripted server keeps uncommitted statements per session and only
//! moves them to `committed` on COMMIT, so tests can assert what a real
//! transactional target would have kept.

#![allow(dead_code)]

use sql_uploader::cancel::CancelToken;
use sql_uploader::parser::Statement;
use sql_uploader::planner::Chunk;
use sql_uploader::target::{Connector, DbError, DbResult, Session, TargetDialect};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Execute(String),
    Commit,
    Rollback,
}

struct Rule {
    pattern: String,
    error: DbError,
    remaining: usize,
}

#[derive(Default)]
struct Server {
    calls: Vec<Call>,
    committed: Vec<String>,
    rules: Vec<Rule>,
    commit_failures: usize,
    connect_failures: usize,
    cancel_on: Option<(String, CancelToken)>,
    schemas: Vec<String>,
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    server: Rc<RefCell<Server>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements containing `pattern` fail with `error` the next `times` times.
    pub fn fail_on(&self, pattern: &str, error: DbError, times: usize) -> &Self {
        self.server.borrow_mut().rules.push(Rule {
            pattern: pattern.to_string(),
            error,
            remaining: times,
        });
        self
    }

    pub fn fail_commits(&self, times: usize) -> &Self {
        self.server.borrow_mut().commit_failures = times;
        self
    }

    pub fn fail_connects(&self, times: usize) -> &Self {
        self.server.borrow_mut().connect_failures = times;
        self
    }

    /// Cancels `token` right after a statement containing `pattern` runs.
    pub fn cancel_on(&self, pattern: &str, token: CancelToken) -> &Self {
        self.server.borrow_mut().cancel_on = Some((pattern.to_string(), token));
        self
    }

    pub fn with_schemas(&self, schemas: &[&str]) -> &Self {
        self.server.borrow_mut().schemas = schemas.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.server.borrow().calls.clone()
    }

    pub fn committed(&self) -> Vec<String> {
        self.server.borrow().committed.clone()
    }

    /// Committed statements that start with `prefix`.
    pub fn committed_like(&self, prefix: &str) -> Vec<String> {
        self.committed()
            .into_iter()
            .filter(|s| s.starts_with(prefix))
            .collect()
    }

    pub fn executed_like(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Execute(sql) if sql.starts_with(prefix) => Some(sql),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    fn dialect(&self) -> TargetDialect {
        TargetDialect::MySql
    }

    fn connect(&self) -> DbResult<ScriptedSession> {
        let mut server = self.server.borrow_mut();
        server.calls.push(Call::Connect);
        if server.connect_failures > 0 {
            server.connect_failures -= 1;
            return Err(DbError::connection("Can't connect to MySQL server"));
        }
        Ok(ScriptedSession {
            server: Rc::clone(&self.server),
            pending: Vec::new(),
        })
    }

    fn describe(&self) -> String {
        "scripted://test".to_string()
    }
}

pub struct ScriptedSession {
    server: Rc<RefCell<Server>>,
    pending: Vec<String>,
}

impl Session for ScriptedSession {
    fn execute(&mut self, sql: &str) -> DbResult<()> {
        let mut server = self.server.borrow_mut();
        server.calls.push(Call::Execute(sql.to_string()));

        if let Some(rule) = server
            .rules
            .iter_mut()
            .find(|r| r.remaining > 0 && sql.contains(&r.pattern))
        {
            rule.remaining -= 1;
            return Err(rule.error.clone());
        }

        if let Some(name) = sql.strip_prefix("CREATE DATABASE ") {
            server.schemas.push(name.trim_matches('`').to_string());
        } else if let Some(name) = sql.strip_prefix("DROP DATABASE IF EXISTS ") {
            let name = name.trim_matches('`').to_string();
            server.schemas.retain(|s| *s != name);
        }

        self.pending.push(sql.to_string());
        if let Some((pattern, token)) = &server.cancel_on {
            if sql.contains(pattern.as_str()) {
                token.cancel();
            }
        }
        Ok(())
    }

    fn query_column(&mut self, sql: &str) -> DbResult<Vec<String>> {
        let server = self.server.borrow();
        if sql.starts_with("SHOW DATABASES") {
            return Ok(server.schemas.clone());
        }
        if sql.contains("COUNT(*)") {
            return Ok(vec!["0".to_string()]);
        }
        Ok(vec!["1".to_string()])
    }

    fn commit(&mut self) -> DbResult<()> {
        let mut server = self.server.borrow_mut();
        server.calls.push(Call::Commit);
        if server.commit_failures > 0 {
            server.commit_failures -= 1;
            return Err(DbError::connection("Lost connection to MySQL server during query"));
        }
        server.committed.append(&mut self.pending);
        Ok(())
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.server.borrow_mut().calls.push(Call::Rollback);
        self.pending.clear();
        Ok(())
    }
}

/// Builds chunks from statement texts, numbering ordinals across chunks.
pub fn chunks(groups: &[&[&str]]) -> Vec<Chunk> {
    let mut ordinal = 0;
    groups
        .iter()
        .enumerate()
        .map(|(i, texts)| {
            let statements = texts
                .iter()
                .map(|t| {
                    ordinal += 1;
                    Statement::new(ordinal, *t)
                })
                .collect();
            Chunk::from_statements(i + 1, statements)
        })
        .collect()
}
