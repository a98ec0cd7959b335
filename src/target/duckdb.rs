//! Embedded DuckDB target.
//!
//! Sessions are cloned from one base connection, so they all see the same
//! database even when it lives in memory. DuckDB aborts a whole transaction
//! on the first failed statement, which would turn every skipped statement
//! into a lost chunk, so sessions run in autocommit mode and commit and
//! rollback are no-ops.

use super::{Connector, DbError, DbResult, Session, TargetDialect};
use duckdb::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuckDbLocation {
    Memory,
    File(PathBuf),
}

impl DuckDbLocation {
    pub fn file(path: impl AsRef<Path>) -> Self {
        DuckDbLocation::File(path.as_ref().to_path_buf())
    }
}

impl std::fmt::Display for DuckDbLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DuckDbLocation::Memory => write!(f, "duckdb://:memory:"),
            DuckDbLocation::File(path) => write!(f, "duckdb://{}", path.display()),
        }
    }
}

pub struct DuckDbConnector {
    location: DuckDbLocation,
    base: Mutex<Connection>,
}

impl DuckDbConnector {
    pub fn open(location: DuckDbLocation) -> DbResult<Self> {
        let conn = match &location {
            DuckDbLocation::Memory => Connection::open_in_memory(),
            DuckDbLocation::File(path) => Connection::open(path),
        }
        .map_err(|e| DbError::connection(format!("failed to open {}: {}", location, e)))?;

        Ok(Self {
            location,
            base: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> DbResult<Self> {
        Self::open(DuckDbLocation::Memory)
    }

    pub fn location(&self) -> &DuckDbLocation {
        &self.location
    }
}

impl Connector for DuckDbConnector {
    type Session = DuckDbSession;

    fn dialect(&self) -> TargetDialect {
        TargetDialect::DuckDb
    }

    fn connect(&self) -> DbResult<DuckDbSession> {
        let base = self
            .base
            .lock()
            .map_err(|_| DbError::connection("database handle poisoned"))?;
        let conn = base.try_clone().map_err(|e| DbError::connection(e.to_string()))?;
        Ok(DuckDbSession { conn })
    }

    fn describe(&self) -> String {
        self.location.to_string()
    }
}

pub struct DuckDbSession {
    conn: Connection,
}

impl Session for DuckDbSession {
    fn execute(&mut self, sql: &str) -> DbResult<()> {
        self.conn.execute_batch(sql).map_err(classify)
    }

    fn query_column(&mut self, sql: &str) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(sql).map_err(classify)?;
        let mut rows = stmt.query([]).map_err(classify)?;

        let mut values = Vec::new();
        while let Some(row) = rows.next().map_err(classify)? {
            let value: Option<String> = row.get(0).map_err(classify)?;
            values.push(value.unwrap_or_default());
        }
        Ok(values)
    }

    fn commit(&mut self) -> DbResult<()> {
        Ok(())
    }

    fn rollback(&mut self) -> DbResult<()> {
        Ok(())
    }
}

/// DuckDB error kinds that only ever concern the statement itself.
const STATEMENT_ERROR_KINDS: [&str; 7] = [
    "Constraint Error",
    "Parser Error",
    "Catalog Error",
    "Binder Error",
    "Conversion Error",
    "Invalid Input Error",
    "Not implemented Error",
];

fn classify(err: duckdb::Error) -> DbError {
    let message = err.to_string();
    if STATEMENT_ERROR_KINDS.iter().any(|kind| message.starts_with(kind)) {
        return DbError::statement(message);
    }
    DbError::from_server(None, message)
}
