//! Target database abstraction.
//!
//! A [`Connector`] is the only way the loader reaches a database: every unit
//! of work asks it for a fresh [`Session`] and drops that session when done,
//! so relaxed session settings never outlive the chunk that set them.
//!
//! Two backends ship with the crate: MySQL over `sqlx` for remote targets and
//! an embedded DuckDB database for local targets and tests.

pub mod duckdb;
pub mod mysql;

pub use self::duckdb::{DuckDbConnector, DuckDbSession};
pub use self::mysql::{MySqlConnector, MySqlSession};

use once_cell::sync::Lazy;
use regex::Regex;

/// How a failed database call affects the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// The statement was rejected; the session is still usable.
    Statement,
    /// Storage or quota exhausted; retrying cannot help.
    Critical,
    /// The session is gone or never came up.
    Connection,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::Statement => write!(f, "statement"),
            FailureClass::Critical => write!(f, "critical"),
            FailureClass::Connection => write!(f, "connection"),
        }
    }
}

/// MySQL server error numbers that mean storage is exhausted.
const STORAGE_FULL_CODES: [u16; 3] = [
    1021, // ER_DISK_FULL
    1041, // ER_OUT_OF_RESOURCES
    1114, // ER_RECORD_FILE_FULL ("The table is full")
];

/// Server error numbers reported when the server drops the session.
const CONNECTION_LOST_CODES: [u16; 4] = [
    1053, // ER_SERVER_SHUTDOWN
    1927, // ER_CONNECTION_KILLED
    2006, // CR_SERVER_GONE_ERROR
    2013, // CR_SERVER_LOST
];

/// Messages that mean storage is exhausted. Anchored so quoted row data in
/// an unrelated error cannot match.
static STORAGE_FULL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^the table .* is full$|\bdisk full\b|no space left on device|disk quota exceeded",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DbError {
    pub class: FailureClass,
    pub code: Option<u16>,
    pub message: String,
}

impl DbError {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            code: None,
            message: message.into(),
        }
    }

    pub fn statement(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Statement, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Critical, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Connection, message)
    }

    /// Builds an error for a server-reported failure. A known error number
    /// decides the class on its own; the message is only consulted when the
    /// server sent no number.
    pub fn from_server(code: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        let class = match code {
            Some(c) if STORAGE_FULL_CODES.contains(&c) => FailureClass::Critical,
            Some(c) if CONNECTION_LOST_CODES.contains(&c) => FailureClass::Connection,
            Some(_) => FailureClass::Statement,
            None => classify_message(&message),
        };
        Self {
            class,
            code,
            message,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.class == FailureClass::Critical
    }

    pub fn is_connection(&self) -> bool {
        self.class == FailureClass::Connection
    }

    /// Message cut to `max` characters for logs and samples.
    pub fn short_message(&self, max: usize) -> String {
        truncate_chars(&self.message, max)
    }

    /// Operator guidance for well-known failure modes.
    pub fn hint(&self) -> Option<&'static str> {
        let msg = self.message.to_lowercase();
        if msg.contains("read-only") || msg.contains("read only") {
            Some("the service may be in read-only mode; check that it is fully running")
        } else if msg.contains("access denied") {
            Some("access denied; check the connection credentials")
        } else if self.class == FailureClass::Critical {
            Some("storage limit reached; the target plan may restrict database size")
        } else if self.class == FailureClass::Connection {
            Some("connection issue; the service may be restarting or asleep, consider retrying")
        } else if msg.contains("timeout") {
            Some("timeout; the target may need more time for large operations")
        } else {
            None
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Classifies a failure from its message alone.
pub fn classify_message(message: &str) -> FailureClass {
    if STORAGE_FULL_RE.is_match(message.trim()) {
        return FailureClass::Critical;
    }

    let msg = message.to_lowercase();

    let connection_lost = msg.contains("lost connection")
        || msg.contains("gone away")
        || msg.contains("connection refused")
        || msg.contains("connection reset")
        || msg.contains("broken pipe");
    if connection_lost {
        return FailureClass::Connection;
    }

    FailureClass::Statement
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// SQL vocabulary that differs between targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetDialect {
    MySql,
    DuckDb,
}

impl TargetDialect {
    /// Session settings applied before a chunk runs. Each is best-effort.
    pub fn relax_statements(&self) -> &'static [&'static str] {
        match self {
            TargetDialect::MySql => &[
                "SET SESSION sql_require_primary_key = 0",
                "SET SESSION autocommit = 0",
                "SET SESSION unique_checks = 0",
                "SET SESSION foreign_key_checks = 0",
                "SET SESSION sql_mode = 'NO_AUTO_VALUE_ON_ZERO'",
                "SET SESSION innodb_lock_wait_timeout = 120",
                "SET SESSION max_execution_time = 0",
            ],
            TargetDialect::DuckDb => &[],
        }
    }

    /// Settings restored after a chunk commits.
    pub fn restore_statements(&self) -> &'static [&'static str] {
        match self {
            TargetDialect::MySql => &[
                "SET SESSION foreign_key_checks = 1",
                "SET SESSION unique_checks = 1",
                "SET SESSION autocommit = 1",
            ],
            TargetDialect::DuckDb => &[],
        }
    }

    /// Schemas that belong to the server and are never dropped.
    pub fn system_schemas(&self) -> &'static [&'static str] {
        match self {
            TargetDialect::MySql => &[
                "information_schema",
                "mysql",
                "performance_schema",
                "sys",
                "mysql_innodb_cluster_metadata",
            ],
            TargetDialect::DuckDb => &["information_schema", "main", "pg_catalog", "temp"],
        }
    }

    pub fn is_system_schema(&self, name: &str) -> bool {
        self.system_schemas()
            .iter()
            .any(|s| s.eq_ignore_ascii_case(name))
    }

    pub fn ping_sql(&self) -> &'static str {
        "SELECT 1"
    }

    pub fn list_schemas_sql(&self) -> &'static str {
        match self {
            TargetDialect::MySql => "SHOW DATABASES",
            TargetDialect::DuckDb => {
                "SELECT DISTINCT schema_name FROM information_schema.schemata \
                 WHERE catalog_name = current_database()"
            }
        }
    }

    /// Returns one row holding the table count as text.
    pub fn table_count_sql(&self, schema: &str) -> String {
        let literal = quote_literal(schema);
        match self {
            TargetDialect::MySql => format!(
                "SELECT CAST(COUNT(*) AS CHAR) FROM information_schema.tables WHERE table_schema = {literal}"
            ),
            TargetDialect::DuckDb => format!(
                "SELECT CAST(COUNT(*) AS VARCHAR) FROM information_schema.tables \
                 WHERE table_schema = {literal} AND table_catalog = current_database()"
            ),
        }
    }

    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            TargetDialect::MySql => format!("`{}`", name.replace('`', "``")),
            TargetDialect::DuckDb => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    pub fn drop_schema_sql(&self, schema: &str) -> String {
        match self {
            TargetDialect::MySql => {
                format!("DROP DATABASE IF EXISTS {}", self.quote_ident(schema))
            }
            TargetDialect::DuckDb => {
                format!("DROP SCHEMA IF EXISTS {} CASCADE", self.quote_ident(schema))
            }
        }
    }

    pub fn create_schema_sql(&self, schema: &str) -> String {
        match self {
            TargetDialect::MySql => format!("CREATE DATABASE {}", self.quote_ident(schema)),
            TargetDialect::DuckDb => format!("CREATE SCHEMA {}", self.quote_ident(schema)),
        }
    }

    pub fn use_schema_sql(&self, schema: &str) -> String {
        match self {
            TargetDialect::MySql => format!("USE {}", self.quote_ident(schema)),
            TargetDialect::DuckDb => format!("SET schema = {}", quote_literal(schema)),
        }
    }
}

impl std::fmt::Display for TargetDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetDialect::MySql => write!(f, "mysql"),
            TargetDialect::DuckDb => write!(f, "duckdb"),
        }
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// One live connection. Dropping it releases the connection; uncommitted
/// work is discarded by the server.
pub trait Session {
    fn execute(&mut self, sql: &str) -> DbResult<()>;

    /// Runs a query and returns its first column as text.
    fn query_column(&mut self, sql: &str) -> DbResult<Vec<String>>;

    fn commit(&mut self) -> DbResult<()>;

    fn rollback(&mut self) -> DbResult<()>;
}

/// Factory for sessions against one target server.
pub trait Connector {
    type Session: Session;

    fn dialect(&self) -> TargetDialect;

    /// Opens a new session with no schema selected.
    fn connect(&self) -> DbResult<Self::Session>;

    /// Human-readable target description with credentials redacted.
    fn describe(&self) -> String;
}

/// Either backend, chosen at runtime from the connection descriptor.
pub enum AnyConnector {
    MySql(MySqlConnector),
    DuckDb(DuckDbConnector),
}

pub enum AnySession {
    MySql(MySqlSession),
    DuckDb(DuckDbSession),
}

impl Session for AnySession {
    fn execute(&mut self, sql: &str) -> DbResult<()> {
        match self {
            AnySession::MySql(s) => s.execute(sql),
            AnySession::DuckDb(s) => s.execute(sql),
        }
    }

    fn query_column(&mut self, sql: &str) -> DbResult<Vec<String>> {
        match self {
            AnySession::MySql(s) => s.query_column(sql),
            AnySession::DuckDb(s) => s.query_column(sql),
        }
    }

    fn commit(&mut self) -> DbResult<()> {
        match self {
            AnySession::MySql(s) => s.commit(),
            AnySession::DuckDb(s) => s.commit(),
        }
    }

    fn rollback(&mut self) -> DbResult<()> {
        match self {
            AnySession::MySql(s) => s.rollback(),
            AnySession::DuckDb(s) => s.rollback(),
        }
    }
}

impl Connector for AnyConnector {
    type Session = AnySession;

    fn dialect(&self) -> TargetDialect {
        match self {
            AnyConnector::MySql(c) => c.dialect(),
            AnyConnector::DuckDb(c) => c.dialect(),
        }
    }

    fn connect(&self) -> DbResult<AnySession> {
        match self {
            AnyConnector::MySql(c) => c.connect().map(AnySession::MySql),
            AnyConnector::DuckDb(c) => c.connect().map(AnySession::DuckDb),
        }
    }

    fn describe(&self) -> String {
        match self {
            AnyConnector::MySql(c) => c.describe(),
            AnyConnector::DuckDb(c) => c.describe(),
        }
    }
}

impl AnyConnector {
    pub fn open(
        backend: &crate::config::Backend,
        connect_timeout: std::time::Duration,
    ) -> DbResult<Self> {
        use crate::config::Backend;
        match backend {
            Backend::MySql(endpoint) => Ok(AnyConnector::MySql(MySqlConnector::new(
                endpoint.clone(),
                connect_timeout,
            ))),
            Backend::DuckDb(location) => {
                DuckDbConnector::open(location.clone()).map(AnyConnector::DuckDb)
            }
        }
    }
}
