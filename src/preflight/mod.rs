//! Pre-flight: bring the target to a known-empty state before chunk #1.

use crate::error::LoadError;
use crate::target::{Connector, DbError, Session, TargetDialect};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// What pre-flight does to the target before uploading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreflightMode {
    /// Drop the target schema if present, then create it.
    #[default]
    Recreate,
    /// Drop every user schema on the server, then create the target.
    WipeAll,
    /// Leave the target untouched.
    Skip,
}

impl std::str::FromStr for PreflightMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "recreate" => Ok(PreflightMode::Recreate),
            "wipe-all" | "wipe_all" => Ok(PreflightMode::WipeAll),
            "skip" | "none" => Ok(PreflightMode::Skip),
            _ => Err(format!(
                "Unknown preflight mode: {}. Valid options: recreate, wipe-all, skip",
                s
            )),
        }
    }
}

impl std::fmt::Display for PreflightMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreflightMode::Recreate => write!(f, "recreate"),
            PreflightMode::WipeAll => write!(f, "wipe-all"),
            PreflightMode::Skip => write!(f, "skip"),
        }
    }
}

/// What pre-flight changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreflightReport {
    pub dropped: Vec<String>,
    pub created: bool,
}

/// Opens a session and pings the server.
pub fn check_connection<C: Connector>(connector: &C) -> Result<(), DbError> {
    let mut session = connector.connect()?;
    session.query_column(connector.dialect().ping_sql())?;
    debug!("connection check passed for {}", connector.describe());
    Ok(())
}

pub struct Preflight<'a, C: Connector> {
    connector: &'a C,
    schema: &'a str,
    mode: PreflightMode,
}

impl<'a, C: Connector> Preflight<'a, C> {
    pub fn new(connector: &'a C, schema: &'a str, mode: PreflightMode) -> Self {
        Self {
            connector,
            schema,
            mode,
        }
    }

    pub fn mode(&self) -> PreflightMode {
        self.mode
    }

    /// Applies the mode. Running it twice leaves the same state as once.
    pub fn prepare(&self) -> Result<PreflightReport, LoadError> {
        let dialect = self.connector.dialect();
        if self.schema.is_empty() {
            return Err(LoadError::Preflight("no target database name configured".into()));
        }
        if self.mode == PreflightMode::Skip {
            info!("Preflight skipped; target '{}' left as is", self.schema);
            return Ok(PreflightReport::default());
        }
        if dialect.is_system_schema(self.schema) {
            return Err(LoadError::ReservedTarget(self.schema.to_string()));
        }

        let mut session = self.connector.connect().map_err(preflight_error)?;
        let mut report = PreflightReport::default();

        let to_drop = match self.mode {
            PreflightMode::WipeAll => user_schemas(&mut session, dialect)?,
            _ => vec![self.schema.to_string()],
        };

        for schema in to_drop {
            info!("Dropping database '{}'", schema);
            session
                .execute(&dialect.drop_schema_sql(&schema))
                .map_err(preflight_error)?;
            report.dropped.push(schema);
        }

        info!("Creating database '{}'", self.schema);
        session
            .execute(&dialect.create_schema_sql(self.schema))
            .map_err(preflight_error)?;
        session.commit().map_err(preflight_error)?;
        report.created = true;

        Ok(report)
    }

    /// Confirms the target schema exists and, unless pre-flight was
    /// skipped, holds no tables.
    pub fn verify_ready(&self) -> Result<(), LoadError> {
        let dialect = self.connector.dialect();
        let mut session = self.connector.connect().map_err(preflight_error)?;

        let schemas = session
            .query_column(dialect.list_schemas_sql())
            .map_err(preflight_error)?;
        if !schemas.iter().any(|s| s.eq_ignore_ascii_case(self.schema)) {
            return Err(LoadError::Preflight(format!(
                "target database '{}' does not exist",
                self.schema
            )));
        }

        if self.mode == PreflightMode::Skip {
            return Ok(());
        }

        let tables = table_count(&mut session, dialect, self.schema)?;
        if tables > 0 {
            return Err(LoadError::Preflight(format!(
                "target database '{}' still holds {} table(s)",
                self.schema, tables
            )));
        }
        Ok(())
    }
}

fn user_schemas<S: Session>(
    session: &mut S,
    dialect: TargetDialect,
) -> Result<Vec<String>, LoadError> {
    let all = session
        .query_column(dialect.list_schemas_sql())
        .map_err(preflight_error)?;
    Ok(all
        .into_iter()
        .filter(|name| !dialect.is_system_schema(name))
        .collect())
}

pub fn table_count<S: Session>(
    session: &mut S,
    dialect: TargetDialect,
    schema: &str,
) -> Result<u64, LoadError> {
    let rows = session
        .query_column(&dialect.table_count_sql(schema))
        .map_err(preflight_error)?;
    rows.first()
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| LoadError::Preflight("could not read table count".into()))
}

fn preflight_error(err: DbError) -> LoadError {
    LoadError::Preflight(err.to_string())
}
