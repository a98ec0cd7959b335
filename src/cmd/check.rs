use crate::config::LoaderConfig;
use crate::error::LoadError;
use crate::preflight::{check_connection, table_count};
use crate::target::{AnyConnector, Connector};
use serde::Serialize;
use std::time::Instant;

#[derive(Serialize)]
struct CheckReport {
    target: String,
    dialect: String,
    reachable: bool,
    latency_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tables: Option<u64>,
}

pub fn run(config: &LoaderConfig, json: bool) -> anyhow::Result<()> {
    let descriptor = config.connection()?;
    let connector = AnyConnector::open(&descriptor.backend, config.connect_timeout)
        .map_err(LoadError::Connect)?;

    let start = Instant::now();
    check_connection(&connector).map_err(LoadError::Connect)?;
    let latency = start.elapsed();

    // Table count is informational; a missing database is not a failure here.
    let database = config.database().ok().map(str::to_string);
    let tables = match &database {
        Some(db) => connector
            .connect()
            .ok()
            .and_then(|mut session| table_count(&mut session, connector.dialect(), db).ok()),
        None => None,
    };

    let report = CheckReport {
        target: connector.describe(),
        dialect: connector.dialect().to_string(),
        reachable: true,
        latency_ms: latency.as_millis(),
        database,
        tables,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("✓ Connected to {} ({})", report.target, report.dialect);
        println!("  Round trip: {:.3?}", latency);
        if let Some(db) = &report.database {
            match report.tables {
                Some(n) => println!("  Database {}: {} table(s)", db, n),
                None => println!("  Database {}: could not be inspected", db),
            }
        }
    }
    Ok(())
}
