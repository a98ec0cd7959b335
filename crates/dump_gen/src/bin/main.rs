//! CLI for generating SQL dumps.
//!
//! Usage:
//!   gen-dump --tables 10 --rows 125000 > large.sql
//!   gen-dump --flavor portable --rows 50 --tail "INSERT INTO t VALUES (1)" -o small.sql

use clap::Parser;
use dump_gen::{DumpConfig, DumpGenerator, Flavor};
use std::fs::File;
use std::io;

#[derive(Parser, Debug)]
#[command(name = "gen-dump")]
#[command(about = "Generate deterministic SQL dumps for sql-uploader", long_about = None)]
struct Args {
    /// Output flavor: mysql or portable
    #[arg(short, long, default_value = "mysql")]
    flavor: String,

    /// Random seed for reproducibility
    #[arg(long, default_value = "12345")]
    seed: u64,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<String>,

    /// Number of tables
    #[arg(long, default_value = "3")]
    tables: usize,

    /// Rows per table
    #[arg(long, default_value = "100")]
    rows: usize,

    /// Rows per INSERT statement
    #[arg(long, default_value = "25")]
    batch_size: usize,

    /// Skip CREATE TABLE statements
    #[arg(long)]
    data_only: bool,

    /// Share of text values carrying SQL-looking fragments (0.0 - 1.0)
    #[arg(long, default_value = "0.3")]
    tricky_ratio: f64,

    /// Unterminated text to append at the end of the dump
    #[arg(long)]
    tail: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let flavor: Flavor = args
        .flavor
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let config = DumpConfig {
        flavor,
        seed: args.seed,
        tables: args.tables,
        rows_per_table: args.rows,
        batch_size: args.batch_size,
        include_schema: !args.data_only,
        drop_tables: !args.data_only,
        tricky_ratio: args.tricky_ratio,
        unterminated_tail: args.tail.clone(),
    };

    let mut gen = DumpGenerator::new(config);

    if let Some(ref path) = args.output {
        let file = File::create(path)?;
        let stats = gen.generate(file)?;
        eprintln!(
            "Generated {} statements ({} rows, {} bytes) to {}",
            stats.statements, stats.rows, stats.bytes, path
        );
    } else {
        let stdout = io::stdout();
        gen.generate(stdout.lock())?;
    }

    Ok(())
}
