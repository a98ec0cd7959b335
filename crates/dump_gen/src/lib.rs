//! Deterministic SQL dump generator for sql-uploader tests and benchmarks.
//!
//! Produces mysqldump-style files whose string values deliberately contain
//! statement terminators, quotes, comment markers and newlines, so the
//! tokenizer gets exercised on realistic input.
//!
//! # Example
//!
//! ```rust
//! use dump_gen::{DumpConfig, DumpGenerator, Flavor};
//!
//! let config = DumpConfig {
//!     flavor: Flavor::Portable,
//!     tables: 2,
//!     rows_per_table: 10,
//!     ..Default::default()
//! };
//! let (sql, stats) = DumpGenerator::new(config).generate_to_string().unwrap();
//! assert_eq!(stats.rows, 20);
//! assert!(sql.contains("CREATE TABLE"));
//! ```

pub mod fake;
pub mod generator;

pub use fake::FakeData;
pub use generator::{DumpConfig, DumpGenerator, DumpStats, Flavor};
