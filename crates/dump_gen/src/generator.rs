//! Streams a complete dump to any writer.

use crate::fake::FakeData;
use std::io::{self, Write};

/// Output flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// mysqldump look: backtick identifiers, backslash escapes, conditional
    /// comments and LOCK TABLES.
    MySql,
    /// Plain SQL that DuckDB (and MySQL) accept: unquoted identifiers,
    /// doubled quotes, no MySQL-only statements.
    Portable,
}

impl std::str::FromStr for Flavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" => Ok(Flavor::MySql),
            "portable" | "duckdb" => Ok(Flavor::Portable),
            _ => Err(format!("Unknown flavor: {}. Use mysql or portable", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub flavor: Flavor,
    pub seed: u64,
    pub tables: usize,
    pub rows_per_table: usize,
    /// Rows per INSERT statement.
    pub batch_size: usize,
    pub include_schema: bool,
    pub drop_tables: bool,
    /// Share of notes carrying a syntax-looking fragment.
    pub tricky_ratio: f64,
    /// Text appended after the last terminator.
    pub unterminated_tail: Option<String>,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            flavor: Flavor::MySql,
            seed: 12345,
            tables: 3,
            rows_per_table: 100,
            batch_size: 25,
            include_schema: true,
            drop_tables: true,
            tricky_ratio: 0.3,
            unterminated_tail: None,
        }
    }
}

/// What was written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpStats {
    /// Terminated statements, conditional comments included.
    pub statements: u64,
    pub rows: u64,
    pub bytes: u64,
}

pub struct DumpGenerator {
    config: DumpConfig,
    fake: FakeData,
    stats: DumpStats,
}

impl DumpGenerator {
    pub fn new(config: DumpConfig) -> Self {
        let fake = FakeData::new(config.seed);
        Self {
            config,
            fake,
            stats: DumpStats::default(),
        }
    }

    pub fn table_name(index: usize) -> String {
        format!("table_{:03}", index + 1)
    }

    pub fn generate<W: Write>(&mut self, out: W) -> io::Result<DumpStats> {
        let mut out = io::BufWriter::new(out);
        self.stats = DumpStats::default();

        self.write_header(&mut out)?;
        for index in 0..self.config.tables {
            let table = Self::table_name(index);
            if self.config.include_schema {
                self.write_schema(&mut out, &table)?;
            }
            self.write_rows(&mut out, &table, index)?;
        }
        self.write_footer(&mut out)?;

        if let Some(tail) = &self.config.unterminated_tail {
            let tail = tail.clone();
            self.raw(&mut out, &tail)?;
            self.raw(&mut out, "\n")?;
        }
        out.flush()?;
        Ok(self.stats)
    }

    pub fn generate_to_string(mut self) -> io::Result<(String, DumpStats)> {
        let mut buf = Vec::new();
        let stats = self.generate(&mut buf)?;
        let sql =
            String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok((sql, stats))
    }

    fn write_header<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.raw(out, "-- Generated by gen-dump\n")?;
        self.raw(out, &format!("-- seed: {}\n\n", self.config.seed))?;
        if self.config.flavor == Flavor::MySql {
            self.statement(out, "/*!40101 SET NAMES utf8mb4 */;")?;
            self.statement(
                out,
                "/*!40014 SET @OLD_FOREIGN_KEY_CHECKS=@@FOREIGN_KEY_CHECKS, FOREIGN_KEY_CHECKS=0 */;",
            )?;
            self.raw(out, "\n")?;
        }
        Ok(())
    }

    fn write_footer<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if self.config.flavor == Flavor::MySql {
            self.statement(out, "/*!40014 SET FOREIGN_KEY_CHECKS=@OLD_FOREIGN_KEY_CHECKS */;")?;
        }
        self.raw(out, "-- Dump completed\n")
    }

    fn write_schema<W: Write>(&mut self, out: &mut W, table: &str) -> io::Result<()> {
        let name = self.ident(table);
        self.raw(out, &format!("--\n-- Table structure for table {}\n--\n\n", name))?;
        if self.config.drop_tables {
            self.statement(out, &format!("DROP TABLE IF EXISTS {};", name))?;
        }
        let engine = match self.config.flavor {
            Flavor::MySql => " ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            Flavor::Portable => "",
        };
        let create = format!(
            "CREATE TABLE {} (\n  {} INT NOT NULL,\n  {} VARCHAR(100) NOT NULL,\n  {} VARCHAR(255),\n  {} TEXT,\n  {} DECIMAL(10,2),\n  {} DATE,\n  PRIMARY KEY ({})\n){};",
            name,
            self.ident("id"),
            self.ident("name"),
            self.ident("email"),
            self.ident("note"),
            self.ident("amount"),
            self.ident("created_at"),
            self.ident("id"),
            engine
        );
        self.statement(out, &create)?;
        self.raw(out, "\n")
    }

    fn write_rows<W: Write>(&mut self, out: &mut W, table: &str, index: usize) -> io::Result<()> {
        if self.config.rows_per_table == 0 {
            return Ok(());
        }
        let name = self.ident(table);
        let mysql = self.config.flavor == Flavor::MySql;
        if mysql {
            self.statement(out, &format!("LOCK TABLES {} WRITE;", name))?;
        }

        let batch = self.config.batch_size.max(1);
        let base = (index * self.config.rows_per_table) as u64;
        let mut row = 0;
        while row < self.config.rows_per_table {
            let end = (row + batch).min(self.config.rows_per_table);
            let values: Vec<String> = (row..end)
                .map(|r| self.row_values(base + r as u64 + 1))
                .collect();
            self.statement(
                out,
                &format!("INSERT INTO {} VALUES {};", name, values.join(",")),
            )?;
            self.stats.rows += (end - row) as u64;
            row = end;
        }

        if mysql {
            self.statement(out, "UNLOCK TABLES;")?;
        }
        self.raw(out, "\n")
    }

    fn row_values(&mut self, id: u64) -> String {
        let name = self.fake.name();
        let email = if self.fake.maybe_null(0.1) {
            "NULL".to_string()
        } else {
            let email = self.fake.email(id);
            self.quote(&email)
        };
        let note = self.fake.note(self.config.tricky_ratio);
        let cents = self.fake.amount_cents();
        let date = self.fake.date();
        format!(
            "({},{},{},{},{}.{:02},{})",
            id,
            self.quote(&name),
            email,
            self.quote(&note),
            cents / 100,
            cents % 100,
            self.quote(&date)
        )
    }

    fn ident(&self, name: &str) -> String {
        match self.config.flavor {
            Flavor::MySql => format!("`{}`", name),
            Flavor::Portable => name.to_string(),
        }
    }

    fn quote(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len() + 2);
        out.push('\'');
        for c in value.chars() {
            match (self.config.flavor, c) {
                (_, '\\') => out.push_str("\\\\"),
                (Flavor::MySql, '\'') => out.push_str("\\'"),
                (Flavor::Portable, '\'') => out.push_str("''"),
                (Flavor::MySql, '\n') => out.push_str("\\n"),
                (Flavor::MySql, '\t') => out.push_str("\\t"),
                _ => out.push(c),
            }
        }
        out.push('\'');
        out
    }

    fn statement<W: Write>(&mut self, out: &mut W, sql: &str) -> io::Result<()> {
        self.stats.statements += 1;
        self.raw(out, sql)?;
        self.raw(out, "\n")
    }

    fn raw<W: Write>(&mut self, out: &mut W, text: &str) -> io::Result<()> {
        self.stats.bytes += text.len() as u64;
        out.write_all(text.as_bytes())
    }
}
