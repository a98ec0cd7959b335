//! Chunk planning: grouping statements into byte-bounded units of work.
//!
//! The default policy isolates every schema statement in chunk #1 so that
//! later chunks, each executed in its own session, always find the tables
//! they write to. Chunks only ever close on statement boundaries.

use crate::parser::Statement;
use serde::{Deserialize, Serialize};

pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// How statements are grouped into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkPolicy {
    /// All schema statements in chunk #1, everything else packed after it.
    #[default]
    SchemaFirst,
    /// Budget-bounded windows in dump order.
    ByteWindow,
    /// The whole dump as one chunk.
    Single,
}

impl std::str::FromStr for ChunkPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "schema-first" | "schema_first" => Ok(ChunkPolicy::SchemaFirst),
            "byte-window" | "byte_window" => Ok(ChunkPolicy::ByteWindow),
            "single" => Ok(ChunkPolicy::Single),
            _ => Err(format!(
                "Unknown chunk policy: {}. Valid options: schema-first, byte-window, single",
                s
            )),
        }
    }
}

impl std::fmt::Display for ChunkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkPolicy::SchemaFirst => write!(f, "schema-first"),
            ChunkPolicy::ByteWindow => write!(f, "byte-window"),
            ChunkPolicy::Single => write!(f, "single"),
        }
    }
}

/// An ordered group of statements uploaded as one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    number: usize,
    statements: Vec<Statement>,
    bytes: u64,
}

impl Chunk {
    pub fn new(number: usize) -> Self {
        Self {
            number,
            statements: Vec::new(),
            bytes: 0,
        }
    }

    pub fn from_statements(number: usize, statements: Vec<Statement>) -> Self {
        let bytes = statements.iter().map(|s| s.encoded_len() as u64).sum();
        Self {
            number,
            statements,
            bytes,
        }
    }

    fn push(&mut self, stmt: Statement) {
        self.bytes += stmt.encoded_len() as u64;
        self.statements.push(stmt);
    }

    /// 1-based position in upload order.
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<Statement> {
        self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Cumulative encoded size of the statements.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// First and last dump ordinal covered, if any.
    pub fn ordinal_range(&self) -> Option<(u64, u64)> {
        let first = self.statements.first()?.ordinal();
        let last = self.statements.last()?.ordinal();
        Some((first, last))
    }
}

/// Incremental planner. Statements go in through [`ChunkPlanner::push`];
/// chunks come out as soon as they close, so a caller can spool them without
/// holding the whole dump in memory.
pub struct ChunkPlanner {
    policy: ChunkPolicy,
    budget: u64,
    schema: Option<Chunk>,
    current: Chunk,
}

impl ChunkPlanner {
    /// `budget` is in bytes; a zero budget is treated as one byte, so every
    /// data statement gets its own chunk.
    pub fn new(policy: ChunkPolicy, budget: u64) -> Self {
        let (schema, first_number) = match policy {
            ChunkPolicy::SchemaFirst => (Some(Chunk::new(1)), 2),
            ChunkPolicy::ByteWindow | ChunkPolicy::Single => (None, 1),
        };
        Self {
            policy,
            budget: budget.max(1),
            schema,
            current: Chunk::new(first_number),
        }
    }

    pub fn with_budget_mb(policy: ChunkPolicy, megabytes: u64) -> Self {
        Self::new(policy, megabytes.saturating_mul(BYTES_PER_MB))
    }

    pub fn policy(&self) -> ChunkPolicy {
        self.policy
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Adds a statement. Returns the chunk it closed, if any.
    pub fn push(&mut self, stmt: Statement) -> Option<Chunk> {
        if let Some(schema) = self.schema.as_mut() {
            if stmt.kind().is_schema() {
                schema.push(stmt);
                return None;
            }
        }

        if self.policy == ChunkPolicy::Single {
            self.current.push(stmt);
            return None;
        }

        let size = stmt.encoded_len() as u64;
        let closed = if !self.current.is_empty() && self.current.bytes + size > self.budget {
            let next = Chunk::new(self.current.number + 1);
            Some(std::mem::replace(&mut self.current, next))
        } else {
            None
        };
        self.current.push(stmt);
        closed
    }

    /// Closes the planner. The schema chunk (when the policy has one) is
    /// always returned, even if empty; an empty trailing chunk is not, unless
    /// it is the only chunk.
    pub fn finish(self) -> Vec<Chunk> {
        let mut chunks = Vec::with_capacity(2);
        if let Some(schema) = self.schema {
            chunks.push(schema);
        }
        if !self.current.is_empty() || chunks.is_empty() {
            chunks.push(self.current);
        }
        chunks
    }

    /// Plans a whole statement sequence at once, ordered by chunk number.
    pub fn plan<I>(policy: ChunkPolicy, budget: u64, statements: I) -> Vec<Chunk>
    where
        I: IntoIterator<Item = Statement>,
    {
        let mut planner = Self::new(policy, budget);
        let mut chunks: Vec<Chunk> = statements
            .into_iter()
            .filter_map(|stmt| planner.push(stmt))
            .collect();
        chunks.extend(planner.finish());
        chunks.sort_by_key(Chunk::number);
        chunks
    }
}

/// Picks the policy for a dump: small dumps skip chunking entirely.
pub fn policy_for_size(
    configured: ChunkPolicy,
    dump_size: u64,
    small_file_threshold: u64,
) -> ChunkPolicy {
    if dump_size <= small_file_threshold {
        ChunkPolicy::Single
    } else {
        configured
    }
}
