//! Run-scoped chunk files.
//!
//! Planned chunks are written to disk as soon as they close so a huge dump
//! never has to live in memory. By default the files sit in a temporary
//! directory that disappears with the spool, on every exit path. A kept
//! spool writes into a caller-chosen directory and leaves the files behind,
//! one re-runnable `.sql` file per chunk.

use crate::parser::{Statement, Tokenizer, SMALL_BUFFER_SIZE};
use crate::planner::Chunk;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const WRITER_BUFFER_SIZE: usize = 256 * 1024;

enum SpoolDir {
    Temporary(TempDir),
    Kept(PathBuf),
}

impl SpoolDir {
    fn path(&self) -> &Path {
        match self {
            SpoolDir::Temporary(dir) => dir.path(),
            SpoolDir::Kept(path) => path,
        }
    }
}

/// A chunk that lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpooledChunk {
    pub number: usize,
    pub path: PathBuf,
    pub statements: usize,
    pub bytes: u64,
    pub ordinal_range: Option<(u64, u64)>,
    /// Dump ordinals as `(first, count)` runs. A data chunk is a single run;
    /// the schema chunk usually has one run per table.
    ordinal_runs: Vec<(u64, u64)>,
}

impl SpooledChunk {
    /// Reads the chunk's statements back, in order, with their dump
    /// ordinals restored.
    pub fn load(&self) -> std::io::Result<Vec<Statement>> {
        let file = File::open(&self.path)?;
        let loaded = Tokenizer::new(file, SMALL_BUFFER_SIZE).collect::<std::io::Result<Vec<_>>>()?;
        if loaded.len() != self.statements {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "{} holds {} statement(s), expected {}",
                    self.path.display(),
                    loaded.len(),
                    self.statements
                ),
            ));
        }

        let ordinals = self
            .ordinal_runs
            .iter()
            .flat_map(|&(first, count)| first..first + count);
        Ok(loaded
            .into_iter()
            .zip(ordinals)
            .map(|(stmt, ordinal)| Statement::new(ordinal, stmt.into_text()))
            .collect())
    }
}

fn ordinal_runs(chunk: &Chunk) -> Vec<(u64, u64)> {
    let mut runs: Vec<(u64, u64)> = Vec::new();
    for ordinal in chunk.statements().iter().map(Statement::ordinal) {
        match runs.last_mut() {
            Some((first, count)) if *first + *count == ordinal => *count += 1,
            _ => runs.push((ordinal, 1)),
        }
    }
    runs
}

pub struct ChunkSpool {
    dir: SpoolDir,
    chunks: Vec<SpooledChunk>,
}

impl ChunkSpool {
    /// Spool inside a fresh temporary directory.
    pub fn temporary() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("sql_chunks_").tempdir()?;
        Ok(Self {
            dir: SpoolDir::Temporary(dir),
            chunks: Vec::new(),
        })
    }

    /// Spool into `dir`, which is created if needed and kept afterwards.
    pub fn kept(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: SpoolDir::Kept(dir),
            chunks: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self.dir, SpoolDir::Temporary(_))
    }

    pub fn store(&mut self, chunk: &Chunk) -> std::io::Result<&SpooledChunk> {
        let path = self.dir.path().join(chunk_file_name(chunk.number()));
        let file = File::create(&path)?;
        let mut writer = BufWriter::with_capacity(WRITER_BUFFER_SIZE, file);

        write_header(&mut writer, chunk)?;
        for stmt in chunk.statements() {
            write_statement(&mut writer, stmt.text())?;
        }
        writer.flush()?;

        let spooled = SpooledChunk {
            number: chunk.number(),
            path,
            statements: chunk.len(),
            bytes: chunk.bytes(),
            ordinal_range: chunk.ordinal_range(),
            ordinal_runs: ordinal_runs(chunk),
        };
        let pos = self
            .chunks
            .partition_point(|c| c.number < spooled.number);
        self.chunks.insert(pos, spooled);
        Ok(&self.chunks[pos])
    }

    /// Stored chunks in chunk-number order.
    pub fn chunks(&self) -> &[SpooledChunk] {
        &self.chunks
    }

    pub fn total_statements(&self) -> usize {
        self.chunks.iter().map(|c| c.statements).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.bytes).sum()
    }

    /// Removes a temporary spool now rather than at drop, surfacing errors.
    pub fn close(self) -> std::io::Result<()> {
        match self.dir {
            SpoolDir::Temporary(dir) => dir.close(),
            SpoolDir::Kept(_) => Ok(()),
        }
    }
}

pub fn chunk_file_name(number: usize) -> String {
    format!("chunk_{:03}.sql", number)
}

fn write_header<W: Write>(writer: &mut W, chunk: &Chunk) -> std::io::Result<()> {
    match chunk.ordinal_range() {
        Some((first, last)) => writeln!(
            writer,
            "-- chunk {}: {} statements, dump statements {}-{}",
            chunk.number(),
            chunk.len(),
            first,
            last
        ),
        None => writeln!(writer, "-- chunk {}: empty", chunk.number()),
    }
}

/// Writes one statement followed by its terminator. A trailing backslash
/// would escape an adjacent `;`, so such statements end on their own line.
fn write_statement<W: Write>(writer: &mut W, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes())?;
    if text.ends_with('\\') {
        writer.write_all(b"\n;\n")
    } else {
        writer.write_all(b";\n")
    }
}
