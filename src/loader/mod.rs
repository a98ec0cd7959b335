//! One complete load: dump in, populated database out.
//!
//! The order matters. Nothing touches the target until the input exists and
//! the server answers; the target is only wiped once the dump has been
//! planned and spooled successfully.

use crate::cancel::CancelToken;
use crate::config::LoaderConfig;
use crate::dump::Dump;
use crate::error::LoadError;
use crate::parser::Tokenizer;
use crate::planner::{policy_for_size, Chunk, ChunkPlanner, ChunkPolicy};
use crate::preflight::{check_connection, Preflight};
use crate::spool::ChunkSpool;
use crate::target::Connector;
use crate::uploader::{RunSummary, UploadEvent, Uploader};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{info, warn};

/// One planned chunk, as reported by `plan` and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkInfo {
    pub number: usize,
    pub statements: usize,
    pub bytes: u64,
    pub first_statement: Option<u64>,
    pub last_statement: Option<u64>,
}

impl From<&Chunk> for ChunkInfo {
    fn from(chunk: &Chunk) -> Self {
        let range = chunk.ordinal_range();
        Self {
            number: chunk.number(),
            statements: chunk.len(),
            bytes: chunk.bytes(),
            first_statement: range.map(|r| r.0),
            last_statement: range.map(|r| r.1),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub dump: PathBuf,
    pub dump_size: u64,
    pub compression: String,
    pub policy: ChunkPolicy,
    pub budget: u64,
    pub statements: u64,
    /// Non-whitespace bytes after the last terminator, never executed.
    pub discarded_tail: usize,
    pub chunks: Vec<ChunkInfo>,
}

/// Tokenizes and plans a statement stream, handing every closed chunk to
/// `sink` as soon as it is complete. Returns chunk descriptions ordered by
/// chunk number.
pub fn plan_statements<R, F>(
    statements: &mut Tokenizer<R>,
    mut planner: ChunkPlanner,
    mut sink: F,
) -> std::io::Result<Vec<ChunkInfo>>
where
    R: Read,
    F: FnMut(&Chunk) -> std::io::Result<()>,
{
    let mut infos = Vec::new();
    for stmt in statements.by_ref() {
        if let Some(chunk) = planner.push(stmt?) {
            sink(&chunk)?;
            infos.push(ChunkInfo::from(&chunk));
        }
    }
    for chunk in planner.finish() {
        sink(&chunk)?;
        infos.push(ChunkInfo::from(&chunk));
    }
    infos.sort_by_key(|c| c.number);
    Ok(infos)
}

/// Plans `dump` with the configured policy, budget and small-file threshold.
pub fn plan_dump<F>(
    dump: &Dump,
    config: &LoaderConfig,
    statements: &mut Tokenizer<Box<dyn Read>>,
    sink: F,
) -> std::io::Result<PlanSummary>
where
    F: FnMut(&Chunk) -> std::io::Result<()>,
{
    let policy = policy_for_size(config.policy, dump.size(), config.small_file_threshold);
    if policy != config.policy {
        info!(
            "Dump is {:.1} MB, at or under the small-file threshold; uploading as one chunk",
            dump.size_mb()
        );
    }
    let planner = ChunkPlanner::new(policy, config.chunk_budget);
    let chunks = plan_statements(statements, planner, sink)?;

    if statements.discarded_tail() > 0 {
        warn!(
            "Ignoring {} byte(s) of unterminated text at the end of {}",
            statements.discarded_tail(),
            dump.path().display()
        );
    }

    Ok(PlanSummary {
        dump: dump.path().to_path_buf(),
        dump_size: dump.size(),
        compression: dump.compression().to_string(),
        policy,
        budget: config.chunk_budget,
        statements: statements.emitted(),
        discarded_tail: statements.discarded_tail(),
        chunks,
    })
}

type Observer<'a> = Box<dyn Fn(&UploadEvent) + 'a>;

pub struct Loader<'a, C: Connector> {
    connector: &'a C,
    config: &'a LoaderConfig,
    cancel: CancelToken,
    observer: Option<Observer<'a>>,
    scan_progress: Option<Rc<dyn Fn(u64)>>,
}

impl<'a, C: Connector> Loader<'a, C> {
    pub fn new(connector: &'a C, config: &'a LoaderConfig) -> Self {
        Self {
            connector,
            config,
            cancel: CancelToken::new(),
            observer: None,
            scan_progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Receives upload events.
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&UploadEvent) + 'a,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Receives raw bytes read while the dump is being planned.
    pub fn with_scan_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(u64) + 'static,
    {
        self.scan_progress = Some(Rc::new(progress));
        self
    }

    /// Runs the whole load. Pre-run failures come back as `Err`; once
    /// uploading starts the outcome is in the summary, including failures.
    pub fn run(&self, dump_path: &Path) -> Result<RunSummary, LoadError> {
        let dump = Dump::open(dump_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::InputNotFound(dump_path.to_path_buf()),
            _ => LoadError::Io(e),
        })?;
        let schema = self
            .config
            .database()
            .map_err(|e| LoadError::Config(e.to_string()))?;
        info!(
            "Dump {} ({:.1} MB, {})",
            dump.path().display(),
            dump.size_mb(),
            dump.compression()
        );

        info!("Checking connection to {}", self.connector.describe());
        check_connection(self.connector).map_err(LoadError::Connect)?;

        let mut spool = match &self.config.keep_chunks {
            Some(dir) => ChunkSpool::kept(dir)?,
            None => ChunkSpool::temporary()?,
        };
        let mut statements = match &self.scan_progress {
            Some(progress) => {
                let progress = Rc::clone(progress);
                dump.statements_with_progress(move |n| progress(n))?
            }
            None => dump.statements()?,
        };
        let plan = plan_dump(&dump, self.config, &mut statements, |chunk| {
            spool.store(chunk).map(|_| ())
        })?;
        info!(
            "Planned {} statement(s) into {} chunk(s) ({} policy, {} byte budget) in {}",
            plan.statements,
            plan.chunks.len(),
            plan.policy,
            plan.budget,
            spool.dir().display()
        );

        if self.cancel.is_cancelled() {
            return Err(LoadError::Cancelled {
                completed: 0,
                total: plan.chunks.len(),
            });
        }

        let preflight = Preflight::new(self.connector, schema, self.config.preflight);
        let report = preflight.prepare()?;
        if !report.dropped.is_empty() {
            info!("Preflight dropped: {}", report.dropped.join(", "));
        }
        preflight.verify_ready()?;

        let mut uploader = Uploader::new(self.connector, self.config.upload_options(schema))
            .with_cancel(self.cancel.clone());
        if let Some(observer) = &self.observer {
            uploader = uploader.with_observer(|event| observer(event));
        }
        let summary = uploader.run(spool.chunks());

        if spool.is_temporary() {
            if let Err(e) = spool.close() {
                warn!("Could not remove chunk files: {}", e);
            }
        } else {
            info!("Chunk files kept in {}", spool.dir().display());
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLayer;
    use crate::planner::ChunkPolicy;
    use std::io::Cursor;

    #[test]
    fn test_plan_statements_streams_chunks() {
        let sql = "CREATE TABLE t (id INT);INSERT INTO t VALUES (1);INSERT INTO t VALUES (2);";
        let mut tokenizer = Tokenizer::new(Cursor::new(sql.as_bytes().to_vec()), 16);
        let mut seen = Vec::new();
        let infos = plan_statements(
            &mut tokenizer,
            ChunkPlanner::new(ChunkPolicy::SchemaFirst, 30),
            |chunk| {
                seen.push(chunk.number());
                Ok(())
            },
        )
        .unwrap();

        // Data chunks close while streaming; the schema chunk comes out last.
        assert_eq!(seen, vec![2, 1, 3]);
        let numbers: Vec<usize> = infos.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(infos[0].first_statement, Some(1));
    }

    #[test]
    fn test_plan_dump_small_file_goes_single() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("small.sql");
        std::fs::write(&path, "CREATE TABLE t (id INT);INSERT INTO t VALUES (1);SELECT").unwrap();

        let config = ConfigLayer::default().resolve().unwrap();
        let dump = Dump::open(&path).unwrap();
        let mut statements = dump.statements().unwrap();
        let plan = plan_dump(&dump, &config, &mut statements, |_| Ok(())).unwrap();

        assert_eq!(plan.policy, ChunkPolicy::Single);
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.statements, 2);
        assert_eq!(plan.discarded_tail, 6);
    }
}
