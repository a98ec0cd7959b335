//! Resilient chunk uploader.
//!
//! Chunks run strictly in order, each in a fresh session. Statement errors
//! are counted and the chunk carries on; chunk-level failures (lost session,
//! failed commit) are queued for retry passes after the main pass; storage
//! exhaustion stops everything.

mod outcome;

pub use outcome::{
    AttemptEnd, ChunkOutcome, ChunkState, CriticalFailure, ErrorSample, RunSummary,
};

use crate::cancel::CancelToken;
use crate::parser::Statement;
use crate::planner::Chunk;
use crate::progress::Eta;
use crate::spool::SpooledChunk;
use crate::target::{Connector, DbError, FailureClass, Session};
use chrono::Utc;
use std::borrow::Cow;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_COMMIT_EVERY: usize = 50;
pub const DEFAULT_MAX_ERROR_SAMPLES: usize = 5;
pub const ERROR_SAMPLE_CHARS: usize = 100;

/// A chunk that can be uploaded: in memory or spooled to disk.
pub trait ChunkSource {
    fn number(&self) -> usize;

    fn statement_count(&self) -> usize;

    fn statements(&self) -> std::io::Result<Cow<'_, [Statement]>>;
}

impl ChunkSource for Chunk {
    fn number(&self) -> usize {
        Chunk::number(self)
    }

    fn statement_count(&self) -> usize {
        self.len()
    }

    fn statements(&self) -> std::io::Result<Cow<'_, [Statement]>> {
        Ok(Cow::Borrowed(Chunk::statements(self)))
    }
}

impl ChunkSource for SpooledChunk {
    fn number(&self) -> usize {
        self.number
    }

    fn statement_count(&self) -> usize {
        self.statements
    }

    fn statements(&self) -> std::io::Result<Cow<'_, [Statement]>> {
        self.load().map(Cow::Owned)
    }
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Schema selected in every session.
    pub schema: String,
    /// Pause before every chunk but the first.
    pub chunk_delay: Duration,
    /// Pause before each retried chunk in the first retry pass; doubles on
    /// every later pass.
    pub retry_delay: Duration,
    pub retry_passes: u32,
    pub commit_every: usize,
    pub max_error_samples: usize,
}

impl UploadOptions {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            chunk_delay: Duration::from_secs(5),
            retry_delay: Duration::from_secs(10),
            retry_passes: 1,
            commit_every: DEFAULT_COMMIT_EVERY,
            max_error_samples: DEFAULT_MAX_ERROR_SAMPLES,
        }
    }

    /// Zero delays, for tests and local targets.
    pub fn without_delays(mut self) -> Self {
        self.chunk_delay = Duration::ZERO;
        self.retry_delay = Duration::ZERO;
        self
    }

    pub fn retry_delay_for_pass(&self, pass: u32) -> Duration {
        let factor = 1u32 << pass.saturating_sub(1).min(16);
        self.retry_delay.saturating_mul(factor)
    }
}

/// Progress inside one chunk, reported at commit boundaries.
#[derive(Debug, Clone, Copy)]
pub struct ChunkProgress {
    pub number: usize,
    pub done: usize,
    pub total: usize,
    pub eta: Eta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    NextChunk,
    Retry,
}

/// Events for observers. They never influence the run.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    RunStarted {
        chunks: usize,
    },
    ChunkStarted {
        number: usize,
        attempt: u32,
        statements: usize,
    },
    Progress(ChunkProgress),
    ChunkFinished {
        number: usize,
        state: ChunkState,
        executed: usize,
        errors: usize,
    },
    RetryScheduled {
        pass: u32,
        chunks: Vec<usize>,
        delay: Duration,
    },
    Waiting {
        delay: Duration,
        reason: WaitReason,
    },
}

type Observer<'a> = Box<dyn Fn(&UploadEvent) + 'a>;

pub struct Uploader<'a, C: Connector> {
    connector: &'a C,
    options: UploadOptions,
    cancel: CancelToken,
    observer: Option<Observer<'a>>,
}

impl<'a, C: Connector> Uploader<'a, C> {
    pub fn new(connector: &'a C, options: UploadOptions) -> Self {
        Self {
            connector,
            options,
            cancel: CancelToken::new(),
            observer: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&UploadEvent) + 'a,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    fn emit(&self, event: UploadEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    /// Waits, announcing the pause. Returns `false` if cancelled meanwhile.
    fn wait(&self, delay: Duration, reason: WaitReason) -> bool {
        if delay.is_zero() {
            return !self.cancel.is_cancelled();
        }
        self.emit(UploadEvent::Waiting { delay, reason });
        debug!("waiting {:.1}s", delay.as_secs_f64());
        self.cancel.sleep(delay)
    }

    /// Uploads `chunks` in order and reports what happened.
    pub fn run<S: ChunkSource>(&self, chunks: &[S]) -> RunSummary {
        let started_at = Utc::now();
        let mut outcomes: Vec<ChunkOutcome> = chunks
            .iter()
            .map(|c| ChunkOutcome::pending(c.number(), c.statement_count()))
            .collect();
        let mut retry_queue: Vec<usize> = Vec::new();
        let mut critical = None;
        let mut cancelled = false;

        info!(
            "Uploading {} chunk(s) to '{}' on {}",
            chunks.len(),
            self.options.schema,
            self.connector.describe()
        );
        self.emit(UploadEvent::RunStarted {
            chunks: chunks.len(),
        });

        'main: for (idx, chunk) in chunks.iter().enumerate() {
            if idx > 0 && !self.wait(self.options.chunk_delay, WaitReason::NextChunk) {
                cancelled = true;
                break 'main;
            }
            if self.cancel.is_cancelled() {
                cancelled = true;
                break 'main;
            }

            match self.attempt(chunk, &mut outcomes[idx]) {
                AttemptEnd::Committed => {}
                AttemptEnd::Failed(_) => retry_queue.push(idx),
                AttemptEnd::Critical(message) => {
                    critical = Some(CriticalFailure {
                        chunk: chunk.number(),
                        message,
                    });
                    break 'main;
                }
                AttemptEnd::Cancelled => {
                    cancelled = true;
                    break 'main;
                }
            }
        }

        let mut pass = 0;
        while critical.is_none() && !cancelled && !retry_queue.is_empty() {
            if pass >= self.options.retry_passes {
                break;
            }
            pass += 1;
            let delay = self.options.retry_delay_for_pass(pass);
            let numbers: Vec<usize> = retry_queue.iter().map(|&i| chunks[i].number()).collect();
            warn!(
                "Retry pass {}/{} for chunk(s) {:?}",
                pass, self.options.retry_passes, numbers
            );
            self.emit(UploadEvent::RetryScheduled {
                pass,
                chunks: numbers,
                delay,
            });

            let mut still_failing = Vec::new();
            for &idx in &retry_queue {
                if !self.wait(delay, WaitReason::Retry) {
                    cancelled = true;
                    break;
                }
                match self.attempt(&chunks[idx], &mut outcomes[idx]) {
                    AttemptEnd::Committed => {}
                    AttemptEnd::Failed(_) => still_failing.push(idx),
                    AttemptEnd::Critical(message) => {
                        critical = Some(CriticalFailure {
                            chunk: chunks[idx].number(),
                            message,
                        });
                        break;
                    }
                    AttemptEnd::Cancelled => {
                        cancelled = true;
                        break;
                    }
                }
            }
            if critical.is_some() || cancelled {
                break;
            }
            retry_queue = still_failing;
        }

        // Retryable chunks the run could not get back to are final now.
        for outcome in outcomes
            .iter_mut()
            .filter(|o| o.state == ChunkState::FailedRetryable)
        {
            transition(outcome, ChunkState::FailedPermanent);
        }

        let summary = RunSummary::from_outcomes(outcomes, critical, cancelled, started_at);
        log_summary(&summary);
        summary
    }

    /// One attempt at one chunk, in its own session.
    fn attempt<S: ChunkSource>(&self, chunk: &S, outcome: &mut ChunkOutcome) -> AttemptEnd {
        let number = chunk.number();
        transition(outcome, ChunkState::Running);
        outcome.attempts += 1;
        outcome.executed = 0;
        outcome.errors = 0;
        outcome.samples.clear();
        outcome.failure = None;

        let started = Instant::now();
        self.emit(UploadEvent::ChunkStarted {
            number,
            attempt: outcome.attempts,
            statements: chunk.statement_count(),
        });
        info!(
            "Chunk {}: {} statement(s), attempt {}",
            number,
            chunk.statement_count(),
            outcome.attempts
        );

        let end = match chunk.statements() {
            Ok(statements) => self.execute_chunk(number, &statements, outcome),
            Err(e) => AttemptEnd::Failed(format!("cannot read chunk {}: {}", number, e)),
        };
        outcome.elapsed = started.elapsed();

        let next = match &end {
            AttemptEnd::Committed => ChunkState::Committed,
            AttemptEnd::Failed(reason) => {
                error!("Chunk {} failed: {}", number, reason);
                outcome.failure = Some(reason.clone());
                ChunkState::FailedRetryable
            }
            AttemptEnd::Critical(message) => {
                error!("Chunk {}: critical failure: {}", number, message);
                outcome.failure = Some(message.clone());
                ChunkState::Aborted
            }
            AttemptEnd::Cancelled => {
                warn!("Chunk {} cancelled and rolled back", number);
                ChunkState::Aborted
            }
        };
        transition(outcome, next);

        if next == ChunkState::Committed {
            info!(
                "Chunk {} committed: {} executed, {} error(s) in {:.1}s",
                number,
                outcome.executed,
                outcome.errors,
                outcome.elapsed.as_secs_f64()
            );
        }
        self.emit(UploadEvent::ChunkFinished {
            number,
            state: next,
            executed: outcome.executed,
            errors: outcome.errors,
        });
        end
    }

    fn execute_chunk(
        &self,
        number: usize,
        statements: &[Statement],
        outcome: &mut ChunkOutcome,
    ) -> AttemptEnd {
        let dialect = self.connector.dialect();
        let mut session = match self.connector.connect() {
            Ok(s) => s,
            Err(e) => return AttemptEnd::Failed(e.to_string()),
        };

        for setting in dialect.relax_statements() {
            if let Err(e) = session.execute(setting) {
                if e.is_connection() {
                    return AttemptEnd::Failed(e.to_string());
                }
                warn!("Chunk {}: ignoring rejected setting '{}': {}", number, setting, e);
            }
        }

        if let Err(e) = session.execute(&dialect.use_schema_sql(&self.options.schema)) {
            return AttemptEnd::Failed(format!(
                "cannot select database '{}': {}",
                self.options.schema, e
            ));
        }

        let total = statements.len();
        let commit_every = self.options.commit_every.max(1);
        let started = Instant::now();

        for (i, stmt) in statements.iter().enumerate() {
            if self.cancel.is_cancelled() {
                rollback(&mut session, number);
                return AttemptEnd::Cancelled;
            }

            match session.execute(stmt.text()) {
                Ok(()) => outcome.executed += 1,
                Err(e) => match e.class {
                    FailureClass::Critical => {
                        outcome.errors += 1;
                        rollback(&mut session, number);
                        return AttemptEnd::Critical(e.message);
                    }
                    FailureClass::Connection => {
                        return AttemptEnd::Failed(e.to_string());
                    }
                    FailureClass::Statement => {
                        self.record_statement_error(number, stmt, &e, outcome);
                    }
                },
            }

            let done = i + 1;
            if done % commit_every == 0 || done == total {
                if let Err(e) = session.commit() {
                    rollback(&mut session, number);
                    return AttemptEnd::Failed(format!("commit failed: {}", e));
                }
                let eta = Eta::new(done as u64, total as u64, started.elapsed());
                info!(
                    "Chunk {}: {}/{} statements, {}",
                    number,
                    done,
                    total,
                    eta.label()
                );
                self.emit(UploadEvent::Progress(ChunkProgress {
                    number,
                    done,
                    total,
                    eta,
                }));
            }
        }

        if total == 0 {
            if let Err(e) = session.commit() {
                rollback(&mut session, number);
                return AttemptEnd::Failed(format!("commit failed: {}", e));
            }
        }

        for setting in dialect.restore_statements() {
            if let Err(e) = session.execute(setting) {
                debug!("Chunk {}: could not restore '{}': {}", number, setting, e);
            }
        }

        AttemptEnd::Committed
    }

    fn record_statement_error(
        &self,
        number: usize,
        stmt: &Statement,
        err: &DbError,
        outcome: &mut ChunkOutcome,
    ) {
        outcome.errors += 1;
        if outcome.samples.len() < self.options.max_error_samples {
            let message = err.short_message(ERROR_SAMPLE_CHARS);
            warn!(
                "Chunk {}: statement {} failed: {}",
                number,
                stmt.ordinal(),
                message
            );
            outcome.samples.push(ErrorSample {
                ordinal: stmt.ordinal(),
                message,
            });
        } else {
            debug!(
                "Chunk {}: statement {} failed: {}",
                number,
                stmt.ordinal(),
                err
            );
        }
    }
}

fn transition(outcome: &mut ChunkOutcome, next: ChunkState) {
    debug_assert!(
        outcome.state.can_become(next),
        "illegal chunk transition {:?} -> {:?}",
        outcome.state,
        next
    );
    outcome.state = next;
}

fn rollback<S: Session>(session: &mut S, number: usize) {
    if let Err(e) = session.rollback() {
        warn!("Chunk {}: rollback failed: {}", number, e);
    }
}

fn log_summary(summary: &RunSummary) {
    info!(
        "Upload finished: {}/{} chunk(s), {} statement(s) executed, {} error(s)",
        summary.chunks_uploaded,
        summary.chunks_total,
        summary.statements_executed,
        summary.statement_errors
    );
    if !summary.retried.is_empty() {
        info!("Retried chunk(s): {:?}", summary.retried);
    }
    if !summary.failed.is_empty() {
        error!("Permanently failed chunk(s): {:?}", summary.failed);
    }
}
