//! Per-chunk outcomes and the run summary.

use crate::error::LoadError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Lifecycle of one chunk.
///
/// ```text
/// Pending -> Running -> Committed
///               |  \-> Aborted (critical failure or cancellation)
///               v
///        FailedRetryable -> Running (retry pass)
///               \-> FailedPermanent
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    Running,
    Committed,
    FailedRetryable,
    FailedPermanent,
    Aborted,
}

impl ChunkState {
    pub fn can_become(self, next: ChunkState) -> bool {
        use ChunkState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Committed)
                | (Running, FailedRetryable)
                | (Running, Aborted)
                | (FailedRetryable, Running)
                | (FailedRetryable, FailedPermanent)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChunkState::Committed | ChunkState::FailedPermanent | ChunkState::Aborted
        )
    }
}

impl std::fmt::Display for ChunkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChunkState::Pending => "pending",
            ChunkState::Running => "running",
            ChunkState::Committed => "committed",
            ChunkState::FailedRetryable => "failed (retryable)",
            ChunkState::FailedPermanent => "failed",
            ChunkState::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// A failing statement kept for the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorSample {
    pub ordinal: u64,
    pub message: String,
}

/// How the latest attempt at a chunk ended, before retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptEnd {
    Committed,
    /// Chunk-level failure; the chunk may be retried.
    Failed(String),
    /// Storage or quota exhausted; the run stops.
    Critical(String),
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkOutcome {
    pub number: usize,
    pub state: ChunkState,
    pub attempts: u32,
    pub statements: usize,
    /// Statements that executed successfully in the latest attempt.
    pub executed: usize,
    /// Statements that failed in the latest attempt.
    pub errors: usize,
    pub samples: Vec<ErrorSample>,
    /// Why the latest attempt failed, for chunk-level failures.
    pub failure: Option<String>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

impl ChunkOutcome {
    pub fn pending(number: usize, statements: usize) -> Self {
        Self {
            number,
            state: ChunkState::Pending,
            attempts: 0,
            statements,
            executed: 0,
            errors: 0,
            samples: Vec::new(),
            failure: None,
            elapsed: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriticalFailure {
    pub chunk: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub chunks_total: usize,
    pub chunks_uploaded: usize,
    pub statements_executed: usize,
    pub statement_errors: usize,
    /// Chunks that needed more than one attempt.
    pub retried: Vec<usize>,
    /// Chunks still failing after the last retry pass.
    pub failed: Vec<usize>,
    pub critical: Option<CriticalFailure>,
    pub cancelled: bool,
    pub chunks: Vec<ChunkOutcome>,
}

impl RunSummary {
    pub fn from_outcomes(
        chunks: Vec<ChunkOutcome>,
        critical: Option<CriticalFailure>,
        cancelled: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        let uploaded = chunks
            .iter()
            .filter(|c| c.state == ChunkState::Committed)
            .count();
        Self {
            started_at,
            finished_at: Utc::now(),
            chunks_total: chunks.len(),
            chunks_uploaded: uploaded,
            statements_executed: chunks.iter().map(|c| c.executed).sum(),
            statement_errors: chunks.iter().map(|c| c.errors).sum(),
            retried: chunks
                .iter()
                .filter(|c| c.attempts > 1)
                .map(|c| c.number)
                .collect(),
            failed: chunks
                .iter()
                .filter(|c| c.state == ChunkState::FailedPermanent)
                .map(|c| c.number)
                .collect(),
            critical,
            cancelled,
            chunks,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.critical.is_none() && !self.cancelled
    }

    /// The run-level error this summary represents, if any.
    pub fn failure(&self) -> Option<LoadError> {
        if let Some(critical) = &self.critical {
            return Some(LoadError::Critical {
                chunk: critical.chunk,
                message: critical.message.clone(),
            });
        }
        if self.cancelled {
            return Some(LoadError::Cancelled {
                completed: self.chunks_uploaded,
                total: self.chunks_total,
            });
        }
        if !self.failed.is_empty() {
            return Some(LoadError::ChunksFailed(self.failed.clone()));
        }
        None
    }

    pub fn into_result(self) -> Result<RunSummary, LoadError> {
        match self.failure() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
