//! Run-level errors and their exit codes.

use crate::target::DbError;
use std::path::PathBuf;

/// Exit code for a run stopped by the operator.
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("cannot reach target: {0}")]
    Connect(#[source] DbError),

    #[error("preflight failed: {0}")]
    Preflight(String),

    #[error("target database '{0}' is a system schema and cannot be recreated")]
    ReservedTarget(String),

    #[error("critical failure in chunk {chunk}: {message}")]
    Critical { chunk: usize, message: String },

    #[error("{} chunk(s) failed after retries: {}", .0.len(), join_numbers(.0))]
    ChunksFailed(Vec<usize>),

    #[error("cancelled after {completed} of {total} chunk(s)")]
    Cancelled { completed: usize, total: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LoadError {
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::Cancelled { .. } => EXIT_CANCELLED,
            _ => 1,
        }
    }

    /// Guidance printed after the error, when one applies.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            LoadError::Connect(db) => db.hint(),
            LoadError::Critical { .. } => {
                Some("storage limit reached; free space or upgrade the target plan, then rerun")
            }
            LoadError::ChunksFailed(_) => {
                Some("rerunning recreates the target database and starts from chunk 1")
            }
            _ => None,
        }
    }
}

pub(crate) fn join_numbers(numbers: &[usize]) -> String {
    numbers
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
