//! Error types for the grouping pipeline
//!
//! Every failure in the pipeline is fatal. The variants exist so callers can
//! tell data problems from I/O and configuration problems, and pick an exit
//! code accordingly.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Malformed row in {path} at line {line}: {reason}")]
    MalformedRow {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("Input {path} has no header row")]
    MissingHeader { path: PathBuf },

    #[error("Sum overflowed i64 for group {key} in metric column {column}")]
    MetricOverflow { key: String, column: String },

    #[error("Failed to persist checkpoint to {path}")]
    CheckpointPersistFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint {path} corrupted: {details}")]
    CheckpointCorrupted { path: PathBuf, details: String },

    #[error(
        "Work directory holds files from a previous run ({}); resume it, run `clean`, or pass --force",
        .leftovers.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
    )]
    StaleWorkspace { leftovers: Vec<PathBuf> },

    #[error("Merge heap is full (capacity {capacity})")]
    Capacity { capacity: usize },

    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Map task for chunk {chunk_id} failed: {reason}")]
    TaskFailed { chunk_id: u32, reason: String },

    #[error("Checkpoint belongs to {expected}, not {found}")]
    SourceMismatch { expected: PathBuf, found: PathBuf },
}

impl PipelineError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Convert a csv error, lifting column-count mismatches into `MalformedRow`
    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        let path = path.into();
        if let csv::ErrorKind::UnequalLengths {
            pos,
            expected_len,
            len,
        } = source.kind()
        {
            return Self::MalformedRow {
                line: pos.as_ref().map(|p| p.line()).unwrap_or(0),
                reason: format!("expected {} fields, found {}", expected_len, len),
                path,
            };
        }
        Self::Csv { path, source }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfiguration { .. } | Self::StaleWorkspace { .. } => 2,
            Self::MalformedRow { .. }
            | Self::MissingHeader { .. }
            | Self::MetricOverflow { .. }
            | Self::Csv { .. } => 3,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
