//! Phase execution for the grouping pipeline
//!
//! A run moves through four phases, each behind the [`PhaseExecutor`] trait:
//!
//! ```text
//! [Start] → [Split] → [Map] → [Merge] → [Reduce] → [Complete]
//!              ↓        ↓        ↓
//!           [Skip]   [Skip]   [Skip]     (resumed runs)
//! ```
//!
//! ## Transition Rules:
//!
//! - **Split** is skipped when a manifest was loaded; a split never resumes
//!   part way.
//! - **Map** only processes chunks the manifest lists as unprocessed, and is
//!   skipped once the merge has completed.
//! - **Merge** is skipped when the manifest stage is already `merged`.
//! - **Reduce** always runs.
//!
//! Any error ends the run; nothing is retried.

pub mod coordinator;
pub mod map;
pub mod merge;
pub mod reduce;
pub mod split;

use super::checkpoint::{CheckpointStore, Manifest};
use super::workspace::Workspace;
use crate::config::PipelineConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

pub use coordinator::{Pipeline, PipelineReport};
pub use map::{ChunkProcessor, MapPhaseExecutor, MapReport};
pub use merge::{MergeCombiner, MergePhaseExecutor, MergeReport};
pub use reduce::{Aggregator, ReducePhaseExecutor, ReduceReport};
pub use split::{SplitOutcome, SplitPhaseExecutor, SplitReport, Splitter};

/// Type of phase in a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseType {
    /// Cut the input into line-aligned chunk files
    Split,
    /// Sort each chunk by hash surrogate
    Map,
    /// K-way merge of the sorted chunks
    Merge,
    /// Grouped sums over the merged file
    Reduce,
}

impl std::fmt::Display for PhaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseType::Split => write!(f, "Split"),
            PhaseType::Map => write!(f, "Map"),
            PhaseType::Merge => write!(f, "Merge"),
            PhaseType::Reduce => write!(f, "Reduce"),
        }
    }
}

/// Result from executing a phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_type: PhaseType,
    /// True when the phase was skipped on a resumed run
    pub skipped: bool,
    pub metrics: PhaseMetrics,
}

impl PhaseResult {
    pub fn completed(phase_type: PhaseType, metrics: PhaseMetrics) -> Self {
        Self {
            phase_type,
            skipped: false,
            metrics,
        }
    }

    pub fn skipped(phase_type: PhaseType) -> Self {
        Self {
            phase_type,
            skipped: true,
            metrics: PhaseMetrics::default(),
        }
    }
}

/// Metrics collected during phase execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseMetrics {
    /// Duration in seconds
    pub duration_secs: f64,
    /// Chunks, files or rows handled, depending on the phase
    pub items_processed: usize,
    /// Items left alone because an earlier run finished them
    pub items_skipped: usize,
}

/// State threaded through the phases of one run
pub struct PhaseContext {
    /// Input file being aggregated
    pub input: PathBuf,
    pub config: Arc<PipelineConfig>,
    pub workspace: Workspace,
    pub store: Arc<CheckpointStore>,
    /// Manifest of the run; `None` until the split has written it
    pub manifest: Option<Manifest>,
    /// Per-phase reports gathered so far
    pub report: PipelineReport,
}

impl PhaseContext {
    pub fn new(input: PathBuf, config: Arc<PipelineConfig>, store: Arc<CheckpointStore>) -> Self {
        let workspace = Workspace::from_config(&config);
        let report = PipelineReport::new(&input, workspace.output_path());
        Self {
            input,
            config,
            workspace,
            store,
            manifest: None,
            report,
        }
    }

    /// The loaded manifest, or an error naming the phase that needed it
    pub fn require_manifest(&self, phase: PhaseType) -> Result<&Manifest> {
        self.manifest
            .as_ref()
            .ok_or_else(|| crate::error::PipelineError::CheckpointCorrupted {
                path: self.workspace.manifest_path(),
                details: format!("{} phase started without a manifest", phase),
            })
    }
}

/// Trait for executing a phase of the pipeline
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    /// Execute the phase
    async fn execute(&self, context: &mut PhaseContext) -> Result<PhaseResult>;

    /// Get the phase type
    fn phase_type(&self) -> PhaseType;

    /// Check if the phase can be skipped
    fn can_skip(&self, _context: &PhaseContext) -> bool {
        false
    }

    /// Validate the context before execution
    fn validate_context(&self, _context: &PhaseContext) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod reduce_test;
