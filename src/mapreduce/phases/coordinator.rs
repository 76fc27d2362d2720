//! Pipeline coordinator: drives the phases of a run
//!
//! ```text
//! ┌───────┐     ┌─────┐ barrier ┌───────┐ barrier ┌────────┐
//! │ Split │ ──> │ Map │ ──────> │ Merge │ ──────> │ Reduce │ ──> output
//! └───────┘     └─────┘         └───────┘         └────────┘
//! ```
//!
//! A fresh run refuses to start over leftovers of an earlier run unless
//! `force` is set. A resumed run loads the manifest and skips whatever the
//! manifest records as done.

use super::{
    MapPhaseExecutor, MapReport, MergePhaseExecutor, MergeReport, PhaseContext, PhaseExecutor,
    PhaseResult, ReducePhaseExecutor, ReduceReport, SplitPhaseExecutor, SplitReport,
};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::mapreduce::checkpoint::{CheckpointStore, Manifest};
use crate::mapreduce::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Summary of a completed run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineReport {
    pub input: PathBuf,
    pub output: PathBuf,
    /// True when the run continued from a manifest
    pub resumed: bool,
    pub split: Option<SplitReport>,
    pub map: Option<MapReport>,
    pub merge: Option<MergeReport>,
    pub reduce: Option<ReduceReport>,
    /// Every phase in order, skipped ones included
    pub phases: Vec<PhaseResult>,
    pub duration_secs: f64,
}

impl PipelineReport {
    pub fn new(input: &Path, output: &Path) -> Self {
        Self {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            ..Self::default()
        }
    }
}

/// Runs and resumes the grouping pipeline
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    store: Arc<CheckpointStore>,
    workspace: Workspace,
    executors: Vec<Box<dyn PhaseExecutor>>,
}

impl Pipeline {
    /// Pipeline with a file-backed manifest in the work directory
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let workspace = Workspace::from_config(&config);
        let store = CheckpointStore::file(workspace.manifest_path());
        Self::with_store(config, store)
    }

    /// Pipeline with a caller-provided checkpoint store
    pub fn with_store(config: PipelineConfig, store: CheckpointStore) -> Result<Self> {
        config.validate()?;
        let workspace = Workspace::from_config(&config);
        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            workspace,
            executors: vec![
                Box::new(SplitPhaseExecutor::new()),
                Box::new(MapPhaseExecutor::new()),
                Box::new(MergePhaseExecutor::new()),
                Box::new(ReducePhaseExecutor::new()),
            ],
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Start a run from scratch
    pub async fn run(&self, input: &Path) -> Result<PipelineReport> {
        self.ensure_clean_state().await?;
        self.execute(input, None).await
    }

    /// Continue an interrupted run, or start fresh when there is nothing to resume
    pub async fn resume(&self, input: &Path) -> Result<PipelineReport> {
        let Some(manifest) = self.store.load_state().await? else {
            info!("No checkpoint to resume; starting a fresh run");
            return self.run(input).await;
        };

        if !same_file(&manifest.source, input) {
            return Err(PipelineError::SourceMismatch {
                expected: manifest.source,
                found: input.to_path_buf(),
            });
        }

        info!(
            "Resuming run over {} ({}/{} chunks sorted, stage {})",
            input.display(),
            manifest.completed_count(),
            manifest.chunks_meta.len(),
            manifest.stage
        );
        self.execute(input, Some(manifest)).await
    }

    /// Remove intermediates and the manifest
    pub fn clean(&self) -> Result<Vec<PathBuf>> {
        self.workspace.clean()
    }

    /// Refuse to start over an earlier run's files unless forced
    async fn ensure_clean_state(&self) -> Result<()> {
        let mut leftovers = self.workspace.leftovers()?;
        if self.store.load_state().await?.is_some() {
            leftovers.push(self.store.location().to_path_buf());
        }
        if leftovers.is_empty() {
            return Ok(());
        }

        if self.config.force {
            warn!(
                "Removing {} files left by an earlier run",
                leftovers.len()
            );
            self.workspace.clean()?;
            self.store.clear().await?;
            return Ok(());
        }
        Err(PipelineError::StaleWorkspace { leftovers })
    }

    async fn execute(&self, input: &Path, manifest: Option<Manifest>) -> Result<PipelineReport> {
        let start = Instant::now();
        let mut context = PhaseContext::new(
            input.to_path_buf(),
            Arc::clone(&self.config),
            Arc::clone(&self.store),
        );
        context.report.resumed = manifest.is_some();
        context.manifest = manifest;
        self.workspace.ensure()?;

        for executor in &self.executors {
            let phase = executor.phase_type();
            if executor.can_skip(&context) {
                info!("Skipping {} phase", phase);
                context.report.phases.push(PhaseResult::skipped(phase));
                continue;
            }

            executor.validate_context(&context)?;
            debug!("Starting {} phase", phase);
            let result = executor.execute(&mut context).await?;
            info!(
                "{} phase completed in {:.2}s ({} items, {} skipped)",
                phase,
                result.metrics.duration_secs,
                result.metrics.items_processed,
                result.metrics.items_skipped
            );
            context.report.phases.push(result);
        }

        let mut report = context.report;
        report.duration_secs = start.elapsed().as_secs_f64();
        info!(
            "Wrote {} in {:.2}s",
            report.output.display(),
            report.duration_secs
        );
        Ok(report)
    }
}

/// Compare paths by identity when both exist, textually otherwise
fn same_file(left: &Path, right: &Path) -> bool {
    match (left.canonicalize(), right.canonicalize()) {
        (Ok(left), Ok(right)) => left == right,
        _ => left == right,
    }
}
