//! Map phase: sort every unprocessed chunk by hash surrogate
//!
//! Chunks are sorted on blocking threads, at most `max_parallel` at a time.
//! A task holds its semaphore permit until its checkpoint write finishes, so
//! the permit count bounds both resident chunks and open files. The first
//! failure stops further dispatch; tasks already running are allowed to
//! finish and the first error is reported.

use super::{PhaseContext, PhaseExecutor, PhaseMetrics, PhaseResult, PhaseType};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::mapreduce::checkpoint::{ChunkMeta, CheckpointStore, PipelineStage};
use crate::mapreduce::record::{HashSurrogate, Header};
use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Totals from a map phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapReport {
    /// Chunks sorted by this run
    pub processed: usize,
    /// Chunks an earlier run had already sorted
    pub skipped: usize,
    /// Rows sorted by this run
    pub rows: u64,
    /// Most map tasks observed running at once
    pub peak_concurrency: usize,
}

/// Tracks how many tasks are inside their critical section
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard {
            gauge: Arc::clone(self),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct GaugeGuard {
    gauge: Arc<ConcurrencyGauge>,
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded pool that sorts chunks and checkpoints each one
pub struct ChunkProcessor {
    store: Arc<CheckpointStore>,
    max_parallel: usize,
    delimiter: u8,
}

impl ChunkProcessor {
    pub fn new(store: Arc<CheckpointStore>, config: &PipelineConfig) -> Self {
        Self {
            store,
            max_parallel: config.max_parallel,
            delimiter: config.delimiter_byte(),
        }
    }

    /// Sort and checkpoint every chunk given, stopping at the first failure
    pub async fn process(&self, chunks: Vec<ChunkMeta>) -> Result<MapReport> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let gauge = Arc::new(ConcurrencyGauge::default());
        let failed = Arc::new(AtomicBool::new(false));
        let mut futures = FuturesUnordered::new();

        debug!(
            "Dispatching {} chunks with max_parallel={}",
            chunks.len(),
            self.max_parallel
        );

        for chunk in chunks {
            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                PipelineError::TaskFailed {
                    chunk_id: chunk.id,
                    reason: e.to_string(),
                }
            })?;
            if failed.load(Ordering::SeqCst) {
                debug!("Not dispatching chunk {} after an earlier failure", chunk.id);
                break;
            }

            let id = chunk.id;
            let store = Arc::clone(&self.store);
            let gauge = Arc::clone(&gauge);
            let failed = Arc::clone(&failed);
            let delimiter = self.delimiter;

            let handle = tokio::spawn(async move {
                let _active = gauge.enter();
                let result = sort_and_checkpoint(chunk, delimiter, &store).await;
                if result.is_err() {
                    failed.store(true, Ordering::SeqCst);
                }
                drop(permit);
                result
            });
            futures.push(async move { (id, handle.await) });
        }

        let mut report = MapReport::default();
        let mut first_error = None;
        while let Some((id, joined)) = futures.next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(PipelineError::TaskFailed {
                    chunk_id: id,
                    reason: e.to_string(),
                })
            });
            match outcome {
                Ok(rows) => {
                    report.processed += 1;
                    report.rows += rows;
                }
                Err(e) => {
                    error!("Chunk {} failed: {}", id, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        report.peak_concurrency = gauge.peak();
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

async fn sort_and_checkpoint(
    chunk: ChunkMeta,
    delimiter: u8,
    store: &CheckpointStore,
) -> Result<u64> {
    let id = chunk.id;
    let rows = tokio::task::spawn_blocking(move || sort_chunk(&chunk, delimiter))
        .await
        .map_err(|e| PipelineError::TaskFailed {
            chunk_id: id,
            reason: e.to_string(),
        })??;

    store.mark_complete(id).await?;
    debug!("Sorted chunk {} ({} rows)", id, rows);
    Ok(rows)
}

/// Read a chunk, order its rows by hash surrogate and write the sorted file
///
/// Returns the number of data rows written.
pub fn sort_chunk(chunk: &ChunkMeta, delimiter: u8) -> Result<u64> {
    let input = &chunk.input_file;
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(input)
        .map_err(|e| PipelineError::csv(input, e))?;
    let header = Header::from_record(
        reader.headers().map_err(|e| PipelineError::csv(input, e))?,
        input,
    )?;

    let mut rows: Vec<(HashSurrogate, StringRecord)> = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| PipelineError::csv(input, e))?;
        rows.push((HashSurrogate::of_record(&record), record));
    }
    rows.sort_by_key(|(surrogate, _)| *surrogate);

    let output = &chunk.sorted_file;
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(output)
        .map_err(|e| PipelineError::csv(output, e))?;
    writer
        .write_record(&header.to_record())
        .map_err(|e| PipelineError::csv(output, e))?;
    for (_, record) in &rows {
        writer
            .write_record(record)
            .map_err(|e| PipelineError::csv(output, e))?;
    }
    writer.flush().map_err(|e| PipelineError::io(output, e))?;
    // On disk before the chunk can be marked processed
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| PipelineError::io(output, e))?;

    Ok(rows.len() as u64)
}

/// Executor for the map phase
pub struct MapPhaseExecutor;

impl MapPhaseExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MapPhaseExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PhaseExecutor for MapPhaseExecutor {
    async fn execute(&self, context: &mut PhaseContext) -> Result<PhaseResult> {
        let start = Instant::now();
        let manifest = context.require_manifest(self.phase_type())?;
        let pending: Vec<ChunkMeta> = manifest.pending().cloned().collect();
        let skipped = manifest.completed_count();

        if skipped > 0 {
            info!(
                "Resuming map phase: {} chunks already sorted, {} remaining",
                skipped,
                pending.len()
            );
        }

        let processor = ChunkProcessor::new(Arc::clone(&context.store), &context.config);
        let mut report = processor.process(pending).await?;
        report.skipped = skipped;

        context.manifest = context.store.load_strict().await?;
        info!(
            "Map phase sorted {} chunks ({} rows, peak concurrency {})",
            report.processed, report.rows, report.peak_concurrency
        );

        let metrics = PhaseMetrics {
            duration_secs: start.elapsed().as_secs_f64(),
            items_processed: report.processed,
            items_skipped: report.skipped,
        };
        context.report.map = Some(report);
        Ok(PhaseResult::completed(self.phase_type(), metrics))
    }

    fn phase_type(&self) -> PhaseType {
        PhaseType::Map
    }

    /// Nothing to sort once the merged file is complete
    fn can_skip(&self, context: &PhaseContext) -> bool {
        context
            .manifest
            .as_ref()
            .is_some_and(|m| m.stage == PipelineStage::Merged)
    }
}
