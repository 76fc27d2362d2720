//! Merge phase: k-way merge of sorted chunks into one surrogate-ordered file

use super::{PhaseContext, PhaseExecutor, PhaseMetrics, PhaseResult, PhaseType};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::mapreduce::appender::SharedAppender;
use crate::mapreduce::checkpoint::{Manifest, PipelineStage};
use crate::mapreduce::heap::MergeHeap;
use crate::mapreduce::record::{record_line, HashSurrogate, Header};
use crate::mapreduce::workspace::remove_if_present;
use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Totals from a merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Sorted files merged
    pub sources: usize,
    /// Rows written to the merged file
    pub rows: u64,
}

/// Heap entry: the head row of one source
#[derive(Debug)]
struct MergeEntry {
    surrogate: HashSurrogate,
    source: usize,
    record: StringRecord,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.surrogate, self.source).cmp(&(other.surrogate, other.source))
    }
}

/// Sequential reader over one sorted file
struct SourceCursor {
    path: PathBuf,
    records: StringRecordsIntoIter<File>,
    last: Option<HashSurrogate>,
}

impl SourceCursor {
    fn open(path: &Path, header: &Header, delimiter: u8) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .from_path(path)
            .map_err(|e| PipelineError::csv(path, e))?;

        let found = reader.headers().map_err(|e| PipelineError::csv(path, e))?;
        if found.iter().ne(header.columns().iter().map(String::as_str)) {
            return Err(PipelineError::MalformedRow {
                path: path.to_path_buf(),
                line: 1,
                reason: "header differs from the input header".to_string(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            records: reader.into_records(),
            last: None,
        })
    }

    /// Next row with its surrogate; rows must arrive in surrogate order
    fn next(&mut self) -> Result<Option<(HashSurrogate, StringRecord)>> {
        let Some(result) = self.records.next() else {
            return Ok(None);
        };
        let record = result.map_err(|e| PipelineError::csv(&self.path, e))?;
        let surrogate = HashSurrogate::of_record(&record);

        if self.last.is_some_and(|last| surrogate < last) {
            return Err(PipelineError::MalformedRow {
                path: self.path.clone(),
                line: record_line(&record),
                reason: "row is out of hash order".to_string(),
            });
        }
        self.last = Some(surrogate);
        Ok(Some((surrogate, record)))
    }
}

/// K-way merge of sorted chunk files
///
/// After emitting the smallest head row, the merge keeps reading from the
/// same source while the surrogate is unchanged, so rows sharing a surrogate
/// within one source stay together without a heap round trip.
pub struct MergeCombiner {
    delimiter: u8,
    flush_rows: usize,
}

impl MergeCombiner {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            delimiter: config.delimiter_byte(),
            flush_rows: config.merge_flush_rows,
        }
    }

    pub fn merge(&self, sources: &[PathBuf], header: &Header, output: &Path) -> Result<MergeReport> {
        let mut cursors = sources
            .iter()
            .map(|path| SourceCursor::open(path, header, self.delimiter))
            .collect::<Result<Vec<_>>>()?;
        let appender = SharedAppender::create(output, header, self.delimiter)?;

        let mut heap = MergeHeap::with_capacity(cursors.len());
        for (source, cursor) in cursors.iter_mut().enumerate() {
            if let Some((surrogate, record)) = cursor.next()? {
                heap.push(MergeEntry {
                    surrogate,
                    source,
                    record,
                })?;
            }
        }

        let mut batch = Vec::with_capacity(self.flush_rows.min(8192));
        while let Some(entry) = heap.pop() {
            let source = entry.source;
            let surrogate = entry.surrogate;
            self.emit(&appender, &mut batch, entry.record)?;

            while let Some((next, record)) = cursors[source].next()? {
                if next == surrogate {
                    self.emit(&appender, &mut batch, record)?;
                } else {
                    heap.push(MergeEntry {
                        surrogate: next,
                        source,
                        record,
                    })?;
                    break;
                }
            }
        }
        appender.append_batch(&batch)?;
        appender.sync()?;

        let report = MergeReport {
            sources: sources.len(),
            rows: appender.rows_written(),
        };
        info!(
            "Merged {} sorted files into {} ({} rows)",
            report.sources,
            output.display(),
            report.rows
        );
        Ok(report)
    }

    fn emit(
        &self,
        appender: &SharedAppender,
        batch: &mut Vec<StringRecord>,
        record: StringRecord,
    ) -> Result<()> {
        batch.push(record);
        if batch.len() >= self.flush_rows {
            appender.append_batch(batch)?;
            batch.clear();
        }
        Ok(())
    }
}

/// Delete every chunk and sorted file the manifest lists
pub(crate) fn remove_chunk_files(manifest: &Manifest) -> Result<()> {
    for chunk in &manifest.chunks_meta {
        remove_if_present(&chunk.sorted_file)?;
        remove_if_present(&chunk.input_file)?;
    }
    debug!("Removed {} chunk and sorted file pairs", manifest.chunks_meta.len());
    Ok(())
}

/// Executor for the merge phase
pub struct MergePhaseExecutor;

impl MergePhaseExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MergePhaseExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PhaseExecutor for MergePhaseExecutor {
    async fn execute(&self, context: &mut PhaseContext) -> Result<PhaseResult> {
        let start = Instant::now();
        let manifest = context.require_manifest(self.phase_type())?;
        let header = Header::new(manifest.header.clone(), &manifest.source)?;
        let sources: Vec<PathBuf> = manifest
            .chunks_meta
            .iter()
            .map(|chunk| chunk.sorted_file.clone())
            .collect();
        let output = context.workspace.merged_path();
        let combiner = MergeCombiner::new(&context.config);

        let report = tokio::task::spawn_blocking(move || combiner.merge(&sources, &header, &output))
            .await
            .map_err(|e| PipelineError::TaskFailed {
                chunk_id: 0,
                reason: format!("merge task panicked: {}", e),
            })??;

        // Record the merged stage before any input is deleted
        let manifest = context.store.set_stage(PipelineStage::Merged).await?;
        remove_chunk_files(&manifest)?;
        context.manifest = Some(manifest);

        let metrics = PhaseMetrics {
            duration_secs: start.elapsed().as_secs_f64(),
            items_processed: report.sources,
            items_skipped: 0,
        };
        context.report.merge = Some(report);
        Ok(PhaseResult::completed(self.phase_type(), metrics))
    }

    fn phase_type(&self) -> PhaseType {
        PhaseType::Merge
    }

    fn can_skip(&self, context: &PhaseContext) -> bool {
        context
            .manifest
            .as_ref()
            .is_some_and(|m| m.stage == PipelineStage::Merged)
    }

    /// Every chunk must be sorted before the merge starts
    fn validate_context(&self, context: &PhaseContext) -> Result<()> {
        let manifest = context.require_manifest(self.phase_type())?;
        let pending = manifest.pending().count();
        if pending > 0 {
            return Err(PipelineError::CheckpointCorrupted {
                path: context.workspace.manifest_path(),
                details: format!("{} chunks are still unsorted at the merge barrier", pending),
            });
        }
        Ok(())
    }
}
