//! Reduce phase: grouped sums over the merged file

use super::merge::remove_chunk_files;
use super::{PhaseContext, PhaseExecutor, PhaseMetrics, PhaseResult, PhaseType};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::mapreduce::appender::SharedAppender;
use crate::mapreduce::checkpoint::PipelineStage;
use crate::mapreduce::record::{record_line, GroupKey, HashSurrogate, Header, KEY_COLUMNS};
use crate::mapreduce::workspace::remove_if_present;
use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Totals from a reduce
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceReport {
    /// Rows read from the merged file
    pub rows_in: u64,
    /// Rows written to the output, one per group per flush
    pub groups_out: u64,
    /// Times the accumulators were written out and cleared
    pub flushes: usize,
}

/// Running sums for one group
#[derive(Debug, Clone)]
struct Accumulator {
    surrogate: HashSurrogate,
    sums: Vec<i64>,
}

/// Streaming grouped-sum pass
///
/// Groups are keyed by the literal dimension fields, so rows whose
/// surrogates collide are still summed separately. Once more than
/// `flush_groups` groups are live, the map is written out and cleared at the
/// next change of surrogate. Input ordered by surrogate therefore yields one
/// row per group; only a key whose rows are split by a colliding key can
/// appear twice.
pub struct Aggregator {
    delimiter: u8,
    flush_groups: usize,
}

impl Aggregator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            delimiter: config.delimiter_byte(),
            flush_groups: config.reduce_flush_groups,
        }
    }

    pub fn aggregate(&self, input: &Path, output: &Path) -> Result<ReduceReport> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .from_path(input)
            .map_err(|e| PipelineError::csv(input, e))?;
        let header = Header::from_record(
            reader.headers().map_err(|e| PipelineError::csv(input, e))?,
            input,
        )?;
        let appender = SharedAppender::create(output, &header, self.delimiter)?;

        let mut groups: HashMap<GroupKey, Accumulator> = HashMap::new();
        let mut report = ReduceReport::default();
        let mut record = StringRecord::new();
        let mut last: Option<HashSurrogate> = None;
        let mut flush_pending = false;

        while reader
            .read_record(&mut record)
            .map_err(|e| PipelineError::csv(input, e))?
        {
            report.rows_in += 1;
            let surrogate = HashSurrogate::of_record(&record);

            // A run of equal surrogates never straddles a flush
            if flush_pending && last != Some(surrogate) {
                debug!("Flushing {} groups at row {}", groups.len(), report.rows_in);
                self.flush(&mut groups, &appender, &mut report)?;
                flush_pending = false;
            }

            self.accumulate(&mut groups, &header, &record, input)?;
            last = Some(surrogate);
            if groups.len() > self.flush_groups {
                flush_pending = true;
            }
        }
        if !groups.is_empty() {
            self.flush(&mut groups, &appender, &mut report)?;
        }
        appender.sync()?;

        if report.flushes > 1 {
            warn!(
                "Output was written in {} flushes; keys interleaved with a colliding key may repeat",
                report.flushes
            );
        }
        info!(
            "Reduced {} rows into {} output rows at {}",
            report.rows_in,
            report.groups_out,
            output.display()
        );
        Ok(report)
    }

    fn accumulate(
        &self,
        groups: &mut HashMap<GroupKey, Accumulator>,
        header: &Header,
        record: &StringRecord,
        input: &Path,
    ) -> Result<()> {
        let key = GroupKey::from_record(record).ok_or_else(|| PipelineError::MalformedRow {
            path: input.to_path_buf(),
            line: record_line(record),
            reason: format!("expected at least {} fields", KEY_COLUMNS),
        })?;

        let metric_count = header.metric_count();
        let accumulator = groups.entry(key).or_insert_with_key(|key| Accumulator {
            surrogate: key.surrogate(),
            sums: vec![0; metric_count],
        });

        for (slot, field) in record.iter().skip(KEY_COLUMNS).enumerate() {
            let value: i64 = field.trim().parse().map_err(|_| PipelineError::MalformedRow {
                path: input.to_path_buf(),
                line: record_line(record),
                reason: format!(
                    "metric {} value {:?} is not a 64-bit integer",
                    header.metric_columns()[slot],
                    field
                ),
            })?;
            let sum = &mut accumulator.sums[slot];
            *sum = sum
                .checked_add(value)
                .ok_or_else(|| PipelineError::MetricOverflow {
                    key: GroupKey::from_record(record)
                        .map(|k| k.canonical())
                        .unwrap_or_default(),
                    column: header.metric_columns()[slot].clone(),
                })?;
        }
        Ok(())
    }

    /// Write every live group, ordered by surrogate then key, and clear the map
    fn flush(
        &self,
        groups: &mut HashMap<GroupKey, Accumulator>,
        appender: &SharedAppender,
        report: &mut ReduceReport,
    ) -> Result<()> {
        let mut drained: Vec<(GroupKey, Accumulator)> = groups.drain().collect();
        drained.sort_by(|(left_key, left), (right_key, right)| {
            (left.surrogate, left_key).cmp(&(right.surrogate, right_key))
        });

        let rows: Vec<StringRecord> = drained
            .into_iter()
            .map(|(key, accumulator)| {
                let mut row = StringRecord::from(key.fields().to_vec());
                for sum in accumulator.sums {
                    row.push_field(&sum.to_string());
                }
                row
            })
            .collect();

        appender.append_batch(&rows)?;
        report.groups_out += rows.len() as u64;
        report.flushes += 1;
        Ok(())
    }
}

/// Executor for the reduce phase
pub struct ReducePhaseExecutor;

impl ReducePhaseExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ReducePhaseExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PhaseExecutor for ReducePhaseExecutor {
    async fn execute(&self, context: &mut PhaseContext) -> Result<PhaseResult> {
        let start = Instant::now();
        let merged = context.workspace.merged_path();
        let output = context.workspace.output_path().to_path_buf();
        let aggregator = Aggregator::new(&context.config);

        let input = merged.clone();
        let report = tokio::task::spawn_blocking(move || aggregator.aggregate(&input, &output))
            .await
            .map_err(|e| PipelineError::TaskFailed {
                chunk_id: 0,
                reason: format!("reduce task panicked: {}", e),
            })??;

        // Output is complete; nothing is left to resume
        context.store.clear().await?;
        remove_if_present(&merged)?;
        if let Some(manifest) = context.manifest.take() {
            remove_chunk_files(&manifest)?;
        }

        let metrics = PhaseMetrics {
            duration_secs: start.elapsed().as_secs_f64(),
            items_processed: report.rows_in as usize,
            items_skipped: 0,
        };
        context.report.reduce = Some(report);
        Ok(PhaseResult::completed(self.phase_type(), metrics))
    }

    fn phase_type(&self) -> PhaseType {
        PhaseType::Reduce
    }

    /// The merged file must be complete before the reduce starts
    fn validate_context(&self, context: &PhaseContext) -> Result<()> {
        let manifest = context.require_manifest(self.phase_type())?;
        if manifest.stage != PipelineStage::Merged {
            return Err(PipelineError::CheckpointCorrupted {
                path: context.workspace.manifest_path(),
                details: format!("reduce reached with stage {}", manifest.stage),
            });
        }
        Ok(())
    }
}
