//! Split phase: cut the input into line-aligned chunk files

use super::{PhaseContext, PhaseExecutor, PhaseMetrics, PhaseResult, PhaseType};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::mapreduce::checkpoint::{ChunkMeta, Manifest};
use crate::mapreduce::record::Header;
use crate::mapreduce::workspace::Workspace;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Totals from a split
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitReport {
    pub chunks: usize,
    pub rows: u64,
    /// Data bytes written, headers excluded
    pub bytes: u64,
}

/// Everything the split produced
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    pub header: Header,
    pub chunks: Vec<ChunkMeta>,
    pub report: SplitReport,
}

/// Line-aligned chunker
///
/// Whole lines are accumulated until the buffered data reaches the byte
/// threshold, then the buffer is written out behind a copy of the header.
/// A line is never cut, so one oversized row becomes one oversized chunk.
pub struct Splitter {
    workspace: Workspace,
    threshold: u64,
    delimiter: u8,
}

impl Splitter {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            workspace: Workspace::from_config(config),
            threshold: config.chunk_size_bytes,
            delimiter: config.delimiter_byte(),
        }
    }

    pub fn split(&self, input: &Path) -> Result<SplitOutcome> {
        let file = File::open(input).map_err(|e| PipelineError::io(input, e))?;
        let mut reader = BufReader::new(file);

        let mut header_line = Vec::new();
        let read = reader
            .read_until(b'\n', &mut header_line)
            .map_err(|e| PipelineError::io(input, e))?;
        if read == 0 || is_blank(&header_line) {
            return Err(PipelineError::MissingHeader {
                path: input.to_path_buf(),
            });
        }
        terminate(&mut header_line);
        let header = self.parse_header(&header_line, input)?;

        self.workspace.ensure()?;

        let mut chunks = Vec::new();
        let mut report = SplitReport::default();
        let mut buffer = header_line.clone();
        let mut buffered_rows = 0u64;
        let mut line = Vec::new();

        loop {
            line.clear();
            let read = reader
                .read_until(b'\n', &mut line)
                .map_err(|e| PipelineError::io(input, e))?;
            if read == 0 {
                break;
            }
            if is_blank(&line) {
                continue;
            }
            terminate(&mut line);
            buffer.extend_from_slice(&line);
            buffered_rows += 1;

            let data_len = (buffer.len() - header_line.len()) as u64;
            if data_len >= self.threshold {
                chunks.push(self.flush(&mut buffer, &header_line, &mut report, buffered_rows)?);
                buffered_rows = 0;
            }
        }
        if buffered_rows > 0 {
            chunks.push(self.flush(&mut buffer, &header_line, &mut report, buffered_rows)?);
        }

        info!(
            "Split {} into {} chunks ({} rows)",
            input.display(),
            report.chunks,
            report.rows
        );
        Ok(SplitOutcome {
            header,
            chunks,
            report,
        })
    }

    fn parse_header(&self, line: &[u8], input: &Path) -> Result<Header> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(self.delimiter)
            .from_reader(line);
        let mut record = csv::StringRecord::new();
        let found = reader
            .read_record(&mut record)
            .map_err(|e| PipelineError::csv(input, e))?;
        if !found {
            return Err(PipelineError::MissingHeader {
                path: input.to_path_buf(),
            });
        }
        Header::from_record(&record, input)
    }

    fn flush(
        &self,
        buffer: &mut Vec<u8>,
        header_line: &[u8],
        report: &mut SplitReport,
        rows: u64,
    ) -> Result<ChunkMeta> {
        let id = report.chunks as u32 + 1;
        let input_file = self.workspace.chunk_path(id);
        std::fs::write(&input_file, &buffer[..]).map_err(|e| PipelineError::io(&input_file, e))?;

        let data_len = (buffer.len() - header_line.len()) as u64;
        debug!(
            "Wrote chunk {} with {} rows ({} bytes) to {}",
            id,
            rows,
            data_len,
            input_file.display()
        );

        report.chunks += 1;
        report.rows += rows;
        report.bytes += data_len;
        buffer.truncate(header_line.len());

        Ok(ChunkMeta {
            id,
            processed: false,
            input_file,
            sorted_file: self.workspace.sorted_path(id),
        })
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| matches!(b, b'\n' | b'\r'))
}

fn terminate(line: &mut Vec<u8>) {
    if !line.ends_with(b"\n") {
        line.push(b'\n');
    }
}

/// Executor for the split phase
pub struct SplitPhaseExecutor;

impl SplitPhaseExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SplitPhaseExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PhaseExecutor for SplitPhaseExecutor {
    async fn execute(&self, context: &mut PhaseContext) -> Result<PhaseResult> {
        let start = Instant::now();
        let splitter = Splitter::new(&context.config);
        let input: PathBuf = context.input.clone();

        let outcome = tokio::task::spawn_blocking(move || splitter.split(&input))
            .await
            .map_err(|e| PipelineError::TaskFailed {
                chunk_id: 0,
                reason: format!("split task panicked: {}", e),
            })??;

        let manifest = Manifest::new(
            context.input.clone(),
            outcome.header.columns().to_vec(),
            context.config.chunk_size_bytes,
            outcome.chunks,
        );
        context.store.persist(&manifest).await?;
        context.manifest = Some(manifest);

        let metrics = PhaseMetrics {
            duration_secs: start.elapsed().as_secs_f64(),
            items_processed: outcome.report.chunks,
            items_skipped: 0,
        };
        context.report.split = Some(outcome.report);
        Ok(PhaseResult::completed(self.phase_type(), metrics))
    }

    fn phase_type(&self) -> PhaseType {
        PhaseType::Split
    }

    /// A loaded manifest means the split already finished
    fn can_skip(&self, context: &PhaseContext) -> bool {
        context.manifest.is_some()
    }

    fn validate_context(&self, context: &PhaseContext) -> Result<()> {
        if !context.input.is_file() {
            return Err(PipelineError::io(
                &context.input,
                std::io::Error::new(std::io::ErrorKind::NotFound, "input file not found"),
            ));
        }
        Ok(())
    }
}
