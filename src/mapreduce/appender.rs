//! Batched, header-once CSV appends shared between writers

use super::record::Header;
use crate::error::{PipelineError, Result};
use csv::{StringRecord, Writer, WriterBuilder};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::trace;

/// Append target for the merged and output files
///
/// Creating the appender truncates the file and writes the header, so the
/// header appears exactly once no matter how many batches follow. Each batch
/// is written under the lock and flushed before it is released, so rows from
/// concurrent callers never interleave mid-row.
pub struct SharedAppender {
    path: PathBuf,
    writer: Mutex<Writer<BufWriter<File>>>,
    rows: AtomicU64,
}

impl SharedAppender {
    pub fn create(path: impl Into<PathBuf>, header: &Header, delimiter: u8) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }

        let file = File::create(&path).map_err(|e| PipelineError::io(&path, e))?;
        let mut writer = WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(BufWriter::new(file));
        writer
            .write_record(&header.to_record())
            .map_err(|e| PipelineError::csv(&path, e))?;
        writer.flush().map_err(|e| PipelineError::io(&path, e))?;

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            rows: AtomicU64::new(0),
        })
    }

    /// Write every row of the batch and flush
    pub fn append_batch(&self, rows: &[StringRecord]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for row in rows {
            writer
                .write_record(row)
                .map_err(|e| PipelineError::csv(&self.path, e))?;
        }
        writer
            .flush()
            .map_err(|e| PipelineError::io(&self.path, e))?;

        let total = self.rows.fetch_add(rows.len() as u64, Ordering::Relaxed) + rows.len() as u64;
        trace!("Appended {} rows to {} ({} total)", rows.len(), self.path.display(), total);
        Ok(())
    }

    /// Flush and fsync the file
    pub fn sync(&self) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer
            .flush()
            .map_err(|e| PipelineError::io(&self.path, e))?;
        writer
            .get_ref()
            .get_ref()
            .sync_all()
            .map_err(|e| PipelineError::io(&self.path, e))
    }

    /// Data rows appended so far, header excluded
    pub fn rows_written(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
