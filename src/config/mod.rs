//! Pipeline configuration
//!
//! Settings are layered: built-in defaults, then a TOML file, then
//! `GROUPSUM_*` environment variables, then command-line flags.

pub mod loader;

pub use loader::{load_config, DEFAULT_CONFIG_FILE};

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ONE_MB: u64 = 1 << 20;

/// Tunables for a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory holding chunk files, sorted files, the merged file and the manifest
    pub work_dir: PathBuf,
    /// Byte threshold at which the splitter closes a chunk
    pub chunk_size_bytes: u64,
    /// Maximum number of chunks sorted concurrently
    pub max_parallel: usize,
    /// Rows buffered by the merge before appending to the merged file
    pub merge_flush_rows: usize,
    /// Live group count above which the reduce stage flushes its accumulators
    pub reduce_flush_groups: usize,
    /// Field delimiter of the input and every intermediate file
    pub delimiter: char,
    pub chunk_prefix: String,
    pub sorted_prefix: String,
    pub extension: String,
    pub manifest_file: String,
    pub merged_file: String,
    /// Final output path; relative paths resolve against the current directory
    pub output_file: PathBuf,
    /// Remove leftovers of an earlier run instead of refusing to start
    pub force: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("groupsum-work"),
            chunk_size_bytes: 5 * ONE_MB,
            max_parallel: 10,
            merge_flush_rows: 250_000,
            reduce_flush_groups: 250_000,
            delimiter: ',',
            chunk_prefix: "input".to_string(),
            sorted_prefix: "sorted".to_string(),
            extension: "csv".to_string(),
            manifest_file: "meta.json".to_string(),
            merged_file: "input-sorted.csv".to_string(),
            output_file: PathBuf::from("output.csv"),
            force: false,
        }
    }
}

impl PipelineConfig {
    /// Configuration rooted at `work_dir`, everything else default
    pub fn with_work_dir(work_dir: impl AsRef<Path>) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Delimiter as the byte the csv reader and writer expect
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter as u8
    }

    /// Apply `GROUPSUM_*` environment overrides
    pub fn merge_env_vars(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("GROUPSUM_WORK_DIR") {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(value) = env_number("GROUPSUM_CHUNK_SIZE")? {
            self.chunk_size_bytes = value;
        }
        if let Some(value) = env_number("GROUPSUM_MAX_PARALLEL")? {
            self.max_parallel = value;
        }
        if let Some(value) = env_number("GROUPSUM_MERGE_FLUSH_ROWS")? {
            self.merge_flush_rows = value;
        }
        if let Some(value) = env_number("GROUPSUM_REDUCE_FLUSH_GROUPS")? {
            self.reduce_flush_groups = value;
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("chunk_size_bytes", self.chunk_size_bytes),
            ("max_parallel", self.max_parallel as u64),
            ("merge_flush_rows", self.merge_flush_rows as u64),
            ("reduce_flush_groups", self.reduce_flush_groups as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        if !self.delimiter.is_ascii() || matches!(self.delimiter, '\n' | '\r' | '"') {
            return Err(invalid(
                "delimiter",
                &format!("{:?} is not a usable single-byte delimiter", self.delimiter),
            ));
        }

        for (field, value) in [
            ("chunk_prefix", &self.chunk_prefix),
            ("sorted_prefix", &self.sorted_prefix),
            ("extension", &self.extension),
            ("manifest_file", &self.manifest_file),
            ("merged_file", &self.merged_file),
        ] {
            if value.is_empty() || value.contains(['/', '\\']) {
                return Err(invalid(field, "must be a non-empty plain file name"));
            }
        }

        if self.chunk_prefix == self.sorted_prefix {
            return Err(invalid(
                "sorted_prefix",
                "must differ from chunk_prefix so sorted files never overwrite chunks",
            ));
        }

        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(name, &format!("{raw:?} is not a valid number"))),
        Err(_) => Ok(None),
    }
}

fn invalid(field: &str, reason: &str) -> PipelineError {
    PipelineError::InvalidConfiguration {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
