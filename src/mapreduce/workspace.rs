//! Locations of every intermediate file a run produces

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves chunk, sorted, merged and manifest paths under the work directory
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    chunk_prefix: String,
    sorted_prefix: String,
    extension: String,
    manifest_file: String,
    merged_file: String,
    output: PathBuf,
}

impl Workspace {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            root: config.work_dir.clone(),
            chunk_prefix: config.chunk_prefix.clone(),
            sorted_prefix: config.sorted_prefix.clone(),
            extension: config.extension.clone(),
            manifest_file: config.manifest_file.clone(),
            merged_file: config.merged_file.clone(),
            output: config.output_file.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<work_dir>/<chunk_prefix><id>.<ext>`
    pub fn chunk_path(&self, id: u32) -> PathBuf {
        self.root
            .join(format!("{}{}.{}", self.chunk_prefix, id, self.extension))
    }

    /// `<work_dir>/<sorted_prefix><id>.<ext>`
    pub fn sorted_path(&self, id: u32) -> PathBuf {
        self.root
            .join(format!("{}{}.{}", self.sorted_prefix, id, self.extension))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.manifest_file)
    }

    pub fn merged_path(&self) -> PathBuf {
        self.root.join(&self.merged_file)
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Create the work directory if needed
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| PipelineError::io(&self.root, e))
    }

    /// Chunk, sorted and merged files left behind by an earlier run
    ///
    /// The manifest is not included; it is reported separately by the
    /// checkpoint store.
    pub fn leftovers(&self) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for prefix in [&self.chunk_prefix, &self.sorted_prefix] {
            found.extend(self.numbered_files(prefix)?);
        }

        let merged = self.merged_path();
        if merged.exists() {
            found.push(merged);
        }
        found.sort();
        Ok(found)
    }

    /// Remove leftovers and the manifest; returns what was removed
    pub fn clean(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        let manifest = self.manifest_path();
        let targets = self
            .leftovers()?
            .into_iter()
            .chain(manifest.exists().then_some(manifest));

        for path in targets {
            remove_if_present(&path)?;
            debug!("Removed {}", path.display());
            removed.push(path);
        }
        Ok(removed)
    }

    fn numbered_files(&self, prefix: &str) -> Result<Vec<PathBuf>> {
        let pattern = format!(
            "{}/{}[0-9]*.{}",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            glob::Pattern::escape(prefix),
            glob::Pattern::escape(&self.extension)
        );
        let paths = glob::glob(&pattern).map_err(|e| PipelineError::InvalidConfiguration {
            field: "work_dir".to_string(),
            reason: e.to_string(),
        })?;

        let mut files = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| {
                let path = e.path().to_path_buf();
                PipelineError::io(path, e.into_error())
            })?;
            if self.is_numbered(&path, prefix) {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// `[0-9]*` in glob also matches `input1x.csv`; require digits only
    fn is_numbered(&self, path: &Path, prefix: &str) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(prefix))
            .and_then(|rest| rest.strip_suffix(&format!(".{}", self.extension)))
            .is_some_and(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
    }
}

/// Delete a file, treating "already gone" as success
pub(crate) fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::io(path, e)),
    }
}
