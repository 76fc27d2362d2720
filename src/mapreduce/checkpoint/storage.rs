//! Manifest storage backends

use super::types::Manifest;
use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::trace;

/// Trait for manifest storage implementations
#[async_trait::async_trait]
pub trait CheckpointStorage: Send + Sync {
    /// Read the manifest; `None` when none has been written
    async fn load(&self) -> Result<Option<Manifest>>;
    /// Replace the manifest as a whole
    async fn save(&self, manifest: &Manifest) -> Result<()>;
    /// Remove the manifest if present
    async fn delete(&self) -> Result<()>;
    /// Where the manifest lives, for messages
    fn location(&self) -> &Path;
}

/// JSON file storage with write-to-temp then rename
pub struct FileCheckpointStorage {
    path: PathBuf,
}

impl FileCheckpointStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn persist_failed(&self, source: std::io::Error) -> PipelineError {
        PipelineError::CheckpointPersistFailed {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait::async_trait]
impl CheckpointStorage for FileCheckpointStorage {
    async fn load(&self) -> Result<Option<Manifest>> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::io(&self.path, e)),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| PipelineError::CheckpointCorrupted {
                path: self.path.clone(),
                details: e.to_string(),
            })
    }

    async fn save(&self, manifest: &Manifest) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.persist_failed(e))?;
        }

        let json = serde_json::to_vec_pretty(manifest).map_err(|e| {
            self.persist_failed(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        // Readers see either the old manifest or the new one, never a torn write
        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| self.persist_failed(e))?;
        file.write_all(&json)
            .await
            .map_err(|e| self.persist_failed(e))?;
        file.sync_all().await.map_err(|e| self.persist_failed(e))?;
        drop(file);
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| self.persist_failed(e))?;

        trace!(
            "Saved manifest {} ({}/{} chunks processed)",
            self.path.display(),
            manifest.completed_count(),
            manifest.chunks_meta.len()
        );
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::io(&self.path, e)),
        }
    }

    fn location(&self) -> &Path {
        &self.path
    }
}
