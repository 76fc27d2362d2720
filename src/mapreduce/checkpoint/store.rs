//! Lock-owning checkpoint service

use super::storage::{CheckpointStorage, FileCheckpointStorage};
use super::types::{Manifest, PipelineStage};
use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Owns the manifest for a run and serializes every read-modify-write of it
///
/// All mutations go through one exclusive lock, so concurrent map tasks
/// completing at the same time never lose each other's updates.
pub struct CheckpointStore {
    storage: Box<dyn CheckpointStorage>,
    lock: Mutex<()>,
}

impl CheckpointStore {
    pub fn new(storage: Box<dyn CheckpointStorage>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    /// Store backed by a JSON file at `path`
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(FileCheckpointStorage::new(path)))
    }

    pub fn location(&self) -> &Path {
        self.storage.location()
    }

    /// Load the manifest, treating a corrupt one as absent
    pub async fn load_state(&self) -> Result<Option<Manifest>> {
        match self.load_strict().await {
            Err(PipelineError::CheckpointCorrupted { path, details }) => {
                warn!(
                    "Ignoring unreadable checkpoint {}: {}",
                    path.display(),
                    details
                );
                Ok(None)
            }
            other => other,
        }
    }

    /// Load the manifest, reporting corruption as an error
    pub async fn load_strict(&self) -> Result<Option<Manifest>> {
        let _guard = self.lock.lock().await;
        self.storage.load().await
    }

    /// Write the whole manifest
    pub async fn persist(&self, manifest: &Manifest) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.storage.save(manifest).await
    }

    /// Durably flip one chunk's `processed` flag
    pub async fn mark_complete(&self, chunk_id: u32) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut manifest = self.require_manifest().await?;

        let chunk = manifest
            .chunk_mut(chunk_id)
            .ok_or_else(|| PipelineError::CheckpointCorrupted {
                path: self.location().to_path_buf(),
                details: format!("chunk {} is not in the manifest", chunk_id),
            })?;
        if chunk.processed {
            warn!("Chunk {} was already marked complete", chunk_id);
            return Ok(());
        }
        chunk.processed = true;

        self.storage.save(&manifest).await?;
        debug!(
            "Checkpointed chunk {} ({}/{} complete)",
            chunk_id,
            manifest.completed_count(),
            manifest.chunks_meta.len()
        );
        Ok(())
    }

    /// Record a new pipeline stage
    pub async fn set_stage(&self, stage: PipelineStage) -> Result<Manifest> {
        let _guard = self.lock.lock().await;
        let mut manifest = self.require_manifest().await?;
        if manifest.stage != stage {
            manifest.stage = stage;
            self.storage.save(&manifest).await?;
            debug!("Checkpoint stage is now {}", stage);
        }
        Ok(manifest)
    }

    /// Remove the manifest after a successful run
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.storage.delete().await
    }

    async fn require_manifest(&self) -> Result<Manifest> {
        self.storage
            .load()
            .await?
            .ok_or_else(|| PipelineError::CheckpointCorrupted {
                path: self.location().to_path_buf(),
                details: "manifest disappeared during the run".to_string(),
            })
    }
}
