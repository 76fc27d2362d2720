//! Manifest data persisted between runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Progress record for one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMeta {
    /// 1-based chunk id, in split order
    pub id: u32,
    /// Whether the sorted file for this chunk is complete
    pub processed: bool,
    pub input_file: PathBuf,
    pub sorted_file: PathBuf,
}

/// Last durable milestone of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    /// Chunks exist; some may still need sorting
    #[default]
    Mapping,
    /// The merged file is complete; only the reduce remains
    Merged,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Mapping => write!(f, "mapping"),
            PipelineStage::Merged => write!(f, "merged"),
        }
    }
}

/// The `meta.json` manifest written after the split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Byte threshold the chunks were split with
    pub chunk_size: u64,
    /// Input file the chunks were split from
    pub source: PathBuf,
    /// Header row of the input
    pub header: Vec<String>,
    #[serde(default)]
    pub stage: PipelineStage,
    pub created_at: DateTime<Utc>,
    pub chunks_meta: Vec<ChunkMeta>,
}

impl Manifest {
    pub fn new(
        source: PathBuf,
        header: Vec<String>,
        chunk_size: u64,
        chunks_meta: Vec<ChunkMeta>,
    ) -> Self {
        Self {
            chunk_size,
            source,
            header,
            stage: PipelineStage::Mapping,
            created_at: Utc::now(),
            chunks_meta,
        }
    }

    /// Chunks whose sorted file is not complete yet
    pub fn pending(&self) -> impl Iterator<Item = &ChunkMeta> {
        self.chunks_meta.iter().filter(|chunk| !chunk.processed)
    }

    /// True while any chunk still needs sorting
    pub fn is_processing_pending(&self) -> bool {
        self.pending().next().is_some()
    }

    pub fn completed_count(&self) -> usize {
        self.chunks_meta.iter().filter(|chunk| chunk.processed).count()
    }

    pub fn chunk_mut(&mut self, id: u32) -> Option<&mut ChunkMeta> {
        self.chunks_meta.iter_mut().find(|chunk| chunk.id == id)
    }
}
