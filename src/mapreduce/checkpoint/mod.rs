//! Durable progress tracking for resumable runs
//!
//! The manifest lists every chunk and whether its sorted file is complete.
//! It is written once after the split and then rewritten whole each time a
//! chunk finishes, so a crashed run can pick up with only the unfinished
//! chunks.

pub mod storage;
pub mod store;
pub mod types;

pub use storage::{CheckpointStorage, FileCheckpointStorage};
pub use store::CheckpointStore;
pub use types::{ChunkMeta, Manifest, PipelineStage};
