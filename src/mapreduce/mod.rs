//! Chunk, sort, merge and reduce engine
//!
//! The input is split into line-aligned chunks, each chunk is sorted by the
//! hash of its grouping fields on a bounded pool, the sorted chunks are
//! merged into one hash-ordered file, and a single pass over that file
//! produces one row of sums per group. Progress is checkpointed per chunk so
//! an interrupted run can resume.

pub mod appender;
pub mod checkpoint;
pub mod heap;
pub mod phases;
pub mod record;
pub mod workspace;

pub use appender::SharedAppender;
pub use checkpoint::{
    CheckpointStorage, CheckpointStore, ChunkMeta, FileCheckpointStorage, Manifest, PipelineStage,
};
pub use heap::MergeHeap;
pub use phases::{
    Aggregator, ChunkProcessor, MapReport, MergeCombiner, MergeReport, Pipeline, PipelineReport,
    ReduceReport, SplitOutcome, SplitReport, Splitter,
};
pub use record::{fnv1a_64, GroupKey, HashSurrogate, Header, KEY_COLUMNS};
pub use workspace::Workspace;
