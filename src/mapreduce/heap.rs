//! Bounded min-heap used by the k-way merge

use crate::error::{PipelineError, Result};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Min-heap with a fixed capacity
///
/// The merge holds at most one entry per source, so the capacity is the
/// number of sorted files. Pushing past it is a logic error surfaced as
/// [`PipelineError::Capacity`].
#[derive(Debug)]
pub struct MergeHeap<T: Ord> {
    inner: BinaryHeap<Reverse<T>>,
    capacity: usize,
}

impl<T: Ord> MergeHeap<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BinaryHeap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) -> Result<()> {
        if self.inner.len() >= self.capacity {
            return Err(PipelineError::Capacity {
                capacity: self.capacity,
            });
        }
        self.inner.push(Reverse(item));
        Ok(())
    }

    /// Remove and return the smallest entry
    pub fn pop(&mut self) -> Option<T> {
        self.inner.pop().map(|Reverse(item)| item)
    }

    pub fn peek(&self) -> Option<&T> {
        self.inner.peek().map(|Reverse(item)| item)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
