//! Pool-wide priority queue of runnable sequences.
//!
//! Holds every sequence that has pending work and no worker. Lives inside
//! the pool lock; it has no synchronization of its own.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::core::sequence::{Sequence, SequenceSortKey};

pub(crate) struct RunnableQueue {
    heap: BinaryHeap<Entry>,
}

struct Entry {
    key: SequenceSortKey,
    sequence: Arc<Sequence>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl RunnableQueue {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new() }
    }

    /// Pushes a sequence under the given sort key. The key is computed by
    /// the caller while it can still see the sequence's oldest task.
    pub fn push(&mut self, sequence: Arc<Sequence>, key: SequenceSortKey) {
        self.heap.push(Entry { key, sequence });
    }

    /// Removes and returns the most urgent sequence.
    pub fn pop(&mut self) -> Option<Arc<Sequence>> {
        self.heap.pop().map(|entry| entry.sequence)
    }

    /// Sort key of the most urgent sequence, without removing it.
    pub fn peek_key(&self) -> Option<SequenceSortKey> {
        self.heap.peek().map(|entry| entry.key)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
