//! Ordered task streams and the mutual-exclusion lease that guards them.
//!
//! A [`Sequence`] owns a FIFO queue of tasks and a run lease. The lease is
//! the per-sequence mutual exclusion: at most one worker holds it at any
//! time, which is what makes sequenced execution safe without a global
//! scheduler lock on the hot path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::core::task::{Priority, Task};

static NEXT_SEQUENCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a [`Sequence`], unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceId(u64);

impl SequenceId {
    fn next() -> Self {
        Self(NEXT_SEQUENCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Position of a runnable sequence in the pool-wide queue.
///
/// Ordering is "more urgent is greater": higher priority wins, and between
/// equal priorities the earlier-posted oldest task wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceSortKey {
    priority: Priority,
    enqueue_time: Instant,
}

impl SequenceSortKey {
    pub(crate) fn new(priority: Priority, enqueue_time: Instant) -> Self {
        Self { priority, enqueue_time }
    }

    /// Priority component of the key.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Post time of the oldest pending task when the key was computed.
    #[must_use]
    pub fn enqueue_time(&self) -> Instant {
        self.enqueue_time
    }
}

impl Ord for SequenceSortKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueue_time.cmp(&self.enqueue_time))
    }
}

impl PartialOrd for SequenceSortKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// An ordered stream of tasks that execute one at a time, in post order.
pub struct Sequence {
    id: SequenceId,
    inner: Mutex<SequenceInner>,
}

struct SequenceInner {
    queue: VecDeque<Task>,
    /// Set while exactly one worker owns this sequence for running.
    leased: bool,
}

impl Sequence {
    /// Creates an empty sequence with a fresh id.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: SequenceId::next(),
            inner: Mutex::new(SequenceInner { queue: VecDeque::new(), leased: false }),
        })
    }

    /// Id of this sequence.
    #[must_use]
    pub fn id(&self) -> SequenceId {
        self.id
    }

    /// Number of pending tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// True when no tasks are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a task. Returns true when the sequence just became runnable
    /// and must be pushed onto the pool queue: it had no pending tasks and
    /// no worker holds the lease.
    pub(crate) fn push(&self, task: Task) -> bool {
        let mut inner = self.inner.lock();
        let becomes_runnable = inner.queue.is_empty() && !inner.leased;
        inner.queue.push_back(task);
        becomes_runnable
    }

    /// Sort key derived from the oldest pending task.
    ///
    /// # Panics
    ///
    /// Panics when the sequence is empty; callers only ask for a key while
    /// they know a task is pending.
    pub(crate) fn sort_key(&self) -> SequenceSortKey {
        let inner = self.inner.lock();
        let front = inner.queue.front().expect("sort_key on empty sequence");
        SequenceSortKey::new(front.traits().priority, front.posted_at())
    }

    /// Takes the run lease. Two workers owning one sequence is a bug, not a
    /// runtime condition.
    pub(crate) fn take_lease(&self) {
        let mut inner = self.inner.lock();
        assert!(!inner.leased, "sequence {:?} assigned to two workers", self.id);
        inner.leased = true;
    }

    /// Pops the next task while holding the lease. Releases the lease and
    /// returns `None` once the queue is empty, atomically with the empty
    /// check, so a concurrent post observes either a leased sequence or a
    /// released empty one.
    pub(crate) fn pop_or_release(&self) -> Option<Task> {
        let mut inner = self.inner.lock();
        debug_assert!(inner.leased, "pop without lease");
        let task = inner.queue.pop_front();
        if task.is_none() {
            inner.leased = false;
        }
        task
    }

    /// Releases the lease with tasks still pending when `waiting` outranks
    /// the key of the oldest pending task. Returns the recomputed key to
    /// re-push under, or `None` when yielding is not warranted.
    pub(crate) fn release_if_outranked(&self, waiting: SequenceSortKey) -> Option<SequenceSortKey> {
        let mut inner = self.inner.lock();
        debug_assert!(inner.leased, "release without lease");
        let current = {
            let front = inner.queue.front()?;
            SequenceSortKey::new(front.traits().priority, front.posted_at())
        };
        if waiting <= current {
            return None;
        }
        inner.leased = false;
        Some(current)
    }
}
