//! Task-runner front ends and the per-thread execution context.
//!
//! Both runner flavors implement one [`TaskRunner`] interface; they differ
//! only in whether a post allocates a fresh sequence (parallel) or funnels
//! through one shared sequence (sequenced).

use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::PoolError;
use crate::core::pool::PoolInner;
use crate::core::sequence::{Sequence, SequenceId};
use crate::core::task::{Task, TaskTraits};

thread_local! {
    /// `(pool id, sequence id)` of the task currently running on this
    /// thread. Set around each task invocation by the worker run loop;
    /// never read from another thread.
    static CURRENT_TASK_CONTEXT: Cell<Option<(u64, SequenceId)>> = const { Cell::new(None) };
}

/// RAII guard binding the calling thread to a sequence for one task run.
pub(crate) struct TaskContextGuard {
    previous: Option<(u64, SequenceId)>,
}

impl TaskContextGuard {
    pub fn enter(pool_id: u64, sequence_id: SequenceId) -> Self {
        let previous =
            CURRENT_TASK_CONTEXT.with(|context| context.replace(Some((pool_id, sequence_id))));
        Self { previous }
    }
}

impl Drop for TaskContextGuard {
    fn drop(&mut self) {
        CURRENT_TASK_CONTEXT.with(|context| context.set(self.previous));
    }
}

fn current_pool_id() -> Option<u64> {
    CURRENT_TASK_CONTEXT.with(Cell::get).map(|(pool, _)| pool)
}

fn current_sequence_id() -> Option<SequenceId> {
    CURRENT_TASK_CONTEXT.with(Cell::get).map(|(_, sequence)| sequence)
}

/// Handle for posting tasks into a pool.
///
/// Handles are shared references: they enqueue into the pool but own
/// nothing, and they outlive neither the semantics nor the rejection
/// behavior of the pool they came from.
pub trait TaskRunner: Send + Sync {
    /// Posts a closure for asynchronous execution. Returns the rejection
    /// signal once the pool has been told to shut down.
    ///
    /// # Errors
    ///
    /// [`PoolError::ShuttingDown`] when the post was not admitted.
    fn post(&self, body: Box<dyn FnOnce() + Send + 'static>) -> Result<(), PoolError>;

    /// Posts a closure to run no earlier than `delay` from now.
    ///
    /// # Errors
    ///
    /// [`PoolError::ShuttingDown`] when the post was not admitted.
    fn post_delayed(
        &self,
        body: Box<dyn FnOnce() + Send + 'static>,
        delay: Duration,
    ) -> Result<(), PoolError>;

    /// Whether the calling thread is currently running tasks posted through
    /// this runner's sequence. For parallel runners this degenerates to
    /// "is the calling thread a worker of this runner's pool".
    fn runs_tasks_in_current_sequence(&self) -> bool;
}

/// Runner that gives every posted task its own fresh sequence, so tasks
/// run unordered and in parallel up to the pool's capacity.
pub struct ParallelTaskRunner {
    pool: Arc<PoolInner>,
    traits: TaskTraits,
}

impl ParallelTaskRunner {
    pub(crate) fn new(pool: Arc<PoolInner>, traits: TaskTraits) -> Self {
        Self { pool, traits }
    }
}

impl TaskRunner for ParallelTaskRunner {
    fn post(&self, body: Box<dyn FnOnce() + Send + 'static>) -> Result<(), PoolError> {
        let sequence = Sequence::new();
        self.pool.post_task_with_sequence(Task::new(self.traits, body), &sequence)
    }

    fn post_delayed(
        &self,
        body: Box<dyn FnOnce() + Send + 'static>,
        delay: Duration,
    ) -> Result<(), PoolError> {
        let sequence = Sequence::new();
        self.pool
            .post_task_with_sequence(Task::new(self.traits, body).with_delay(delay), &sequence)
    }

    fn runs_tasks_in_current_sequence(&self) -> bool {
        current_pool_id() == Some(self.pool.pool_id())
    }
}

/// Runner that funnels every posted task through one shared sequence, so
/// tasks run one at a time, in post order.
pub struct SequencedTaskRunner {
    pool: Arc<PoolInner>,
    traits: TaskTraits,
    sequence: Arc<Sequence>,
}

impl SequencedTaskRunner {
    pub(crate) fn new(pool: Arc<PoolInner>, traits: TaskTraits) -> Self {
        Self { pool, traits, sequence: Sequence::new() }
    }

    /// Id of the sequence this runner posts to.
    #[must_use]
    pub fn sequence_id(&self) -> SequenceId {
        self.sequence.id()
    }
}

impl TaskRunner for SequencedTaskRunner {
    fn post(&self, body: Box<dyn FnOnce() + Send + 'static>) -> Result<(), PoolError> {
        self.pool.post_task_with_sequence(Task::new(self.traits, body), &self.sequence)
    }

    fn post_delayed(
        &self,
        body: Box<dyn FnOnce() + Send + 'static>,
        delay: Duration,
    ) -> Result<(), PoolError> {
        self.pool
            .post_task_with_sequence(Task::new(self.traits, body).with_delay(delay), &self.sequence)
    }

    fn runs_tasks_in_current_sequence(&self) -> bool {
        current_sequence_id() == Some(self.sequence.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_guard_sets_and_restores() {
        let sequence = Sequence::new();
        assert!(current_sequence_id().is_none());
        {
            let _guard = TaskContextGuard::enter(7, sequence.id());
            assert_eq!(current_pool_id(), Some(7));
            assert_eq!(current_sequence_id(), Some(sequence.id()));
        }
        assert!(current_pool_id().is_none());
        assert!(current_sequence_id().is_none());
    }

    #[test]
    fn test_context_guard_nests() {
        let outer = Sequence::new();
        let inner = Sequence::new();
        let _outer_guard = TaskContextGuard::enter(1, outer.id());
        {
            let _inner_guard = TaskContextGuard::enter(1, inner.id());
            assert_eq!(current_sequence_id(), Some(inner.id()));
        }
        assert_eq!(current_sequence_id(), Some(outer.id()));
    }
}
