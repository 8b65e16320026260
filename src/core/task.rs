//! Task payloads and the caller-declared traits that drive scheduling.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Scheduling priority, used as the first component of a sequence's sort
/// key. Higher priorities are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Best-effort work, runs after everything else.
    Background,
    /// Default priority for user-visible work.
    Normal,
    /// Latency-sensitive work, runs first.
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Properties a caller declares about a task at post time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskTraits {
    /// Queue-ordering priority.
    pub priority: Priority,
    /// Whether the task body may enter a [`ScopedBlockingCall`].
    ///
    /// [`ScopedBlockingCall`]: crate::core::blocking::ScopedBlockingCall
    pub may_block: bool,
}

impl TaskTraits {
    /// Traits with the given priority and no blocking intent.
    #[must_use]
    pub fn with_priority(priority: Priority) -> Self {
        Self { priority, may_block: false }
    }

    /// Marks the task as one that may use blocking primitives.
    #[must_use]
    pub const fn may_block(mut self) -> Self {
        self.may_block = true;
        self
    }
}

/// A single unit of work submitted for execution.
///
/// A task is immutable once posted: its body, traits, delay, and post
/// timestamp are fixed at construction.
pub struct Task {
    body: Box<dyn FnOnce() + Send + 'static>,
    traits: TaskTraits,
    delay: Duration,
    posted_at: Instant,
}

impl Task {
    /// Wraps a closure as a task with the given traits.
    pub fn new(traits: TaskTraits, body: impl FnOnce() + Send + 'static) -> Self {
        Self {
            body: Box::new(body),
            traits,
            delay: Duration::ZERO,
            posted_at: Instant::now(),
        }
    }

    /// Traits declared at post time.
    #[must_use]
    pub fn traits(&self) -> TaskTraits {
        self.traits
    }

    /// Delay requested at post time.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Instant the task was posted (or came due, for delayed tasks).
    #[must_use]
    pub fn posted_at(&self) -> Instant {
        self.posted_at
    }

    /// Requests that the task run no earlier than `delay` from now.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Re-stamps the task as an immediate post. Called when a delayed task
    /// comes due and re-enters the post path, so its sort position reflects
    /// the due time rather than the original post time.
    pub(crate) fn into_immediate(mut self) -> Self {
        self.delay = Duration::ZERO;
        self.posted_at = Instant::now();
        self
    }

    /// Consumes the task and runs its body.
    pub(crate) fn run(self) {
        (self.body)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("traits", &self.traits)
            .field("delay", &self.delay)
            .field("posted_at", &self.posted_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Background);
    }

    #[test]
    fn test_traits_builders() {
        let traits = TaskTraits::with_priority(Priority::High).may_block();
        assert_eq!(traits.priority, Priority::High);
        assert!(traits.may_block);
        assert_eq!(TaskTraits::default().priority, Priority::Normal);
    }

    #[test]
    fn test_task_runs_body_once() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let counter = Arc::new(AtomicU32::new(0));
        let counter_in_task = Arc::clone(&counter);
        let task = Task::new(TaskTraits::default(), move || {
            counter_in_task.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(task.delay(), Duration::ZERO);
        task.run();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_into_immediate_restamps() {
        let task = Task::new(TaskTraits::default(), || {}).with_delay(Duration::from_millis(50));
        assert_eq!(task.delay(), Duration::from_millis(50));
        let before = Instant::now();
        let task = task.into_immediate();
        assert_eq!(task.delay(), Duration::ZERO);
        assert!(task.posted_at() >= before);
    }
}
