//! Contracts the pool consumes from external collaborators.
//!
//! The pool core does not implement shutdown bookkeeping, delayed-task
//! timing, or metrics forwarding itself; it calls through these traits.
//! Default in-crate implementations live under [`crate::infra`].

use std::time::Duration;

/// Shutdown/completion tracker consulted on every post and completion.
pub trait ShutdownTracker: Send + Sync + 'static {
    /// Called before a task is admitted. Returning false means the system
    /// is shutting down and the post must be rejected.
    ///
    /// Invoked under the pool's internal lock; implementations must be
    /// cheap and must not call back into the pool.
    fn will_post_task(&self) -> bool;

    /// Called after an admitted task's body has finished running.
    fn did_run_task(&self);
}

/// Timer service for delayed posts.
pub trait DelayedDispatcher: Send + Sync + 'static {
    /// Invokes `post` no earlier than `delay` from now, on an unspecified
    /// thread. The callback re-enters the pool as an ordinary zero-delay
    /// post, so a pool that has shut down in the meantime rejects it there.
    fn schedule(&self, delay: Duration, post: Box<dyn FnOnce() + Send + 'static>);
}

/// Receiver for the pool's two histogram-style worker events.
pub trait MetricsSink: Send + Sync + 'static {
    /// Tasks a worker ran between two consecutive idle waits, reported each
    /// time the worker parks on the idle stack.
    fn record_tasks_between_waits(&self, count: u64);

    /// Tasks a worker ran over its lifetime, reported when it retires.
    fn record_tasks_before_detach(&self, count: u64);
}
