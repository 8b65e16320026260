//! Caller-declared blocking scopes and the capacity growth they trigger.
//!
//! A task that is about to block on an external OS call wraps the call in a
//! [`ScopedBlockingCall`]. Construction notifies the owning pool, which
//! raises its worker capacity by one so CPU-bound work elsewhere is not
//! starved while this thread waits; dropping the guard lowers it again.
//! The guard notifies on every exit path, including unwinding.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use crate::core::pool::PoolInner;

thread_local! {
    /// Pool owning the current worker thread, registered for the lifetime
    /// of the worker's run loop.
    static CURRENT_POOL: RefCell<Option<Arc<PoolInner>>> = const { RefCell::new(None) };
    /// Whether this thread is already inside a blocking scope. The counter
    /// tracks blocked workers, not guard objects, so nested scopes must
    /// not double-count.
    static IN_BLOCKING_SCOPE: Cell<bool> = const { Cell::new(false) };
}

/// RAII registration of a worker thread with its owning pool. Held by the
/// worker run loop for the lifetime of the thread.
pub(crate) struct PoolThreadRegistration;

impl PoolThreadRegistration {
    pub fn register(pool: Arc<PoolInner>) -> Self {
        CURRENT_POOL.with(|current| *current.borrow_mut() = Some(pool));
        Self
    }
}

impl Drop for PoolThreadRegistration {
    fn drop(&mut self) {
        CURRENT_POOL.with(|current| current.borrow_mut().take());
    }
}

/// Declares that the enclosed code may block on an external OS call.
///
/// On a thread not owned by a pool, and for scopes nested inside another
/// scope on the same thread, the guard is a no-op.
pub struct ScopedBlockingCall {
    pool: Option<Arc<PoolInner>>,
    outermost: bool,
}

impl ScopedBlockingCall {
    /// Enters a blocking scope on the calling thread.
    #[must_use]
    pub fn new() -> Self {
        let outermost = !IN_BLOCKING_SCOPE.with(Cell::get);
        if !outermost {
            return Self { pool: None, outermost: false };
        }
        IN_BLOCKING_SCOPE.with(|flag| flag.set(true));
        let pool = CURRENT_POOL.with(|current| current.borrow().clone());
        if let Some(pool) = &pool {
            pool.blocking_scope_entered();
        }
        Self { pool, outermost: true }
    }
}

impl Default for ScopedBlockingCall {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopedBlockingCall {
    fn drop(&mut self) {
        if !self.outermost {
            return;
        }
        IN_BLOCKING_SCOPE.with(|flag| flag.set(false));
        if let Some(pool) = self.pool.take() {
            pool.blocking_scope_exited();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_outside_pool_thread() {
        // No pool registered on this thread: construction and drop must not
        // panic or deadlock.
        let guard = ScopedBlockingCall::new();
        assert!(guard.pool.is_none());
        drop(guard);
    }

    #[test]
    fn test_nested_scopes_count_once() {
        let outer = ScopedBlockingCall::new();
        let inner = ScopedBlockingCall::new();
        assert!(outer.outermost);
        assert!(!inner.outermost);
        drop(inner);
        // The outer scope is still marked on the thread.
        assert!(IN_BLOCKING_SCOPE.with(Cell::get));
        drop(outer);
        assert!(!IN_BLOCKING_SCOPE.with(Cell::get));
    }
}
