//! In-memory completion tracker, the default shutdown collaborator.

use parking_lot::{Condvar, Mutex};

use crate::core::hooks::ShutdownTracker;

/// Counts admitted and completed tasks and answers shutdown queries.
///
/// A deliberately small stand-in for a real shutdown service: admission is
/// denied once [`begin_shutdown`](CompletionTracker::begin_shutdown) has
/// been called, and [`flush`](CompletionTracker::flush) blocks until every
/// previously-admitted task has finished running.
pub struct CompletionTracker {
    state: Mutex<TrackerState>,
    flushed: Condvar,
}

#[derive(Default)]
struct TrackerState {
    shutdown: bool,
    admitted: u64,
    completed: u64,
}

impl CompletionTracker {
    /// New tracker with no admitted tasks.
    #[must_use]
    pub fn new() -> Self {
        Self { state: Mutex::new(TrackerState::default()), flushed: Condvar::new() }
    }

    /// Denies all future admissions.
    pub fn begin_shutdown(&self) {
        self.state.lock().shutdown = true;
    }

    /// Blocks until every admitted task has completed.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        while state.completed < state.admitted {
            self.flushed.wait(&mut state);
        }
    }

    /// Number of tasks admitted so far.
    #[must_use]
    pub fn num_admitted(&self) -> u64 {
        self.state.lock().admitted
    }

    /// Number of tasks completed so far.
    #[must_use]
    pub fn num_completed(&self) -> u64 {
        self.state.lock().completed
    }
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownTracker for CompletionTracker {
    fn will_post_task(&self) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            return false;
        }
        state.admitted += 1;
        true
    }

    fn did_run_task(&self) {
        let mut state = self.state.lock();
        state.completed += 1;
        if state.completed >= state.admitted {
            self.flushed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_admission_counts() {
        let tracker = CompletionTracker::new();
        assert!(tracker.will_post_task());
        assert!(tracker.will_post_task());
        assert_eq!(tracker.num_admitted(), 2);
        tracker.did_run_task();
        assert_eq!(tracker.num_completed(), 1);
    }

    #[test]
    fn test_shutdown_denies_admission() {
        let tracker = CompletionTracker::new();
        tracker.begin_shutdown();
        assert!(!tracker.will_post_task());
        assert_eq!(tracker.num_admitted(), 0);
    }

    #[test]
    fn test_flush_waits_for_completion() {
        let tracker = Arc::new(CompletionTracker::new());
        assert!(tracker.will_post_task());

        let completer = Arc::clone(&tracker);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completer.did_run_task();
        });

        // Returns only after the spawned completion lands.
        tracker.flush();
        assert_eq!(tracker.num_completed(), 1);
        handle.join().expect("completer thread");
    }

    #[test]
    fn test_flush_with_nothing_admitted_returns() {
        CompletionTracker::new().flush();
    }
}
