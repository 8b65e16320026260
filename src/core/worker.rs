//! Per-worker state: the private wait slot and run counters.
//!
//! A worker's thread parks on its own mutex/condvar pair rather than a
//! shared one, so waking the most-recently-idle worker never disturbs the
//! others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Why a parked worker stopped waiting.
pub(crate) enum WakeReason {
    /// [`Worker::wake`] was called; the worker was popped off the idle
    /// stack by whoever signaled.
    Signaled,
    /// The idle-reclaim timeout elapsed without a signal.
    TimedOut,
}

pub(crate) struct Worker {
    id: usize,
    slot: Mutex<Slot>,
    wakeup: Condvar,
    /// Tasks run since the last idle wait; reported when parking.
    tasks_since_wait: AtomicU64,
    /// Tasks run since thread creation; reported at detachment.
    tasks_total: AtomicU64,
}

#[derive(Default)]
struct Slot {
    signaled: bool,
}

impl Worker {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            slot: Mutex::new(Slot::default()),
            wakeup: Condvar::new(),
            tasks_since_wait: AtomicU64::new(0),
            tasks_total: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Signals the worker to re-check the pool for work. Callers hold the
    /// pool lock; this only touches the private slot, never the pool lock.
    pub fn wake(&self) {
        let mut slot = self.slot.lock();
        slot.signaled = true;
        self.wakeup.notify_one();
    }

    /// Parks the calling (owning) thread until signaled, or until `timeout`
    /// elapses. `None` disables the timeout entirely.
    pub fn wait_for_wake(&self, timeout: Option<Duration>) -> WakeReason {
        let mut slot = self.slot.lock();
        loop {
            if slot.signaled {
                slot.signaled = false;
                return WakeReason::Signaled;
            }
            match timeout {
                Some(timeout) => {
                    if self.wakeup.wait_for(&mut slot, timeout).timed_out() && !slot.signaled {
                        return WakeReason::TimedOut;
                    }
                }
                None => self.wakeup.wait(&mut slot),
            }
        }
    }

    /// Bumps both run counters. Only the owning thread calls this.
    pub fn record_task_run(&self) {
        self.tasks_since_wait.fetch_add(1, Ordering::Relaxed);
        self.tasks_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns and resets the tasks-since-last-wait counter.
    pub fn take_tasks_since_wait(&self) -> u64 {
        self.tasks_since_wait.swap(0, Ordering::Relaxed)
    }

    pub fn tasks_total(&self) -> u64 {
        self.tasks_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_wake_before_wait_is_not_lost() {
        let worker = Worker::new(0);
        worker.wake();
        // The signal is latched in the slot, so the wait returns at once.
        assert!(matches!(worker.wait_for_wake(None), WakeReason::Signaled));
    }

    #[test]
    fn test_wait_times_out_without_signal() {
        let worker = Worker::new(0);
        let start = Instant::now();
        let reason = worker.wait_for_wake(Some(Duration::from_millis(20)));
        assert!(matches!(reason, WakeReason::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_cross_thread_wake() {
        let worker = Arc::new(Worker::new(3));
        let waker = Arc::clone(&worker);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            waker.wake();
        });
        assert!(matches!(worker.wait_for_wake(Some(Duration::from_secs(5))), WakeReason::Signaled));
        handle.join().expect("waker thread");
    }

    #[test]
    fn test_task_counters() {
        let worker = Worker::new(1);
        worker.record_task_run();
        worker.record_task_run();
        assert_eq!(worker.take_tasks_since_wait(), 2);
        assert_eq!(worker.take_tasks_since_wait(), 0);
        worker.record_task_run();
        assert_eq!(worker.tasks_total(), 3);
    }
}
