//! Integration tests for pool lifecycle: start, standby, growth,
//! retirement, pre-start queuing, shutdown, and join.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use elastic_worker_pool::builders::PoolBuilder;
use elastic_worker_pool::core::{PoolError, Task, TaskRunner, TaskTraits, WorkerPool};
use elastic_worker_pool::infra::{CompletionTracker, HistogramRecorder};
use elastic_worker_pool::util::init_tracing;

// ============================================================================
// HELPERS
// ============================================================================

/// Manually released latch that tasks can park on.
struct Gate {
    open: Mutex<bool>,
    released: Condvar,
}

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Self { open: Mutex::new(false), released: Condvar::new() })
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.released.wait(open).unwrap();
        }
    }

    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.released.notify_all();
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn build_pool(
    capacity: usize,
    idle_reclaim_timeout: Option<Duration>,
    tracker: &Arc<CompletionTracker>,
) -> WorkerPool {
    init_tracing();
    PoolBuilder::new()
        .with_worker_capacity(capacity)
        .with_idle_reclaim_timeout(idle_reclaim_timeout)
        .with_thread_name_prefix("lifecycle")
        .with_shutdown_tracker(tracker.clone())
        .build()
        .expect("valid pool config")
}

// ============================================================================
// TESTS
// ============================================================================

/// Immediately after start with no tasks, exactly one standby worker
/// exists and is idle, regardless of capacity.
#[test]
fn test_standby_after_start() {
    let tracker = Arc::new(CompletionTracker::new());
    let pool = build_pool(4, Some(Duration::from_secs(30)), &tracker);
    pool.start();

    pool.wait_for_workers_idle(1);
    assert_eq!(pool.num_workers(), 1);
    assert_eq!(pool.num_idle_workers(), 1);
    assert_eq!(pool.capacity(), 4);

    pool.join();
}

/// Load grows the pool one worker at a time, up to exactly the configured
/// capacity and no further.
#[test]
fn test_growth_up_to_capacity_under_load() {
    const CAPACITY: usize = 3;
    let tracker = Arc::new(CompletionTracker::new());
    let pool = build_pool(CAPACITY, Some(Duration::from_secs(30)), &tracker);
    pool.start();

    let runner = pool.create_task_runner(TaskTraits::default());
    let gate = Gate::new();
    let running = Arc::new(AtomicUsize::new(0));

    for _ in 0..CAPACITY {
        let gate = Arc::clone(&gate);
        let running = Arc::clone(&running);
        runner
            .post(Box::new(move || {
                running.fetch_add(1, Ordering::SeqCst);
                gate.wait();
            }))
            .expect("post accepted");
    }

    assert!(
        wait_until(Duration::from_secs(5), || running.load(Ordering::SeqCst) == CAPACITY),
        "independent tasks should run concurrently"
    );
    assert_eq!(pool.num_workers(), CAPACITY);

    gate.release();
    tracker.flush();
    pool.join();
}

/// Idle workers retire after the reclaim timeout; the pool converges back
/// down to the single protected standby.
#[test]
fn test_retirement_converges_to_standby() {
    const CAPACITY: usize = 3;
    let tracker = Arc::new(CompletionTracker::new());
    let pool = build_pool(CAPACITY, Some(Duration::from_millis(50)), &tracker);
    pool.start();

    let runner = pool.create_task_runner(TaskTraits::default());
    let gate = Gate::new();
    let running = Arc::new(AtomicUsize::new(0));
    for _ in 0..CAPACITY {
        let gate = Arc::clone(&gate);
        let running = Arc::clone(&running);
        runner
            .post(Box::new(move || {
                running.fetch_add(1, Ordering::SeqCst);
                gate.wait();
            }))
            .expect("post accepted");
    }
    assert!(wait_until(Duration::from_secs(5), || running.load(Ordering::SeqCst) == CAPACITY));
    gate.release();
    tracker.flush();

    assert!(
        wait_until(Duration::from_secs(5), || pool.num_workers() == 1),
        "drained pool should shed down to the standby"
    );
    assert_eq!(pool.num_idle_workers(), 1);

    pool.join();
}

/// With the reclaim timeout disabled, idle workers never retire.
#[test]
fn test_retirement_disabled_keeps_workers() {
    const CAPACITY: usize = 3;
    let tracker = Arc::new(CompletionTracker::new());
    let pool = build_pool(CAPACITY, None, &tracker);
    pool.start();

    let runner = pool.create_task_runner(TaskTraits::default());
    let gate = Gate::new();
    let running = Arc::new(AtomicUsize::new(0));
    for _ in 0..CAPACITY {
        let gate = Arc::clone(&gate);
        let running = Arc::clone(&running);
        runner
            .post(Box::new(move || {
                running.fetch_add(1, Ordering::SeqCst);
                gate.wait();
            }))
            .expect("post accepted");
    }
    assert!(wait_until(Duration::from_secs(5), || running.load(Ordering::SeqCst) == CAPACITY));
    gate.release();
    tracker.flush();
    pool.wait_for_all_workers_idle();

    thread::sleep(Duration::from_millis(200));
    assert_eq!(pool.num_workers(), CAPACITY);

    pool.join();
}

/// Tasks posted before start stay queued, then run on exactly `capacity`
/// workers once started.
#[test]
fn test_pre_start_queuing_converges_to_capacity() {
    const CAPACITY: usize = 2;
    let tracker = Arc::new(CompletionTracker::new());
    let pool = build_pool(CAPACITY, Some(Duration::from_secs(30)), &tracker);

    let runner = pool.create_task_runner(TaskTraits::default());
    let counter = Arc::new(AtomicU32::new(0));
    for _ in 0..2 * CAPACITY {
        let counter = Arc::clone(&counter);
        runner
            .post(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("pre-start posts are queued, not rejected");
    }
    assert_eq!(pool.num_workers(), 0);
    assert_eq!(pool.stats().queued_sequences, 2 * CAPACITY);

    pool.start();
    tracker.flush();

    assert_eq!(counter.load(Ordering::SeqCst), (2 * CAPACITY) as u32);
    assert_eq!(pool.num_workers(), CAPACITY);

    pool.join();
}

/// After shutdown every post is rejected and the task body never runs.
#[test]
fn test_rejection_after_shutdown() {
    let tracker = Arc::new(CompletionTracker::new());
    let pool = build_pool(2, Some(Duration::from_secs(30)), &tracker);
    pool.start();
    let runner = pool.create_task_runner(TaskTraits::default());

    pool.shutdown();

    let invoked = Arc::new(AtomicU32::new(0));
    let invoked_by_runner = Arc::clone(&invoked);
    let result = runner.post(Box::new(move || {
        invoked_by_runner.fetch_add(1, Ordering::SeqCst);
    }));
    assert!(matches!(result, Err(PoolError::ShuttingDown)));

    let invoked_by_task = Arc::clone(&invoked);
    let result = pool.post_task(Task::new(TaskTraits::default(), move || {
        invoked_by_task.fetch_add(1, Ordering::SeqCst);
    }));
    assert!(matches!(result, Err(PoolError::ShuttingDown)));

    let invoked_delayed = Arc::clone(&invoked);
    let result = runner.post_delayed(
        Box::new(move || {
            invoked_delayed.fetch_add(1, Ordering::SeqCst);
        }),
        Duration::from_millis(1),
    );
    assert!(matches!(result, Err(PoolError::ShuttingDown)));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    pool.join();
}

/// A tracker that denies admission rejects the post even though the pool
/// itself has not been told to shut down.
#[test]
fn test_tracker_denial_rejects_post() {
    let tracker = Arc::new(CompletionTracker::new());
    let pool = build_pool(2, Some(Duration::from_secs(30)), &tracker);
    pool.start();
    let runner = pool.create_task_runner(TaskTraits::default());

    tracker.begin_shutdown();
    let result = runner.post(Box::new(|| {}));
    assert!(matches!(result, Err(PoolError::ShuttingDown)));
    assert_eq!(tracker.num_admitted(), 0);

    pool.join();
}

/// Every task accepted before join runs exactly once before join returns.
#[test]
fn test_join_runs_all_queued_tasks() {
    const NUM_TASKS: u32 = 50;
    let tracker = Arc::new(CompletionTracker::new());
    let pool = build_pool(2, Some(Duration::from_secs(30)), &tracker);
    pool.start();

    let runner = pool.create_task_runner(TaskTraits::default());
    let counter = Arc::new(AtomicU32::new(0));
    for _ in 0..NUM_TASKS {
        let counter = Arc::clone(&counter);
        runner
            .post(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("post accepted");
    }

    pool.join();
    assert_eq!(counter.load(Ordering::SeqCst), NUM_TASKS);

    let result = runner.post(Box::new(|| {}));
    assert!(matches!(result, Err(PoolError::ShuttingDown)));
}

#[test]
#[should_panic(expected = "called twice")]
fn test_double_start_panics() {
    let tracker = Arc::new(CompletionTracker::new());
    let pool = build_pool(1, Some(Duration::from_secs(30)), &tracker);
    pool.start();
    pool.start();
}

/// Stats snapshots are coherent before start.
#[test]
fn test_stats_before_start() {
    let tracker = Arc::new(CompletionTracker::new());
    let pool = build_pool(4, Some(Duration::from_secs(30)), &tracker);
    let stats = pool.stats();
    assert_eq!(stats.num_workers, 0);
    assert_eq!(stats.num_idle, 0);
    assert_eq!(stats.capacity, 4);
    assert_eq!(stats.num_blocked, 0);
    assert_eq!(stats.queued_sequences, 0);
}

/// The metrics sink sees "tasks between waits" when a worker parks and
/// "tasks before detach" when one retires.
#[test]
fn test_worker_histograms_recorded() {
    let tracker = Arc::new(CompletionTracker::new());
    let recorder = Arc::new(HistogramRecorder::new());
    init_tracing();
    let pool = PoolBuilder::new()
        .with_worker_capacity(2)
        .with_idle_reclaim_timeout(Some(Duration::from_millis(50)))
        .with_thread_name_prefix("histogram")
        .with_shutdown_tracker(tracker.clone())
        .with_metrics_sink(recorder.clone())
        .build()
        .expect("valid pool config");
    pool.start();

    let runner = pool.create_sequenced_task_runner(TaskTraits::default());
    for _ in 0..3 {
        runner.post(Box::new(|| {})).expect("post accepted");
    }
    tracker.flush();

    // The worker that drained the sequence parks and reports three tasks
    // since its previous wait.
    assert!(
        wait_until(Duration::from_secs(5), || {
            recorder.tasks_between_waits().iter().sum::<u64>() >= 3
        }),
        "idle wait histogram should see the drained tasks"
    );
    // One of the two workers retires (the standby is protected) and reports
    // its lifetime task count.
    assert!(
        wait_until(Duration::from_secs(5), || {
            recorder.tasks_before_detach().contains(&3)
        }),
        "detach histogram should see the draining worker retire"
    );

    pool.join();
}
