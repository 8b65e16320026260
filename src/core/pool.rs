//! The worker pool: idle stack, capacity controller, and worker run loop.
//!
//! One `parking_lot::Mutex` guards the pool state (idle stack, capacity
//! counters, runnable-sequence queue); each sequence and each worker slot
//! has its own lock. Lock order is pool -> sequence -> worker slot, and no
//! path acquires in the reverse direction.
//!
//! # Capacity model
//!
//! `capacity = base_capacity + workers currently inside a blocking scope`.
//! The pool converges toward `capacity` live workers: it creates one when
//! work arrives with nobody idle and room to grow, keeps one idle standby
//! while under capacity, and lets idle workers retire after the reclaim
//! timeout. Workers that go idle while the pool is over capacity park at
//! the bottom of the idle stack: they are woken last and, because the
//! bottom slot loses its standby protection while over capacity, retired
//! first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::config::{PoolConfig, ThreadPriorityHint};
use crate::core::blocking::PoolThreadRegistration;
use crate::core::error::PoolError;
use crate::core::hooks::{DelayedDispatcher, MetricsSink, ShutdownTracker};
use crate::core::queue::RunnableQueue;
use crate::core::runner::{ParallelTaskRunner, SequencedTaskRunner, TaskContextGuard, TaskRunner};
use crate::core::sequence::Sequence;
use crate::core::task::{Task, TaskTraits};
use crate::core::worker::{WakeReason, Worker};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Snapshot of pool utilization, taken under the pool lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    /// Live workers: running, idle, and created but not yet scheduled.
    pub num_workers: usize,
    /// Workers currently parked on the idle stack.
    pub num_idle: usize,
    /// Target worker count the pool is converging toward.
    pub capacity: usize,
    /// Workers currently inside a blocking scope.
    pub num_blocked: usize,
    /// Sequences with runnable work waiting for a worker.
    pub queued_sequences: usize,
}

/// Elastic pool of worker threads executing tasks from sequences.
///
/// Construct through [`PoolBuilder`], post through runner handles from
/// [`create_task_runner`] / [`create_sequenced_task_runner`], and tear down
/// with [`join`]. Dropping the pool without joining performs a best-effort
/// shutdown and lets the worker threads exit on their own.
///
/// [`PoolBuilder`]: crate::builders::PoolBuilder
/// [`create_task_runner`]: WorkerPool::create_task_runner
/// [`create_sequenced_task_runner`]: WorkerPool::create_sequenced_task_runner
/// [`join`]: WorkerPool::join
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("pool_id", &self.inner.pool_id)
            .field("capacity", &self.capacity())
            .field("num_workers", &self.num_workers())
            .finish_non_exhaustive()
    }
}

pub(crate) struct PoolInner {
    thread_name_prefix: String,
    thread_stack_size: Option<usize>,
    thread_priority: ThreadPriorityHint,
    idle_reclaim_timeout: Option<Duration>,
    state: Mutex<PoolState>,
    /// Signaled whenever worker/idle counts or capacity change.
    state_changed: Condvar,
    tracker: Option<Arc<dyn ShutdownTracker>>,
    delayed: Arc<dyn DelayedDispatcher>,
    metrics: Option<Arc<dyn MetricsSink>>,
    /// Identity for pool-membership queries from runner handles.
    pool_id: u64,
    self_ref: Weak<PoolInner>,
}

struct PoolState {
    started: bool,
    shutdown_requested: bool,
    join_requested: bool,
    base_capacity: usize,
    capacity: usize,
    num_blocked: usize,
    /// Live workers: running, idle, and created but not yet scheduled.
    num_live: usize,
    /// Arena of every worker ever created, indexed by worker id. Retired
    /// entries keep their join handle until [`WorkerPool::join`] reaps it.
    workers: Vec<WorkerHandle>,
    /// Worker ids, most recently idled last. The bottom entry is the
    /// standby and is not retired while `num_live <= capacity`.
    idle_stack: Vec<usize>,
    queue: RunnableQueue,
}

struct WorkerHandle {
    worker: Arc<Worker>,
    thread: Option<JoinHandle<()>>,
    detached: bool,
}

enum GetWork {
    /// A sequence was popped and leased; run it.
    Run(Arc<Sequence>),
    /// Nothing runnable; the worker was pushed onto the idle stack.
    Wait,
    /// Join was requested and the queue is drained; the thread exits.
    Exit,
}

impl WorkerPool {
    pub(crate) fn from_parts(
        config: PoolConfig,
        tracker: Option<Arc<dyn ShutdownTracker>>,
        delayed: Arc<dyn DelayedDispatcher>,
        metrics: Option<Arc<dyn MetricsSink>>,
    ) -> Self {
        let capacity = config.worker_capacity.max(1);
        let inner = Arc::new_cyclic(|weak| PoolInner {
            thread_name_prefix: config.thread_name_prefix.clone(),
            thread_stack_size: config.thread_stack_size,
            thread_priority: config.thread_priority,
            idle_reclaim_timeout: config.idle_reclaim_timeout(),
            state: Mutex::new(PoolState {
                started: false,
                shutdown_requested: false,
                join_requested: false,
                base_capacity: capacity,
                capacity,
                num_blocked: 0,
                num_live: 0,
                workers: Vec::new(),
                idle_stack: Vec::new(),
                queue: RunnableQueue::new(),
            }),
            state_changed: Condvar::new(),
            tracker,
            delayed,
            metrics,
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            self_ref: weak.clone(),
        });
        Self { inner }
    }

    /// Starts the pool: creates workers for pre-queued work (at least one,
    /// at most the configured capacity) and begins servicing posts.
    ///
    /// Tasks posted before `start` stay queued and are distributed across
    /// the initial workers.
    ///
    /// # Panics
    ///
    /// Panics when called twice; that is a programming error.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        assert!(!state.started, "WorkerPool::start called twice");
        state.started = true;
        let initial = state.queue.len().clamp(1, state.capacity);
        info!(initial_workers = initial, capacity = state.capacity, "starting worker pool");
        for _ in 0..initial {
            self.inner.create_worker(&mut state);
        }
    }

    /// Posts a one-off task on a fresh sequence (unordered execution).
    ///
    /// # Errors
    ///
    /// [`PoolError::ShuttingDown`] when the post was not admitted.
    pub fn post_task(&self, task: Task) -> Result<(), PoolError> {
        let sequence = Sequence::new();
        self.inner.post_task_with_sequence(task, &sequence)
    }

    /// Returns a handle that runs each posted task on its own sequence.
    #[must_use]
    pub fn create_task_runner(&self, traits: TaskTraits) -> Arc<dyn TaskRunner> {
        Arc::new(ParallelTaskRunner::new(Arc::clone(&self.inner), traits))
    }

    /// Returns a handle that runs all posted tasks on one shared sequence,
    /// one at a time, in post order. Clones of the handle share the
    /// sequence.
    #[must_use]
    pub fn create_sequenced_task_runner(&self, traits: TaskTraits) -> Arc<SequencedTaskRunner> {
        Arc::new(SequencedTaskRunner::new(Arc::clone(&self.inner), traits))
    }

    /// Utilization snapshot, taken under the pool lock.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            num_workers: state.num_live,
            num_idle: state.idle_stack.len(),
            capacity: state.capacity,
            num_blocked: state.num_blocked,
            queued_sequences: state.queue.len(),
        }
    }

    /// Number of live workers.
    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.inner.state.lock().num_live
    }

    /// Number of workers parked on the idle stack.
    #[must_use]
    pub fn num_idle_workers(&self) -> usize {
        self.inner.state.lock().idle_stack.len()
    }

    /// Current target worker count.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.state.lock().capacity
    }

    /// Blocks until at least `count` workers are parked on the idle stack.
    pub fn wait_for_workers_idle(&self, count: usize) {
        let mut state = self.inner.state.lock();
        while state.idle_stack.len() < count {
            self.inner.state_changed.wait(&mut state);
        }
    }

    /// Blocks until every live worker is parked on the idle stack.
    pub fn wait_for_all_workers_idle(&self) {
        let mut state = self.inner.state.lock();
        while state.idle_stack.len() != state.num_live {
            self.inner.state_changed.wait(&mut state);
        }
    }

    /// Stops accepting posts. In-flight and queued tasks still run; pair
    /// with [`join`](WorkerPool::join) to wait for them.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if state.shutdown_requested {
            return;
        }
        state.shutdown_requested = true;
        info!("worker pool shutdown requested");
    }

    /// Stops accepting posts, runs every already-queued task, and blocks
    /// until each worker thread ever created has fully exited.
    ///
    /// # Panics
    ///
    /// Panics when called twice, or when a worker thread terminated
    /// abnormally.
    pub fn join(&self) {
        let handles = {
            let mut state = self.inner.state.lock();
            assert!(!state.join_requested, "WorkerPool::join called twice");
            state.shutdown_requested = true;
            state.join_requested = true;
            info!(
                num_live = state.num_live,
                queued_sequences = state.queue.len(),
                "joining worker pool"
            );
            while let Some(id) = state.idle_stack.pop() {
                state.workers[id].worker.wake();
            }
            while state.num_live > 0 {
                self.inner.state_changed.wait(&mut state);
            }
            state
                .workers
                .iter_mut()
                .filter_map(|handle| handle.thread.take())
                .collect::<Vec<_>>()
        };
        for handle in handles {
            handle.join().expect("worker thread panicked");
        }
        info!("worker pool joined");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Best-effort shutdown; join() is the graceful path. Threads still
        // drain the queue and exit on their own.
        let mut state = self.inner.state.lock();
        if state.join_requested {
            return;
        }
        state.shutdown_requested = true;
        state.join_requested = true;
        while let Some(id) = state.idle_stack.pop() {
            state.workers[id].worker.wake();
        }
        debug!(num_live = state.num_live, "worker pool dropped without join; detaching workers");
    }
}

impl PoolInner {
    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    /// Appends `task` to `sequence` and, when the sequence just became
    /// runnable, queues it and makes a wake-or-create decision.
    pub(crate) fn post_task_with_sequence(
        &self,
        task: Task,
        sequence: &Arc<Sequence>,
    ) -> Result<(), PoolError> {
        if task.delay() > Duration::ZERO {
            return self.post_delayed(task, sequence);
        }
        let mut state = self.state.lock();
        if state.shutdown_requested {
            return Err(PoolError::ShuttingDown);
        }
        if let Some(tracker) = &self.tracker {
            if !tracker.will_post_task() {
                return Err(PoolError::ShuttingDown);
            }
        }
        if sequence.push(task) {
            let key = sequence.sort_key();
            state.queue.push(Arc::clone(sequence), key);
            if state.started {
                self.wake_or_create(&mut state);
            }
        }
        Ok(())
    }

    /// Hands a delayed task to the dispatcher. The task is not admitted by
    /// the tracker until the due-time callback re-posts it; a pool that has
    /// shut down in the meantime rejects it there.
    fn post_delayed(&self, task: Task, sequence: &Arc<Sequence>) -> Result<(), PoolError> {
        {
            let state = self.state.lock();
            if state.shutdown_requested {
                return Err(PoolError::ShuttingDown);
            }
        }
        let delay = task.delay();
        let pool = self.self_ref.upgrade().expect("pool inner alive during post");
        let sequence = Arc::clone(sequence);
        self.delayed.schedule(
            delay,
            Box::new(move || {
                if let Err(err) = pool.post_task_with_sequence(task.into_immediate(), &sequence) {
                    debug!(%err, "delayed task dropped at due time");
                }
            }),
        );
        Ok(())
    }

    /// Wake/create decision for a newly-runnable sequence: pop the
    /// most-recently-idle worker, else create one if under capacity, else
    /// leave the sequence queued for a running worker to pull.
    fn wake_or_create(&self, state: &mut PoolState) {
        if let Some(id) = state.idle_stack.pop() {
            state.workers[id].worker.wake();
            self.state_changed.notify_all();
        } else if state.num_live < state.capacity {
            self.create_worker(state);
        }
    }

    /// Keeps one idle worker available while the pool is under capacity.
    fn maintain_standby(&self, state: &mut PoolState) {
        if state.started
            && !state.join_requested
            && state.idle_stack.is_empty()
            && state.num_live < state.capacity
        {
            self.create_worker(state);
        }
    }

    fn create_worker(&self, state: &mut PoolState) {
        let id = state.workers.len();
        let worker = Arc::new(Worker::new(id));
        let inner = self.self_ref.upgrade().expect("pool inner alive during worker creation");
        let thread_worker = Arc::clone(&worker);
        let mut builder = thread::Builder::new().name(format!("{}-{id}", self.thread_name_prefix));
        if let Some(stack_size) = self.thread_stack_size {
            builder = builder.stack_size(stack_size);
        }
        let thread = builder
            .spawn(move || worker_main(&inner, &thread_worker))
            .expect("failed to spawn worker thread");
        state.workers.push(WorkerHandle { worker, thread: Some(thread), detached: false });
        state.num_live += 1;
        debug!(
            worker_id = id,
            num_live = state.num_live,
            capacity = state.capacity,
            priority_hint = ?self.thread_priority,
            "created worker"
        );
        self.state_changed.notify_all();
    }

    /// Pops the next sequence for `worker`, or parks it on the idle stack.
    fn get_work(&self, worker: &Worker) -> GetWork {
        let tasks_between_waits;
        {
            let mut state = self.state.lock();
            if let Some(sequence) = state.queue.pop() {
                self.maintain_standby(&mut state);
                sequence.take_lease();
                return GetWork::Run(sequence);
            }
            if state.join_requested {
                self.detach_locked(&mut state, worker.id());
                return GetWork::Exit;
            }
            assert!(
                !state.idle_stack.contains(&worker.id()),
                "worker {} pushed onto the idle stack twice",
                worker.id()
            );
            if state.num_live > state.capacity {
                // Over capacity: park at the bottom, woken last and
                // retired first.
                state.idle_stack.insert(0, worker.id());
            } else {
                state.idle_stack.push(worker.id());
            }
            self.state_changed.notify_all();
            tasks_between_waits = worker.take_tasks_since_wait();
        }
        // Hooks run outside the pool lock.
        if let Some(metrics) = &self.metrics {
            metrics.record_tasks_between_waits(tasks_between_waits);
        }
        GetWork::Wait
    }

    /// Parks until woken. Returns true when the worker retired instead.
    fn wait_while_idle(&self, worker: &Worker) -> bool {
        loop {
            match worker.wait_for_wake(self.idle_reclaim_timeout) {
                WakeReason::Signaled => return false,
                WakeReason::TimedOut => {
                    if self.try_retire(worker) {
                        return true;
                    }
                }
            }
        }
    }

    /// Retires `worker` if it is still idle and not the protected standby.
    fn try_retire(&self, worker: &Worker) -> bool {
        let tasks_total;
        {
            let mut state = self.state.lock();
            let Some(position) = state.idle_stack.iter().position(|&id| id == worker.id()) else {
                // Popped by a waker; the signal is or will be pending.
                return false;
            };
            if position == 0 && state.num_live <= state.capacity {
                // Sole-standby protection: the bottom of the stack stays.
                return false;
            }
            state.idle_stack.remove(position);
            self.detach_locked(&mut state, worker.id());
            tasks_total = worker.tasks_total();
            self.maintain_standby(&mut state);
            debug!(worker_id = worker.id(), num_live = state.num_live, "idle worker retired");
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_tasks_before_detach(tasks_total);
        }
        true
    }

    fn detach_locked(&self, state: &mut PoolState, worker_id: usize) {
        let handle = &mut state.workers[worker_id];
        assert!(!handle.detached, "worker {worker_id} detached twice");
        handle.detached = true;
        state.num_live -= 1;
        self.state_changed.notify_all();
    }

    /// Runs tasks from `sequence` until it drains or the worker yields to a
    /// more urgent sequence.
    fn run_sequence(&self, worker: &Worker, sequence: &Arc<Sequence>) {
        while let Some(task) = sequence.pop_or_release() {
            self.run_task(worker, sequence, task);
            if self.yield_if_outranked(sequence) {
                return;
            }
        }
    }

    fn run_task(&self, worker: &Worker, sequence: &Arc<Sequence>, task: Task) {
        let context = TaskContextGuard::enter(self.pool_id, sequence.id());
        worker.record_task_run();
        task.run();
        drop(context);
        if let Some(tracker) = &self.tracker {
            tracker.did_run_task();
        }
    }

    /// Re-pushes the current sequence when the queue holds a strictly more
    /// urgent one, releasing the lease so any worker can take either.
    fn yield_if_outranked(&self, sequence: &Arc<Sequence>) -> bool {
        let mut state = self.state.lock();
        let Some(waiting) = state.queue.peek_key() else {
            return false;
        };
        let Some(key) = sequence.release_if_outranked(waiting) else {
            return false;
        };
        state.queue.push(Arc::clone(sequence), key);
        debug!(sequence_id = ?sequence.id(), "yielded sequence to a more urgent one");
        true
    }

    pub(crate) fn blocking_scope_entered(&self) {
        let mut state = self.state.lock();
        state.num_blocked += 1;
        state.capacity = state.base_capacity + state.num_blocked;
        debug!(
            capacity = state.capacity,
            num_blocked = state.num_blocked,
            "blocking scope entered"
        );
        // Grow immediately, even though the blocked worker is not idle, so
        // CPU-bound work is not starved behind the blocking wait.
        if state.num_live < state.capacity {
            self.create_worker(&mut state);
        }
        self.state_changed.notify_all();
    }

    pub(crate) fn blocking_scope_exited(&self) {
        let mut state = self.state.lock();
        assert!(state.num_blocked > 0, "blocking scope exit without matching enter");
        state.num_blocked -= 1;
        state.capacity = state.base_capacity + state.num_blocked;
        debug!(
            capacity = state.capacity,
            num_blocked = state.num_blocked,
            "blocking scope exited"
        );
        // No worker is force-killed; over-capacity workers finish their
        // current task, go idle at the bottom of the stack, and shed
        // through normal retirement.
        self.state_changed.notify_all();
    }
}

/// Aborts the process when a task body unwinds through the run loop; a
/// worker dying silently would corrupt idle/live accounting.
struct WorkerPanicGuard;

impl Drop for WorkerPanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("worker thread panicked; task failures are fatal");
            std::process::abort();
        }
    }
}

fn worker_main(inner: &Arc<PoolInner>, worker: &Arc<Worker>) {
    let _registration = PoolThreadRegistration::register(Arc::clone(inner));
    let _panic_guard = WorkerPanicGuard;
    debug!(worker_id = worker.id(), "worker thread started");
    loop {
        match inner.get_work(worker) {
            GetWork::Run(sequence) => inner.run_sequence(worker, &sequence),
            GetWork::Wait => {
                if inner.wait_while_idle(worker) {
                    break;
                }
            }
            GetWork::Exit => break,
        }
    }
    debug!(worker_id = worker.id(), "worker thread exiting");
}
