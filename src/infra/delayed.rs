//! Timer-thread dispatcher for delayed posts, the default delayed-task
//! collaborator.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::core::hooks::DelayedDispatcher;

static NEXT_SCHEDULE_SEQ: AtomicU64 = AtomicU64::new(0);

/// One timer thread ordering scheduled posts by due time.
///
/// Posts still pending when the dispatcher is dropped are discarded; real
/// deployments wire in their own timer service through
/// [`DelayedDispatcher`].
pub struct TimerDispatcher {
    commands: Sender<Command>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

enum Command {
    Schedule(ScheduledPost),
    Shutdown,
}

struct ScheduledPost {
    due: Instant,
    seq: u64,
    post: Box<dyn FnOnce() + Send + 'static>,
}

impl PartialEq for ScheduledPost {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledPost {}

impl PartialOrd for ScheduledPost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledPost {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Earliest due (then earliest scheduled) is greatest, so the
        // max-heap pops in firing order.
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl TimerDispatcher {
    /// Starts the timer thread.
    ///
    /// # Panics
    ///
    /// Panics when the timer thread cannot be spawned.
    #[must_use]
    pub fn new() -> Self {
        let (commands, receiver) = unbounded();
        let thread = std::thread::Builder::new()
            .name("ewp-timer".into())
            .spawn(move || timer_main(&receiver))
            .expect("failed to spawn timer thread");
        Self { commands, thread: Mutex::new(Some(thread)) }
    }
}

impl Default for TimerDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayedDispatcher for TimerDispatcher {
    fn schedule(&self, delay: Duration, post: Box<dyn FnOnce() + Send + 'static>) {
        let scheduled = ScheduledPost {
            due: Instant::now() + delay,
            seq: NEXT_SCHEDULE_SEQ.fetch_add(1, Ordering::Relaxed),
            post,
        };
        if self.commands.send(Command::Schedule(scheduled)).is_err() {
            debug!("timer thread gone; dropping scheduled post");
        }
    }
}

impl Drop for TimerDispatcher {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

fn timer_main(receiver: &Receiver<Command>) {
    let mut pending: BinaryHeap<ScheduledPost> = BinaryHeap::new();
    loop {
        let now = Instant::now();
        while pending.peek().is_some_and(|next| next.due <= now) {
            let entry = pending.pop().expect("peeked entry present");
            (entry.post)();
        }
        let command = if let Some(next) = pending.peek() {
            match receiver.recv_timeout(next.due.saturating_duration_since(Instant::now())) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match receiver.recv() {
                Ok(command) => command,
                Err(_) => break,
            }
        };
        match command {
            Command::Schedule(post) => pending.push(post),
            Command::Shutdown => break,
        }
    }
}
