//! Vector-backed histogram recorder, the default metrics collaborator.

use parking_lot::Mutex;

use crate::core::hooks::MetricsSink;

/// Records the pool's worker histogram events in memory for inspection.
#[derive(Default)]
pub struct HistogramRecorder {
    between_waits: Mutex<Vec<u64>>,
    before_detach: Mutex<Vec<u64>>,
}

impl HistogramRecorder {
    /// New empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples of "tasks run between two consecutive idle waits".
    #[must_use]
    pub fn tasks_between_waits(&self) -> Vec<u64> {
        self.between_waits.lock().clone()
    }

    /// Samples of "tasks run by a worker before it retired".
    #[must_use]
    pub fn tasks_before_detach(&self) -> Vec<u64> {
        self.before_detach.lock().clone()
    }
}

impl MetricsSink for HistogramRecorder {
    fn record_tasks_between_waits(&self, count: u64) {
        self.between_waits.lock().push(count);
    }

    fn record_tasks_before_detach(&self, count: u64) {
        self.before_detach.lock().push(count);
    }
}
