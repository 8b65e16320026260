//! Default in-crate implementations of the pool's collaborator contracts.

pub mod delayed;
pub mod metrics;
pub mod tracker;

pub use delayed::TimerDispatcher;
pub use metrics::HistogramRecorder;
pub use tracker::CompletionTracker;
