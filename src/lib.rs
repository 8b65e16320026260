//! # Elastic Worker Pool
//!
//! An elastic pool of OS worker threads executing tasks grouped into
//! ordered streams ("sequences"), with both unordered-parallel and
//! strictly-sequenced execution semantics over one shared set of threads.
//!
//! ## Core Problem Solved
//!
//! Thread pools for mixed workloads face conflicting pressures:
//!
//! - **Exactly enough threads**: too few starves independent work, too
//!   many wastes memory and scheduler time
//! - **Blocking tasks**: one task waiting on an external OS call must not
//!   stall CPU-bound work queued behind it
//! - **Ordered streams**: some callers need strict one-at-a-time, in-order
//!   execution without dedicating a thread to it
//! - **Clean teardown**: shutdown must not leak threads, double-run tasks,
//!   or deadlock
//!
//! ## Key Features
//!
//! - **Idle-worker stack**: LIFO wake order for cache locality, with the
//!   oldest idle worker held back as a standby
//! - **Blocking-aware capacity**: a [`ScopedBlockingCall`] raises worker
//!   capacity for the duration of the blocking wait and lowers it after
//! - **Idle reclaim**: workers that stay idle past a configurable timeout
//!   retire on their own; the pool converges back to a single standby
//! - **Sequenced and parallel runners**: one [`TaskRunner`] interface,
//!   two posting disciplines
//! - **Collaborator seams**: shutdown tracking, delayed posts, and worker
//!   histograms go through traits, with small in-crate defaults
//!
//! [`ScopedBlockingCall`]: core::ScopedBlockingCall
//! [`TaskRunner`]: core::TaskRunner
//!
//! ## Quick start
//!
//! ```
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//!
//! use elastic_worker_pool::builders::PoolBuilder;
//! use elastic_worker_pool::core::{TaskRunner, TaskTraits};
//! use elastic_worker_pool::infra::CompletionTracker;
//!
//! let tracker = Arc::new(CompletionTracker::new());
//! let pool = PoolBuilder::new()
//!     .with_worker_capacity(2)
//!     .with_shutdown_tracker(Arc::clone(&tracker))
//!     .build()
//!     .expect("valid configuration");
//! pool.start();
//!
//! let counter = Arc::new(AtomicU32::new(0));
//! let task_counter = Arc::clone(&counter);
//! let runner = pool.create_sequenced_task_runner(TaskTraits::default());
//! runner
//!     .post(Box::new(move || {
//!         task_counter.fetch_add(1, Ordering::Relaxed);
//!     }))
//!     .expect("pool accepts posts");
//!
//! tracker.flush();
//! assert_eq!(counter.load(Ordering::Relaxed), 1);
//! pool.join();
//! ```
//!
//! For the full lifecycle semantics (standby invariant, blocking growth,
//! retirement), see `tests/pool_lifecycle_test.rs` and
//! `tests/blocking_test.rs`.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling: tasks, sequences, workers, and the capacity engine.
pub mod core;
/// Configuration models for pools and pool sets.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Default in-crate implementations of collaborator contracts.
pub mod infra;
/// Shared utilities.
pub mod util;
