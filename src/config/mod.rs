//! Configuration models for pools and pool sets.

pub mod pool;

pub use pool::{PoolConfig, PoolSetConfig, ThreadPriorityHint};
