//! Builders to construct scheduler components from configuration.

pub mod pool_builder;

pub use pool_builder::{build_pools, PoolBuilder};
