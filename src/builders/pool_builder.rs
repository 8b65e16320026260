//! Builders to construct worker pools from configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{PoolConfig, PoolSetConfig};
use crate::core::error::PoolError;
use crate::core::hooks::{DelayedDispatcher, MetricsSink, ShutdownTracker};
use crate::core::pool::WorkerPool;
use crate::infra::delayed::TimerDispatcher;

/// Builder assembling a [`WorkerPool`] from configuration and collaborator
/// hooks.
pub struct PoolBuilder {
    config: PoolConfig,
    tracker: Option<Arc<dyn ShutdownTracker>>,
    delayed: Option<Arc<dyn DelayedDispatcher>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl PoolBuilder {
    /// Builder seeded with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(PoolConfig::default())
    }

    /// Builder seeded from an existing configuration.
    #[must_use]
    pub fn from_config(config: PoolConfig) -> Self {
        Self { config, tracker: None, delayed: None, metrics: None }
    }

    /// Sets the target worker capacity.
    #[must_use]
    pub fn with_worker_capacity(mut self, worker_capacity: usize) -> Self {
        self.config.worker_capacity = worker_capacity;
        self
    }

    /// Sets the idle reclaim timeout; `None` disables retirement.
    #[must_use]
    pub fn with_idle_reclaim_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_reclaim_timeout_ms =
            timeout.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Installs the shutdown/completion tracker consulted on every post.
    #[must_use]
    pub fn with_shutdown_tracker(mut self, tracker: Arc<dyn ShutdownTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Installs the delayed-post dispatcher. Without one, the pool uses a
    /// [`TimerDispatcher`] of its own.
    #[must_use]
    pub fn with_delayed_dispatcher(mut self, dispatcher: Arc<dyn DelayedDispatcher>) -> Self {
        self.delayed = Some(dispatcher);
        self
    }

    /// Installs the metrics sink receiving worker histogram events.
    #[must_use]
    pub fn with_metrics_sink(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the pool. The pool is not started; call
    /// [`WorkerPool::start`] once posts should begin executing.
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidConfig`] when configuration validation fails.
    pub fn build(self) -> Result<WorkerPool, PoolError> {
        self.config.validate().map_err(PoolError::InvalidConfig)?;
        let delayed = self.delayed.unwrap_or_else(|| Arc::new(TimerDispatcher::new()));
        Ok(WorkerPool::from_parts(self.config, self.tracker, delayed, self.metrics))
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds one (unstarted) pool per entry of a pool-set configuration.
///
/// # Errors
///
/// [`PoolError::InvalidConfig`] when any pool's configuration is invalid.
pub fn build_pools(cfg: &PoolSetConfig) -> Result<HashMap<String, WorkerPool>, PoolError> {
    cfg.validate().map_err(PoolError::InvalidConfig)?;
    let mut pools = HashMap::new();
    for (name, pool_cfg) in &cfg.pools {
        let pool = PoolBuilder::from_config(pool_cfg.clone()).build()?;
        pools.insert(name.clone(), pool);
    }
    Ok(pools)
}
