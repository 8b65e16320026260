//! Pool configuration structures.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Advisory thread priority hint for worker threads.
///
/// Recorded and logged at spawn; it does not change scheduling behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPriorityHint {
    /// Workers service best-effort work.
    Background,
    /// Workers service user-visible work.
    Normal,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Target number of workers when no blocking scopes are active.
    pub worker_capacity: usize,
    /// Idle milliseconds before a worker retires. `None` disables
    /// retirement entirely.
    pub idle_reclaim_timeout_ms: Option<u64>,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
    /// Stack size for worker threads, in bytes. `None` uses the platform
    /// default.
    pub thread_stack_size: Option<usize>,
    /// Advisory thread priority hint.
    pub thread_priority: ThreadPriorityHint,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_capacity: num_cpus::get(),
            idle_reclaim_timeout_ms: Some(30_000),
            thread_name_prefix: "ewp".into(),
            thread_stack_size: None,
            thread_priority: ThreadPriorityHint::Normal,
        }
    }
}

impl PoolConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_capacity == 0 {
            return Err("worker_capacity must be greater than 0".into());
        }
        if self.thread_name_prefix.is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        if self.idle_reclaim_timeout_ms == Some(0) {
            return Err(
                "idle_reclaim_timeout_ms must be greater than 0; omit it to disable reclaim"
                    .into(),
            );
        }
        Ok(())
    }

    /// Idle reclaim timeout as a [`Duration`], `None` when disabled.
    #[must_use]
    pub fn idle_reclaim_timeout(&self) -> Option<Duration> {
        self.idle_reclaim_timeout_ms.map(Duration::from_millis)
    }
}

/// Named set of pool configurations, e.g. a foreground and a background
/// pool sharing one process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSetConfig {
    /// Map of pool name to configuration.
    pub pools: HashMap<String, PoolConfig>,
}

impl PoolSetConfig {
    /// Validate all pools and ensure at least one pool exists.
    ///
    /// # Errors
    ///
    /// Returns a description naming the first invalid pool.
    pub fn validate(&self) -> Result<(), String> {
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        for (name, pool) in &self.pools {
            pool.validate().map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse a pool set from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error description.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = PoolConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.worker_capacity >= 1);
        assert_eq!(cfg.idle_reclaim_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let cfg = PoolConfig { worker_capacity: 0, ..PoolConfig::default() };
        assert!(cfg.validate().unwrap_err().contains("worker_capacity"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let cfg = PoolConfig { idle_reclaim_timeout_ms: Some(0), ..PoolConfig::default() };
        assert!(cfg.validate().unwrap_err().contains("idle_reclaim_timeout_ms"));
    }

    #[test]
    fn test_none_timeout_disables_reclaim() {
        let cfg = PoolConfig { idle_reclaim_timeout_ms: None, ..PoolConfig::default() };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.idle_reclaim_timeout(), None);
    }

    #[test]
    fn test_pool_set_from_json() {
        let cfg = PoolSetConfig::from_json_str(
            r#"{
                "pools": {
                    "foreground": {
                        "worker_capacity": 4,
                        "idle_reclaim_timeout_ms": 500,
                        "thread_name_prefix": "fg",
                        "thread_stack_size": null,
                        "thread_priority": "normal"
                    },
                    "background": {
                        "worker_capacity": 1,
                        "idle_reclaim_timeout_ms": null,
                        "thread_name_prefix": "bg",
                        "thread_stack_size": null,
                        "thread_priority": "background"
                    }
                }
            }"#,
        )
        .expect("valid config");
        assert_eq!(cfg.pools.len(), 2);
        assert_eq!(cfg.pools["foreground"].worker_capacity, 4);
        assert_eq!(cfg.pools["background"].thread_priority, ThreadPriorityHint::Background);
    }

    #[test]
    fn test_pool_set_rejects_empty() {
        let err = PoolSetConfig::from_json_str(r#"{ "pools": {} }"#).unwrap_err();
        assert!(err.contains("at least one pool"));
    }

    #[test]
    fn test_pool_set_names_invalid_pool() {
        let err = PoolSetConfig::from_json_str(
            r#"{
                "pools": {
                    "broken": {
                        "worker_capacity": 0,
                        "idle_reclaim_timeout_ms": null,
                        "thread_name_prefix": "x",
                        "thread_stack_size": null,
                        "thread_priority": "normal"
                    }
                }
            }"#,
        )
        .unwrap_err();
        assert!(err.contains("broken"));
    }
}
