// config.rs - engine configuration

use std::time::Duration;

/// Recognized configuration options, each with a sensible default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
    pub max_retries: u32,
    pub retry_sweep_interval: Duration,
    pub receipt_priority: i32,
    pub expense_priority: i32,
    pub stale_after: Duration,
    pub job_cache_stale_after: Duration,
    pub job_page_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_jitter: Duration::from_millis(1000),
            max_retries: 5,
            retry_sweep_interval: Duration::from_millis(300_000),
            receipt_priority: 2,
            expense_priority: 1,
            stale_after: Duration::from_millis(86_400_000),
            job_cache_stale_after: Duration::from_millis(86_400_000),
            job_page_limit: 100,
        }
    }
}
