use std::time::Duration;

use serde::{Deserialize, Serialize};

use quorum_core::ErrorKind;

/// How a request should be retried and, once retries are exhausted, failed
/// over. `delay_for(k)` = min(retry_delay_ms · multiplierᵏ, cap).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_retry_delay_ms: u64,
    /// Deadline for each individual attempt. 0 = no deadline.
    pub timeout_ms: u64,
    pub enable_failover: bool,
    pub fallback_agents: Vec<String>,
    pub log_failures: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_retry_delay_ms: 30_000,
            timeout_ms: 30_000,
            enable_failover: false,
            fallback_agents: Vec::new(),
            log_failures: true,
        }
    }
}

impl RetryPolicy {
    /// More attempts, shorter delays, failover on.
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            retry_delay_ms: 500,
            backoff_multiplier: 1.5,
            max_retry_delay_ms: 10_000,
            timeout_ms: 60_000,
            enable_failover: true,
            ..Default::default()
        }
    }

    /// One retry, long delays.
    pub fn conservative() -> Self {
        Self {
            max_retries: 1,
            retry_delay_ms: 2000,
            backoff_multiplier: 2.0,
            max_retry_delay_ms: 60_000,
            timeout_ms: 15_000,
            ..Default::default()
        }
    }

    pub fn with_fallbacks(mut self, fallback_agents: Vec<String>) -> Self {
        self.enable_failover = true;
        self.fallback_agents = fallback_agents;
        self
    }

    /// Backoff before attempt `attempt + 1` (attempts are 0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.retry_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((raw as u64).min(self.max_retry_delay_ms))
    }

    /// Transient kinds worth retrying; everything else fails fast.
    pub fn is_retryable(kind: ErrorKind) -> bool {
        matches!(
            kind,
            ErrorKind::Timeout | ErrorKind::Connection | ErrorKind::Unavailable | ErrorKind::Overload
        )
    }
}
