//! Engine configuration and retry pacing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay before a retry grows with the retry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time
    #[default]
    Fixed,
    /// `base * retries`
    Linear,
    /// `base * 2^(retries - 1)`
    Exponential,
}

/// Delay inserted before a re-queued task's next attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBackoff {
    /// Base delay in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound in milliseconds
    pub max_delay_ms: u64,
    /// Growth strategy
    pub strategy: BackoffStrategy,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 30_000,
            strategy: BackoffStrategy::Fixed,
        }
    }
}

impl RetryBackoff {
    /// Delay before running attempt number `attempt` (1-based). The first
    /// attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let retries = attempt.saturating_sub(1);
        if retries == 0 || self.base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let ms = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(retries as u64),
            BackoffStrategy::Exponential => {
                let exp = 1u64 << (retries - 1).min(30);
                self.base_delay_ms.saturating_mul(exp)
            }
        };
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

/// Configuration for the scheduler and phase controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Max tasks running at once
    pub concurrency_limit: usize,

    /// Default per-attempt timeout in milliseconds
    pub task_timeout_ms: u64,

    /// Ceiling on phase-retry cycles across the whole plan
    pub max_global_iterations: u32,

    /// Stop dispatching after the first required task fails
    pub halt_on_failure: bool,

    /// Pacing of retries
    pub retry: RetryBackoff,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            task_timeout_ms: 300_000, // 5 minutes
            max_global_iterations: 5,
            halt_on_failure: false,
            retry: RetryBackoff::default(),
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max concurrent tasks.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Set the default per-attempt timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    /// Set the global phase-retry ceiling.
    pub fn with_max_global_iterations(mut self, max: u32) -> Self {
        self.max_global_iterations = max;
        self
    }

    /// Stop dispatching after the first required failure.
    pub fn with_halt_on_failure(mut self, halt: bool) -> Self {
        self.halt_on_failure = halt;
        self
    }

    /// Set retry pacing.
    pub fn with_retry(mut self, retry: RetryBackoff) -> Self {
        self.retry = retry;
        self
    }

    /// Effective concurrency limit, never below one.
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit.max(1)
    }

    /// Default per-attempt timeout.
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.concurrency_limit(), 4);
        assert_eq!(config.task_timeout(), Duration::from_secs(300));
        assert_eq!(config.max_global_iterations, 5);
        assert!(!config.halt_on_failure);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let config = EngineConfig::new().with_concurrency_limit(0);
        assert_eq!(config.concurrency_limit(), 1);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"concurrency_limit": 2, "retry": {"base_delay_ms": 50}}"#)
                .unwrap();
        assert_eq!(config.concurrency_limit, 2);
        assert_eq!(config.task_timeout_ms, 300_000);
        assert_eq!(config.retry.base_delay_ms, 50);
        assert_eq!(config.retry.strategy, BackoffStrategy::Fixed);
    }

    #[test]
    fn test_backoff_strategies() {
        let fixed = RetryBackoff {
            base_delay_ms: 100,
            ..Default::default()
        };
        assert_eq!(fixed.delay_before(1), Duration::ZERO);
        assert_eq!(fixed.delay_before(2), Duration::from_millis(100));
        assert_eq!(fixed.delay_before(5), Duration::from_millis(100));

        let linear = RetryBackoff {
            strategy: BackoffStrategy::Linear,
            ..fixed.clone()
        };
        assert_eq!(linear.delay_before(4), Duration::from_millis(300));

        let exponential = RetryBackoff {
            strategy: BackoffStrategy::Exponential,
            max_delay_ms: 1_000,
            ..fixed
        };
        assert_eq!(exponential.delay_before(2), Duration::from_millis(100));
        assert_eq!(exponential.delay_before(3), Duration::from_millis(200));
        assert_eq!(exponential.delay_before(10), Duration::from_millis(1_000));
    }
}
