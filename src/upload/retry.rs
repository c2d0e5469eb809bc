//! Per-chunk retry policy
//!
//! Linear backoff: the n-th retry of a chunk waits `n * base_delay`. With the
//! defaults (3 retries, 1 s) a chunk spends at most 6 s sleeping before the
//! task gives up.

use crate::config::UploadConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.max_retries, config.retry_base_delay())
    }

    /// Whether another attempt is allowed after `failures` failed attempts
    pub fn should_retry(&self, failures: u32) -> bool {
        failures <= self.max_retries
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }

    /// Sum of all backoff delays if every retry is used
    pub fn worst_case_delay(&self) -> Duration {
        (1..=self.max_retries).fold(Duration::ZERO, |acc, n| {
            acc.saturating_add(self.delay(n))
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}
