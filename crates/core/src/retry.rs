// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exponential backoff policy shared by handler retry and lock acquisition

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry with delays of `initial_delay_ms * backoff_exponent^attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_exponent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            backoff_exponent: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay_ms: u64, backoff_exponent: f64) -> Self {
        Self {
            max_retries,
            initial_delay_ms,
            backoff_exponent,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            backoff_exponent: 1.0,
        }
    }

    /// Delay before re-running attempt number `attempt` (zero-based: the
    /// delay after the first failure is `delay(0)`).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_exponent.max(0.0).powi(attempt as i32);
        let ms = (self.initial_delay_ms as f64 * factor).min(u64::MAX as f64);
        Duration::from_millis(ms as u64)
    }

    /// True while `attempt` (zero-based count of failures so far) is still
    /// within budget.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
