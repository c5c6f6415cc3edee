//! Two-tier retry policy.
//!
//! A failed attempt moves a task through:
//! ShortRetry (exponential backoff) → LongRetry (escalation, counters reset,
//! highest priority) → PermanentFailure.

use std::time::Duration;

use crate::domain::{EvaluationTask, HIGHEST_PRIORITY};

/// What to do with a task after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue after `delay`; `attempt` is the upcoming attempt number in this cycle
    ShortRetry { delay: Duration, attempt: u32 },
    /// Short retries exhausted; requeue after `delay` as escalation `cycle`
    LongRetry { delay: Duration, cycle: u32 },
    /// Give up and hand off to manual review
    PermanentFailure { total_attempts: u32 },
}

impl RetryDecision {
    pub fn delay(&self) -> Option<Duration> {
        match self {
            RetryDecision::ShortRetry { delay, .. } | RetryDecision::LongRetry { delay, .. } => Some(*delay),
            RetryDecision::PermanentFailure { .. } => None,
        }
    }
}

/// Retry timing knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_delay_base: Duration,
    pub max_retry_delay: Duration,
    pub long_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_delay_base: Duration::from_secs(30),
            max_retry_delay: Duration::from_secs(300),
            long_retry_delay: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^(retry_count - 1), max)` for `retry_count >= 1`
    pub fn short_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(31);
        let factor = 2u32.pow(exponent);
        self.retry_delay_base
            .checked_mul(factor)
            .unwrap_or(self.max_retry_delay)
            .min(self.max_retry_delay)
    }

    /// Record a failed attempt on `task` and decide what happens next
    ///
    /// Mutates the task's counters and priority; the caller only schedules.
    pub fn on_failure(&self, task: &mut EvaluationTask, error: &str) -> RetryDecision {
        task.retry_count += 1;
        task.last_error = error.to_string();

        if task.retry_count < task.max_retries {
            return RetryDecision::ShortRetry {
                delay: self.short_delay(task.retry_count),
                attempt: task.retry_count + 1,
            };
        }

        task.long_retry_count += 1;
        if task.long_retry_count <= task.max_long_retries {
            task.retry_count = 0;
            task.priority = HIGHEST_PRIORITY;
            return RetryDecision::LongRetry {
                delay: self.long_retry_delay,
                cycle: task.long_retry_count,
            };
        }

        RetryDecision::PermanentFailure {
            total_attempts: task.attempt_budget(),
        }
    }
}
