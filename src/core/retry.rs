//! Retry policy for readiness stages

use serde::Serialize;
use std::time::Duration;

/// Outcome of a retry decision after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the interval, then try again
    Retry,
    /// All attempts have been used
    Exhausted,
    /// The overall time budget has run out
    BudgetExceeded,
}

/// Bounded polling policy: attempts, spacing, and time limits
///
/// `overall_timeout >= max_attempts * (interval + attempt_timeout)` is the
/// natural bound but is not enforced; a tighter budget fails fast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Maximum number of probe invocations (at least 1)
    pub max_attempts: u32,

    /// Sleep between attempts; zero busy-polls
    pub interval: Duration,

    /// Upper bound for a single probe invocation
    pub attempt_timeout: Duration,

    /// Wall-clock budget for the whole stage
    pub overall_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            attempt_timeout: Duration::from_secs(30),
            overall_timeout: None,
        }
    }

    /// Verify once, no retry
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_overall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.overall_timeout = timeout;
        self
    }

    /// Decide what to do after attempt `attempt` (1-indexed) failed,
    /// `elapsed` after the stage started.
    pub fn decide(&self, attempt: u32, elapsed: Duration) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::Exhausted;
        }
        match self.overall_timeout {
            Some(budget) if elapsed >= budget => RetryDecision::BudgetExceeded,
            _ => RetryDecision::Retry,
        }
    }

    /// Time left in the overall budget, if one is set
    pub fn remaining(&self, elapsed: Duration) -> Option<Duration> {
        self.overall_timeout.map(|budget| budget.saturating_sub(elapsed))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(30, Duration::from_secs(10))
    }
}

/// Convert config seconds into a duration; negative or NaN values become zero
pub fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}
