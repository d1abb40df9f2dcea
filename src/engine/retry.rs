//! engine::retry
//!
//! Bounded retry of whole submit attempts.
//!
//! An attempt that fails with a retryable error (a ref lock failure) is run
//! again from scratch after an exponential backoff, until the timeout
//! elapses. The timeout scales with the number of projects in the
//! submission.

use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::core::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// The policy for a submission touching `projects` projects.
    pub fn scaled(&self, projects: usize) -> Self {
        let factor = u32::try_from(projects.max(1)).unwrap_or(u32::MAX);
        Self {
            timeout: self.timeout.saturating_mul(factor),
            ..*self
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Run `attempt` until it succeeds, fails for good or time runs out.
    ///
    /// `attempt` receives the attempt number, starting at 1. Returns the
    /// value and the number of attempts made, or the last error.
    pub fn run<T, E: std::fmt::Display>(
        &self,
        mut attempt: impl FnMut(u32) -> Result<T, E>,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<(T, u32), E> {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut n = 0u32;

        loop {
            n += 1;
            let err = match attempt(n) {
                Ok(value) => return Ok((value, n)),
                Err(e) => e,
            };
            if !is_retryable(&err) || Instant::now() >= deadline {
                return Err(err);
            }

            let delay = self
                .backoff(n)
                .min(deadline.saturating_duration_since(Instant::now()));
            warn!(attempt = n, delay_ms = delay.as_millis() as u64, error = %err, "retrying submit");
            thread::sleep(delay);
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
