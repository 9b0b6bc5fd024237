use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::pipeline_config::{PipelineConfig, RetryBackoff};
use crate::detection::domain::inference_engine::InferenceError;

/// Granularity at which retry sleeps notice cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Error, Debug, Clone, PartialEq)]
#[error("gave up after {attempts} attempts: {last_error}")]
pub struct RetriesExhausted {
    pub attempts: u32,
    pub last_error: InferenceError,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetryError {
    #[error(transparent)]
    Exhausted(#[from] RetriesExhausted),
    #[error("cancelled while retrying")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff: RetryBackoff,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay(),
            backoff: config.retry_backoff,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.retry_delay,
            RetryBackoff::Exponential => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.retry_delay.saturating_mul(factor)
            }
        }
    }
}

/// Bounds how long the pipeline keeps trying before detection is declared
/// unavailable.
///
/// Model loading is retried in place with a delay between attempts.
/// Inference failures are counted across ticks instead: every failing tick
/// is one attempt and any successful tick resets the count.
pub struct RetryGovernor {
    policy: RetryPolicy,
    consecutive_failures: u32,
    cancelled: Arc<AtomicBool>,
}

impl RetryGovernor {
    pub fn new(policy: RetryPolicy, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            cancelled,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Runs `op` up to `max_retries` times, sleeping between failures.
    pub fn retry<T>(
        &self,
        mut op: impl FnMut() -> Result<T, InferenceError>,
    ) -> Result<T, RetryError> {
        let mut attempt = 0;
        loop {
            if self.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            attempt += 1;
            let error = match op() {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if attempt >= self.policy.max_retries {
                log::error!("Attempt {attempt}/{} failed: {error}", self.policy.max_retries);
                return Err(RetriesExhausted {
                    attempts: attempt,
                    last_error: error,
                }
                .into());
            }
            let delay = self.policy.delay_after(attempt);
            log::warn!(
                "Attempt {attempt}/{} failed: {error}; retrying in {}ms",
                self.policy.max_retries,
                delay.as_millis()
            );
            if !self.sleep(delay) {
                return Err(RetryError::Cancelled);
            }
        }
    }

    /// Counts one failing tick. Errors once the streak reaches the limit.
    pub fn record_failure(&mut self, error: &InferenceError) -> Result<(), RetriesExhausted> {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.policy.max_retries {
            return Err(RetriesExhausted {
                attempts: self.consecutive_failures,
                last_error: error.clone(),
            });
        }
        log::warn!(
            "Inference failed ({}/{}): {error}",
            self.consecutive_failures,
            self.policy.max_retries
        );
        Ok(())
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            log::info!(
                "Inference recovered after {} failed ticks",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns `false` if cancellation interrupted the sleep.
    fn sleep(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(CANCEL_POLL_INTERVAL));
        }
    }
}
