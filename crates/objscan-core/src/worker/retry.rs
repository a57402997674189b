//! Retry and backoff policies.
//!
//! The worker asks a strategy how long to back off after the process goes
//! away or a locate pass comes up empty; one-shot callers can use
//! [`RetryStrategy::execute`] to retry a torn read directly.

use std::time::Duration;

use crate::config::WorkerConfig;
use crate::config::retry as retry_config;

/// How many times to try, and how long to wait after each failure.
pub trait RetryStrategy {
    /// Maximum number of attempts made by [`execute`](Self::execute).
    fn max_attempts(&self) -> u32;

    /// Delay after the given failed attempt (0-indexed).
    fn delay_for_attempt(&self, attempt: u32) -> Option<Duration>;

    /// Calls `f` up to `max_attempts()` times, sleeping between failures.
    /// Returns the last error when every attempt fails.
    fn execute<T, E, F>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        let max = self.max_attempts().max(1);
        let mut attempt = 0;
        loop {
            match f(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 >= max => return Err(e),
                Err(_) => {
                    if let Some(delay) = self.delay_for_attempt(attempt) {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Exponential backoff over a fixed delay table.
///
/// Attempts past the end of the table keep using the last delay.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    delays: Vec<Duration>,
}

impl ExponentialBackoff {
    pub fn new(delays_ms: &[u64]) -> Self {
        Self {
            delays: delays_ms.iter().map(|&ms| Duration::from_millis(ms)).collect(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(&config.backoff_delays_ms)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(&retry_config::BACKOFF_DELAYS_MS)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.delays.len() as u32
    }

    fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        let index = (attempt as usize).min(self.delays.len().checked_sub(1)?);
        self.delays.get(index).copied()
    }
}

/// The same pause after every failure.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    max_attempts: u32,
    delay: Duration,
}

impl FixedDelay {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl RetryStrategy for FixedDelay {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_for_attempt(&self, _attempt: u32) -> Option<Duration> {
        Some(self.delay)
    }
}
