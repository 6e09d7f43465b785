// src/blocks/database/retry.rs
// Bounded exponential backoff for transient SQLite contention.

use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: usize, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Delay before retry number `retry` (1-based): base, 2*base, 4*base, ...
    pub fn delay_for(&self, retry: usize) -> Duration {
        let shift = retry.saturating_sub(1).min(16) as u32;
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

/// Runs `op` until it succeeds, fails with an error `is_transient` rejects, or
/// the attempts run out. The last error is returned.
pub fn retry_with_backoff<T, E, F, P>(policy: &RetryPolicy, is_transient: P, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts && is_transient(&e) => {
                let delay = policy.delay_for(attempt);
                debug!("Transient storage error, retry {} of {} in {:?}", attempt, attempts - 1, delay);
                attempt += 1;
                std::thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}
