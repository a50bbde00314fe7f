//! Bounded retry with exponential backoff.
//!
//! One policy type is shared by generation, publishing and reporting. Each
//! caller supplies the operation and a predicate deciding which errors are
//! worth another attempt; everything else is returned immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry configuration: attempt cap plus backoff schedule.
///
/// # Invariants
/// - `max_attempts >= 1` (the first call always happens)
/// - delays never exceed `max_delay`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Cap applied after doubling
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Exponential backoff starting at one second.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Retries without sleeping (tests).
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay to wait after the given failed attempt (0-based).
    ///
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay after a failed attempt when the server asked for one.
    ///
    /// The longer of the backoff and the hint, still capped at `max_delay`.
    pub fn wait_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let backoff = self.delay_for(attempt);
        hint.map_or(backoff, |h| backoff.max(h)).min(self.max_delay)
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// attempt cap is reached. The last error is returned on exhaustion.
    ///
    /// `op` receives the 0-based attempt number.
    pub async fn run<T, E, F, Fut, P>(&self, label: &str, op: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        self.run_with_hint(label, op, is_retryable, |_| None).await
    }

    /// [`run`](Self::run), also honoring a server-provided `Retry-After`.
    pub async fn run_with_hint<T, E, F, Fut, P, H>(
        &self,
        label: &str,
        mut op: F,
        is_retryable: P,
        retry_after: H,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        H: Fn(&E) -> Option<Duration>,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!("{} succeeded after {} retries", label, attempt);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let retryable = is_retryable(&error);
                    if !retryable || attempt + 1 >= self.max_attempts {
                        if retryable {
                            tracing::error!(
                                "{} failed after {} attempts: {}",
                                label,
                                attempt + 1,
                                error
                            );
                        } else {
                            tracing::error!("{} failed (non-retryable): {}", label, error);
                        }
                        return Err(error);
                    }

                    let delay = self.wait_for(attempt, retry_after(&error));
                    tracing::warn!(
                        "{} attempt {} failed, retrying in {:?}: {}",
                        label,
                        attempt + 1,
                        delay,
                        error
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
