use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Bounded exponential backoff. Delay before retry `n` (0-based) is
/// `base * 2^n` plus up to a second of jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// No sleeping between attempts. For tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let backoff = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_cap = self.base_delay.as_millis().min(1000) as u64;
        let jitter = Duration::from_millis(rand::rng().random_range(0..=jitter_cap));
        backoff + jitter
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was not transient; no further attempts were made.
    Permanent { attempts: u32, error: E },
    /// Every attempt failed with a transient error.
    Exhausted { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent { error, .. } | RetryError::Exhausted { error, .. } => error,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
pub async fn with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if !is_transient(&error) => {
                return Err(RetryError::Permanent {
                    attempts: attempt + 1,
                    error,
                });
            }
            Err(error) if attempt + 1 >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt + 1,
                    error,
                });
            }
            Err(error) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    op = label,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, RetryError<String>> =
            with_retry(RetryPolicy::immediate(3), "test", |_| true, move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("flaky {n}"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), RetryError<String>> =
            with_retry(RetryPolicy::immediate(3), "test", |_| true, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), RetryError<String>> =
            with_retry(RetryPolicy::immediate(5), "test", |_| false, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("missing key".to_string())
            })
            .await;
        assert!(matches!(result, Err(RetryError::Permanent { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let first = policy.delay_for(0);
        let third = policy.delay_for(2);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(200));
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));
    }

    #[test]
    fn zero_base_never_sleeps() {
        assert_eq!(RetryPolicy::immediate(3).delay_for(4), Duration::ZERO);
    }
}
