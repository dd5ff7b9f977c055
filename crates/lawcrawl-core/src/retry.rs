//! Retry with exponential backoff for per-URL work

use std::time::Duration;

use indicatif::ProgressBar;

use crate::error::CrawlError;
use crate::shutdown::CancellationToken;

/// Attempt budget and backoff base for one unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each further failure
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff after `failed` failures: base, 2*base, 4*base, ...
    pub fn backoff(&self, failed: u32) -> Duration {
        self.base * 2u32.saturating_pow(failed.saturating_sub(1))
    }

    /// Run `attempt_fn` until it succeeds, fails permanently, or the attempt
    /// budget is spent.
    ///
    /// The token is checked at the top of every attempt and during backoff;
    /// cancellation yields [`CrawlError::Cancelled`]. `attempt_fn` receives the
    /// 1-based attempt number.
    pub fn run<T>(
        &self,
        label: &str,
        token: &CancellationToken,
        pb: &ProgressBar,
        mut attempt_fn: impl FnMut(u32) -> Result<T, CrawlError>,
    ) -> Result<T, CrawlError> {
        let mut attempt = 1u32;
        loop {
            if token.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }
            match attempt_fn(attempt) {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_attempts && e.is_retryable() => {
                    let delay = self.backoff(attempt);
                    pb.set_message(format!("retry {attempt}/{}...", self.max_attempts - 1));
                    log::debug!(
                        "{label}: attempt {attempt}/{} failed: {e}, retrying in {}ms",
                        self.max_attempts,
                        delay.as_millis()
                    );
                    if !token.sleep(delay) {
                        return Err(CrawlError::Cancelled);
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if !e.is_cancelled() {
                        log::warn!("{label}: failed after {attempt} attempt(s): {e}");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_exponential() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
        assert_eq!(p.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn stops_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), _> =
            quick().run("t", &CancellationToken::new(), &ProgressBar::hidden(), |_| {
                calls += 1;
                Err(CrawlError::TransientNetwork("reset".into()))
            });
        assert!(matches!(result, Err(CrawlError::TransientNetwork(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn succeeds_on_second_attempt() {
        let result = quick().run("t", &CancellationToken::new(), &ProgressBar::hidden(), |n| {
            if n == 1 {
                Err(CrawlError::navigation("u", "timeout"))
            } else {
                Ok(n)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn fatal_error_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> =
            quick().run("t", &CancellationToken::new(), &ProgressBar::hidden(), |_| {
                calls += 1;
                Err(CrawlError::Authentication("expired".into()))
            });
        assert!(matches!(result, Err(CrawlError::Authentication(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let mut calls = 0;
        let result: Result<(), _> = quick().run("t", &token, &ProgressBar::hidden(), |_| {
            calls += 1;
            Ok(())
        });
        assert!(matches!(result, Err(CrawlError::Cancelled)));
        assert_eq!(calls, 0);
    }

    #[test]
    fn cancel_during_backoff() {
        let token = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: 3,
            base: Duration::from_secs(30),
        };
        let t = token.clone();
        let result: Result<(), _> = policy.run("t", &token, &ProgressBar::hidden(), |_| {
            t.cancel();
            Err(CrawlError::TransientNetwork("reset".into()))
        });
        assert!(matches!(result, Err(CrawlError::Cancelled)));
    }
}
