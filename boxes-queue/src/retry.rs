use std::{fmt::Display, thread, time::Duration};

use tracing::warn;

/// Bounded exponential backoff for store operations that may fail transiently
///
/// ```
/// use boxes_queue::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
///
/// assert_eq!(policy.attempts, 20);
/// assert_eq!(policy.delay_for(0), Duration::from_millis(50));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(200));
/// assert_eq!(policy.delay_for(10), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first one
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// How long to wait after the failed try numbered `attempt`, counting from zero
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1 << attempt.min(16))
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds or the attempts run out, returning the last error
    pub fn run<T, E: Display>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        let mut attempt = 0;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(error) if attempt + 1 < self.attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(what, attempt, ?delay, %error, "Retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_succeeds_after_failures() {
        let mut calls = 0;

        let result: Result<u32, String> = quick(5).run("flaky", || {
            calls += 1;
            if calls < 3 {
                Err(format!("failure {calls}"))
            } else {
                Ok(calls)
            }
        });

        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_gives_up_with_the_last_error() {
        let mut calls = 0;

        let result: Result<(), String> = quick(4).run("broken", || {
            calls += 1;
            Err(format!("failure {calls}"))
        });

        assert_eq!(result, Err("failure 4".to_owned()));
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let mut calls = 0;

        let result: Result<(), &str> = quick(0).run("once", || {
            calls += 1;
            Err("nope")
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
