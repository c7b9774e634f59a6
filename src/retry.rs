use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::KiraError;

/// Result of one attempt inside [`retry_with`].
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// Try again, after `after` or the policy's backoff when `None`.
    Retry {
        after: Option<Duration>,
        cause: KiraError,
    },
    Fail(KiraError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn linear(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn backoff(&self, attempt: usize) -> Duration {
        self.base_delay * attempt as u32
    }
}

pub fn retry<T, F>(policy: RetryPolicy, op: F) -> Result<T, KiraError>
where
    F: FnMut(usize) -> Attempt<T>,
{
    retry_with(policy, thread::sleep, op)
}

pub fn retry_with<T, F, S>(policy: RetryPolicy, mut sleep: S, mut op: F) -> Result<T, KiraError>
where
    F: FnMut(usize) -> Attempt<T>,
    S: FnMut(Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match op(attempt) {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(err) => return Err(err),
            Attempt::Retry { after, cause } => {
                if attempt >= max_attempts {
                    return Err(KiraError::RetriesExhausted {
                        attempts: attempt,
                        message: cause.to_string(),
                    });
                }
                let delay = after.unwrap_or_else(|| policy.backoff(attempt));
                debug!(attempt, ?delay, error = %cause, "retrying lookup");
                sleep(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const POLICY: RetryPolicy = RetryPolicy::linear(5, Duration::from_millis(500));

    fn transient() -> KiraError {
        KiraError::EnsemblHttp("connection reset".to_string())
    }

    #[test]
    fn linear_backoff_between_attempts() {
        let mut slept = Vec::new();
        let result = retry_with(
            POLICY,
            |delay| slept.push(delay),
            |attempt| {
                if attempt < 3 {
                    Attempt::Retry {
                        after: None,
                        cause: transient(),
                    }
                } else {
                    Attempt::Done(attempt)
                }
            },
        );
        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            slept,
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[test]
    fn fixed_pause_overrides_backoff() {
        let mut slept = Vec::new();
        let _ = retry_with(
            POLICY,
            |delay| slept.push(delay),
            |attempt| {
                if attempt == 1 {
                    Attempt::Retry {
                        after: Some(Duration::from_secs(5)),
                        cause: transient(),
                    }
                } else {
                    Attempt::Done(())
                }
            },
        );
        assert_eq!(slept, vec![Duration::from_secs(5)]);
    }

    #[test]
    fn exhaustion_is_bounded() {
        let mut calls = 0;
        let err = retry_with(
            POLICY,
            |_| {},
            |_| -> Attempt<()> {
                calls += 1;
                Attempt::Retry {
                    after: None,
                    cause: transient(),
                }
            },
        )
        .unwrap_err();
        assert_eq!(calls, 5);
        assert_matches!(err, KiraError::RetriesExhausted { attempts: 5, .. });
    }

    #[test]
    fn failure_stops_immediately() {
        let mut calls = 0;
        let err = retry_with(
            POLICY,
            |_| {},
            |_| -> Attempt<()> {
                calls += 1;
                Attempt::Fail(KiraError::ServiceUnavailable("down".to_string()))
            },
        )
        .unwrap_err();
        assert_eq!(calls, 1);
        assert_matches!(err, KiraError::ServiceUnavailable(_));
    }
}
