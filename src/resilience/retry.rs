//! Bounded exponential backoff for transient failures.

use crate::audit::{AuditLog, Severity};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for one class of external call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay_ms: u64,
    /// Upper bound on any single delay
    pub max_delay_ms: u64,
    /// Scale each delay by a random factor in [0.5, 1.0)
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        }
    }

    /// Un-jittered delay before attempt `attempt + 1` (`attempt` is 1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay_ms.saturating_mul(1_u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    fn delay(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if self.jitter {
            backoff.mul_f64(rand::random::<f64>().mul_add(0.5, 0.5))
        } else {
            backoff
        }
    }
}

/// Run `call` until it succeeds, fails deterministically, or attempts run out
///
/// Only errors with [`Error::is_transient`] are retried. Exhausting the
/// budget yields [`Error::RetriesExhausted`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    audit: Option<&AuditLog>,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= max_attempts => {
                if max_attempts == 1 {
                    return Err(err);
                }
                if let Some(audit) = audit {
                    audit.record(
                        Severity::Warning,
                        "external.retries_exhausted",
                        format!("{operation} failed after {attempt} attempts: {err}"),
                    );
                }
                return Err(Error::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last: err.to_string(),
                });
            }
            Err(err) => {
                let delay = policy.delay(attempt);
                warn!(
                    operation,
                    attempt,
                    backoff_ms = delay.as_millis(),
                    error = %err,
                    "transient failure, retrying"
                );
                if let Some(audit) = audit {
                    audit.record(
                        Severity::Info,
                        "external.retry",
                        format!("{operation} attempt {attempt} failed: {err}"),
                    );
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: true,
        }
    }

    fn transient() -> Error {
        Error::Git {
            operation: "fetch".to_string(),
            message: "Could not resolve host".to_string(),
            transient: true,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter: false,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&fast(4), "op", None, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn deterministic_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(&fast(4), "op", None, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::RefNotFound("main".to_string()))
        })
        .await;
        assert!(matches!(result, Err(Error::RefNotFound(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_is_reported() {
        let (audit, sink) = AuditLog::in_memory();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(&fast(3), "push", Some(&audit), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;
        match result {
            Err(Error::RetriesExhausted {
                operation,
                attempts,
                ..
            }) => {
                assert_eq!(operation, "push");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(sink.in_category("external.retry").len(), 2);
        assert_eq!(sink.in_category("external.retries_exhausted").len(), 1);
    }

    #[tokio::test]
    async fn single_attempt_policy_returns_original_error() {
        let result: Result<()> =
            with_retry(&RetryPolicy::none(), "update-ref", None, || async { Err(transient()) })
                .await;
        assert!(matches!(result, Err(Error::Git { .. })));
    }
}
