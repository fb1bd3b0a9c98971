//! Retry with exponential backoff
//!
//! One backoff shape (10ms doubling, capped at 1000ms by default) serves two
//! loops:
//! - [`retry_transient`]: idempotent HTTP reads, bounded by attempt count,
//!   only [`ReconcileError::TransientFetch`] is retried
//! - [`retry_on_lock`]: ledger statements, bounded by elapsed time, only
//!   SQLite lock contention is retried
//!
//! Writes to the knowledge base must never go through here.

use std::time::{Duration, Instant};

use crate::error::ReconcileResult;

/// Retry policy for reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    fn backoff(&self) -> Backoff {
        Backoff {
            next_ms: self.initial_backoff_ms,
            max_ms: self.max_backoff_ms,
        }
    }
}

/// Doubling delay between attempts
#[derive(Debug, Clone, Copy)]
struct Backoff {
    next_ms: u64,
    max_ms: u64,
}

impl Backoff {
    fn next_ms(&self) -> u64 {
        self.next_ms
    }

    async fn wait(&mut self) {
        tokio::time::sleep(Duration::from_millis(self.next_ms)).await;
        self.next_ms = (self.next_ms * 2).min(self.max_ms);
    }
}

/// Run `operation` until it succeeds, fails non-transiently, or attempts run out
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> ReconcileResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ReconcileResult<T>>,
{
    let mut attempt = 0;
    let mut backoff = policy.backoff();

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(operation = operation_name, attempt, "Read succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.next_ms(),
                    error = %err,
                    "Transient failure, will retry after backoff"
                );
                backoff.wait().await;
            }
            Err(err) => {
                if err.is_transient() {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Transient failure persisted, giving up"
                    );
                }
                return Err(err);
            }
        }
    }
}

/// Run a ledger statement, retrying on `database is locked` until `max_wait_ms` elapses
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> lcnn_common::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = lcnn_common::Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0;
    let mut backoff = RetryPolicy::default().backoff();

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if !err.is_database_locked() => return Err(err),
            Err(_) if start_time.elapsed() >= max_duration => {
                let elapsed = start_time.elapsed();
                tracing::error!(
                    operation = operation_name,
                    attempt,
                    elapsed_ms = elapsed.as_millis(),
                    "Ledger still locked, giving up"
                );
                return Err(lcnn_common::Error::Internal(format!(
                    "Database locked after {} attempts ({} ms elapsed, max {} ms)",
                    attempt,
                    elapsed.as_millis(),
                    max_wait_ms
                )));
            }
            Err(_) => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.next_ms(),
                    "Ledger locked, will retry after backoff"
                );
                backoff.wait().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcileError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_transient_then_success() {
        let attempts = AtomicU32::new(0);

        let result = retry_transient("test_op", RetryPolicy::default(), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ReconcileError::TransientFetch("503".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);

        let result: ReconcileResult<()> = retry_transient("test_op", RetryPolicy::with_attempts(2), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ReconcileError::TransientFetch("timeout".into())) }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_not_retried() {
        let attempts = AtomicU32::new(0);

        let result: ReconcileResult<()> = retry_transient("test_op", RetryPolicy::default(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ReconcileError::MalformedInput("bad xml".into())) }
        })
        .await;

        assert!(matches!(result, Err(ReconcileError::MalformedInput(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backoff_doubles_up_to_cap() {
        let mut backoff = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 1,
            max_backoff_ms: 3,
        }
        .backoff();

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(backoff.next_ms());
            backoff.wait().await;
        }
        assert_eq!(seen, vec![1, 2, 3, 3]);
    }

    #[tokio::test]
    async fn test_lock_retry_non_lock_error_fails_immediately() {
        let attempts = AtomicU32::new(0);

        let result: lcnn_common::Result<()> = retry_on_lock("test_op", 5000, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(lcnn_common::Error::Internal("other error".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lock_retry_first_attempt() {
        let result = retry_on_lock("test_op", 5000, || async { Ok::<i32, lcnn_common::Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
