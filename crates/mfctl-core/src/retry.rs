//! Bounded retry for remote transfers.
//!
//! Only transport failures are retried. A missing remote file is a
//! legitimate answer and is returned immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::constants::MAX_TRANSFER_ATTEMPTS;
use crate::constants::MAX_TRANSFER_RETRY_DELAY_MS;
use crate::error::ErrorKind;
use crate::error::RemoteError;

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    ///
    /// Tiger Style: attempts are clamped to `1..=MAX_TRANSFER_ATTEMPTS` and the
    /// delay to `MAX_TRANSFER_RETRY_DELAY_MS`.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.clamp(1, MAX_TRANSFER_ATTEMPTS),
            delay: delay.min(Duration::from_millis(MAX_TRANSFER_RETRY_DELAY_MS)),
        }
    }

    /// A single attempt, no retry.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Maximum number of attempts.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run `op` until it succeeds, fails with a non-transport error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.kind() == ErrorKind::Transport && attempt < self.attempts => {
                    warn!(operation, attempt, max_attempts = self.attempts, error = %err, "transfer failed, retrying");
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use super::*;

    fn transport() -> RemoteError {
        RemoteError::Transport {
            node: "n".into(),
            operation: "download".into(),
            message: "timeout".into(),
        }
    }

    #[test]
    fn test_attempts_are_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
        assert_eq!(RetryPolicy::new(100, Duration::ZERO).attempts(), MAX_TRANSFER_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_retries_transport_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result = policy
            .run("download", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transport())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let result: Result<(), _> = policy
            .run("download", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transport())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let result: Result<(), _> = policy
            .run("download", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::NotFound {
                    node: "n".into(),
                    path: "x".into(),
                })
            })
            .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
