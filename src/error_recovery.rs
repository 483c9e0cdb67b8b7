//! Retry policies for recovering broken peer connections.
//!
//! A worker whose remote call failed closes its connection and redials it through
//! [`handle_recoverable_error`]. The migration engine uses an unbounded policy with a
//! fixed delay, so a worker stays parked here until its peer is reachable again.

use crate::error::{MigrateError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Delay between reconnection attempts used by migration workers.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Defines a policy for retrying an operation.
///
/// # Example
///
/// ```rust
/// use graph_migrate::error_recovery::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy {
///     max_attempts: Some(5),
///     backoff_delay: Duration::from_millis(200),
/// };
/// assert!(!policy.is_unbounded());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of attempts, or `None` to retry forever.
    pub max_attempts: Option<u32>,

    /// The constant delay slept after each failed attempt.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    /// Retries forever every [`DEFAULT_RECONNECT_DELAY`].
    fn default() -> Self {
        Self::unbounded(DEFAULT_RECONNECT_DELAY)
    }
}

impl RetryPolicy {
    /// Policy that never gives up.
    pub fn unbounded(backoff_delay: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff_delay,
        }
    }

    /// True if the policy retries forever.
    pub fn is_unbounded(&self) -> bool {
        self.max_attempts.is_none()
    }
}

/// An asynchronous resource that can be brought back after a failure.
///
/// ```rust,ignore
/// #[async_trait]
/// impl Recoverable<MigrateError> for PeerConnection {
///     async fn recover(&mut self) -> Result<(), MigrateError> {
///         self.conn = self.dialer.dial(&self.addr).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Recoverable<E> {
    /// Attempts to recover once.
    async fn recover(&mut self) -> std::result::Result<(), E>;
}

/// Calls `recover` until it succeeds or the policy runs out of attempts.
///
/// Returns the number of attempts it took.
pub async fn handle_recoverable_error<T>(recoverable: &mut T, policy: &RetryPolicy) -> Result<u32>
where
    T: Recoverable<MigrateError> + Send,
{
    let mut attempts = 0u32;
    loop {
        attempts = attempts.saturating_add(1);
        match recoverable.recover().await {
            Ok(()) => return Ok(attempts),
            Err(e) => {
                warn!(attempt = attempts, error = %e, "Recovery attempt failed");
            }
        }
        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(MigrateError::Transport(format!(
                "Failed to recover after {attempts} attempts."
            )));
        }
        sleep(policy.backoff_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockRecoverable {
        attempts: u32,
        succeed_on_attempt: u32,
    }

    #[async_trait]
    impl Recoverable<MigrateError> for MockRecoverable {
        async fn recover(&mut self) -> Result<()> {
            self.attempts += 1;
            if self.attempts >= self.succeed_on_attempt {
                Ok(())
            } else {
                Err(MigrateError::Transport("connection refused".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_retry_logic_succeeds() {
        let mut recoverable = MockRecoverable {
            attempts: 0,
            succeed_on_attempt: 2,
        };
        let policy = RetryPolicy {
            max_attempts: Some(3),
            backoff_delay: Duration::from_millis(10),
        };
        let result = handle_recoverable_error(&mut recoverable, &policy).await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(recoverable.attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_logic_fails() {
        let mut recoverable = MockRecoverable {
            attempts: 0,
            succeed_on_attempt: 4,
        };
        let policy = RetryPolicy {
            max_attempts: Some(3),
            backoff_delay: Duration::from_millis(10),
        };
        let result = handle_recoverable_error(&mut recoverable, &policy).await;
        assert!(result.is_err());
        assert_eq!(recoverable.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_policy_waits_fixed_delay() {
        let mut recoverable = MockRecoverable {
            attempts: 0,
            succeed_on_attempt: 7,
        };
        let started = tokio::time::Instant::now();
        let attempts = handle_recoverable_error(&mut recoverable, &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(attempts, 7);
        let elapsed = started.elapsed();
        assert!(elapsed >= DEFAULT_RECONNECT_DELAY * 6);
        assert!(elapsed < DEFAULT_RECONNECT_DELAY * 7);
    }
}
