//! Reconnect policy for broker connections, per §4.1: "Open a connection
//! with reconnect policy (wait, max attempts, connect timeout)."

use std::time::Duration;

use crate::resilience::{RetryConfig, RetryExecutor};

/// Governs how a [`super::Broker`] implementation re-establishes a
/// dropped connection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Wait between reconnect attempts (base of the backoff).
    pub wait: Duration,
    /// Maximum number of reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Timeout for a single connect attempt.
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            wait: Duration::from_millis(500),
            max_attempts: 10,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Builds a [`RetryExecutor`] reflecting this policy, reusing the
    /// shared exponential-backoff-with-jitter implementation.
    pub fn executor(&self) -> RetryExecutor {
        let config = RetryConfig::new(self.max_attempts)
            .with_initial_interval(self.wait)
            .with_max_elapsed_time(None);
        RetryExecutor::new(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_has_finite_attempts() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 10);
    }

    #[tokio::test]
    async fn executor_retries_up_to_max_attempts() {
        let policy = ReconnectPolicy {
            wait: Duration::from_millis(1),
            max_attempts: 2,
            connect_timeout: Duration::from_millis(50),
        };
        let executor = policy.executor();
        let result = executor
            .execute("connect", || async {
                Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "down"))
            })
            .await;
        assert_eq!(result.unwrap_err().attempts, 3);
    }
}
