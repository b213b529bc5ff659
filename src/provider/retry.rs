//! Retrying wrapper around a provider.
//!
//! Transient failures are retried with capped exponential backoff. Any other
//! failure is returned at once.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::Provider;
use crate::config::RetryConfig;
use crate::error::ProviderError;
use crate::graph::{ResourceId, ResourceNode};
use crate::state::AppliedState;

/// Backoff schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// A provider that retries transient failures of the provider it wraps.
pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    /// Wraps `inner` with the given policy.
    #[must_use]
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn run<T, F, Fut>(&self, action: &str, id: &ResourceId, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt);
                    debug!(
                        "{action} {id} failed (attempt {attempt}/{}), retrying in {delay:?}: {e}",
                        self.policy.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    warn!("{action} {id} failed after {attempt} attempts: {e}");
                    return Err(ProviderError::RetriesExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    async fn create(&self, node: &ResourceNode) -> Result<AppliedState, ProviderError> {
        self.run("create", &node.id, || self.inner.create(node)).await
    }

    async fn read(&self, id: &ResourceId) -> Result<Option<AppliedState>, ProviderError> {
        self.run("read", id, || self.inner.read(id)).await
    }

    async fn update(
        &self,
        node: &ResourceNode,
        prior: &AppliedState,
    ) -> Result<AppliedState, ProviderError> {
        self.run("update", &node.id, || self.inner.update(node, prior))
            .await
    }

    async fn delete(&self, prior: &AppliedState) -> Result<(), ProviderError> {
        self.run("delete", &prior.id, || self.inner.delete(prior)).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

impl std::fmt::Debug for RetryingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingProvider")
            .field("inner", &self.inner.name())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Attributes, ResourceKind};
    use crate::provider::MockProvider;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn prior() -> AppliedState {
        AppliedState::new(
            ResourceId::new(ResourceKind::Deployment, "redis"),
            Attributes::default(),
            String::from("hash"),
            BTreeSet::new(),
        )
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(4), Duration::from_millis(1000));
        assert_eq!(policy.delay(40), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let mut mock = MockProvider::new();
        mock.expect_delete().times(3).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::transient("503 Service Unavailable"))
            } else {
                Ok(())
            }
        });

        let provider = RetryingProvider::new(Arc::new(mock), policy(5));
        tokio_test::assert_ok!(provider.delete(&prior()).await);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let mut mock = MockProvider::new();
        mock.expect_delete()
            .times(3)
            .returning(|_| Err(ProviderError::transient("connection reset")));

        let provider = RetryingProvider::new(Arc::new(mock), policy(3));
        let err = provider.delete(&prior()).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::RetriesExhausted {
                attempts: 3,
                last_error: String::from("Transient provider failure: connection reset"),
            }
        );
    }

    #[tokio::test]
    async fn test_permanent_is_not_retried() {
        let mut mock = MockProvider::new();
        mock.expect_delete()
            .times(1)
            .returning(|_| Err(ProviderError::permanent("422 Unprocessable Entity")));

        let provider = RetryingProvider::new(Arc::new(mock), policy(5));
        let err = provider.delete(&prior()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Permanent { .. }));
    }
}
