//! The provider trait.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::graph::{ResourceId, ResourceNode};
use crate::state::AppliedState;

/// Create, read, update and delete for one target platform.
///
/// Create and update return the snapshot to record as applied. Failures are
/// typed so callers can tell retryable failures from permanent ones.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates the resource.
    async fn create(&self, node: &ResourceNode) -> Result<AppliedState, ProviderError>;

    /// Reads the resource as currently observed on the platform.
    ///
    /// Returns `None` if it does not exist.
    async fn read(&self, id: &ResourceId) -> Result<Option<AppliedState>, ProviderError>;

    /// Updates the resource from its prior applied state.
    async fn update(
        &self,
        node: &ResourceNode,
        prior: &AppliedState,
    ) -> Result<AppliedState, ProviderError>;

    /// Deletes the resource. Deleting a missing resource succeeds.
    async fn delete(&self, prior: &AppliedState) -> Result<(), ProviderError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}
