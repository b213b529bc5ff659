//! Dispatch from resource kind to provider.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::{KubernetesProvider, MemoryProvider, Provider, RetryPolicy, RetryingProvider};
use crate::config::{DeployConfig, ProviderBackend};
use crate::error::{ConfigError, ProviderError, Result};
use crate::graph::{ResourceId, ResourceKind, ResourceNode};
use crate::state::AppliedState;

/// Providers keyed by the kind they serve.
///
/// The registry is itself a provider that forwards each call to the provider
/// registered for the resource's kind.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ResourceKind, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the provider for a kind, replacing any previous one.
    #[must_use]
    pub fn register(mut self, kind: ResourceKind, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    /// Serves every kind from one provider.
    #[must_use]
    pub fn uniform(provider: Arc<dyn Provider>) -> Self {
        ResourceKind::ALL
            .into_iter()
            .fold(Self::new(), |registry, kind| registry.register(kind, Arc::clone(&provider)))
    }

    /// Wraps every registered provider with retries.
    #[must_use]
    pub fn with_retry(self, policy: RetryPolicy) -> Self {
        let providers = self
            .providers
            .into_iter()
            .map(|(kind, inner)| {
                let wrapped: Arc<dyn Provider> = Arc::new(RetryingProvider::new(inner, policy));
                (kind, wrapped)
            })
            .collect();
        Self { providers }
    }

    /// Builds the registry described by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the kubernetes backend has no API server or its
    /// HTTP client cannot be created.
    pub fn from_config(config: &DeployConfig, token: Option<String>) -> Result<Self> {
        let registry = match config.provider.backend {
            ProviderBackend::Memory => {
                info!("Using in-memory provider");
                Self::uniform(Arc::new(MemoryProvider::new()))
            }
            ProviderBackend::Kubernetes => {
                let api_server = config.provider.api_server.as_deref().ok_or_else(|| {
                    ConfigError::validation(
                        "API server URL is required for the kubernetes backend",
                        "provider.api_server",
                    )
                })?;
                info!(
                    "Using Kubernetes provider at {api_server} (namespace {})",
                    config.project.namespace
                );
                ResourceKind::ALL.into_iter().try_fold(Self::new(), |registry, kind| {
                    let provider = KubernetesProvider::new(
                        kind,
                        api_server,
                        &config.project.namespace,
                        token.clone(),
                        config.provider.timeout_secs,
                    )?;
                    Ok::<_, crate::error::KeelError>(registry.register(kind, Arc::new(provider)))
                })?
            }
        };

        Ok(registry.with_retry(RetryPolicy::from(&config.execution.retry)))
    }

    /// Returns the provider for a kind.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` if no provider is registered for the kind.
    pub fn get(&self, kind: ResourceKind) -> std::result::Result<&Arc<dyn Provider>, ProviderError> {
        self.providers.get(&kind).ok_or_else(|| ProviderError::Unsupported {
            kind: kind.to_string(),
        })
    }
}

#[async_trait]
impl Provider for ProviderRegistry {
    async fn create(&self, node: &ResourceNode) -> std::result::Result<AppliedState, ProviderError> {
        self.get(node.id.kind)?.create(node).await
    }

    async fn read(&self, id: &ResourceId) -> std::result::Result<Option<AppliedState>, ProviderError> {
        self.get(id.kind)?.read(id).await
    }

    async fn update(
        &self,
        node: &ResourceNode,
        prior: &AppliedState,
    ) -> std::result::Result<AppliedState, ProviderError> {
        self.get(node.id.kind)?.update(node, prior).await
    }

    async fn delete(&self, prior: &AppliedState) -> std::result::Result<(), ProviderError> {
        self.get(prior.id.kind)?.delete(prior).await
    }

    fn name(&self) -> &'static str {
        "registry"
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<(&str, &str)> = self
            .providers
            .iter()
            .map(|(kind, p)| (kind.as_str(), p.name()))
            .collect();
        kinds.sort_unstable();
        f.debug_struct("ProviderRegistry")
            .field("providers", &kinds)
            .finish()
    }
}
