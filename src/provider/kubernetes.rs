//! Kubernetes API provider.
//!
//! One provider instance serves one resource kind. Objects are created with
//! POST, updated with a JSON merge patch, read with GET and removed with
//! DELETE against the namespaced collection of that kind.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, header};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, trace};

use super::Provider;
use super::manifest::{observe, render};
use crate::error::{KeelError, ProviderError, Result};
use crate::graph::{ResourceId, ResourceKind, ResourceNode};
use crate::state::AppliedState;

/// Content type of a JSON merge patch.
const MERGE_PATCH: &str = "application/merge-patch+json";

/// Kubernetes provider for a single resource kind.
#[derive(Debug, Clone)]
pub struct KubernetesProvider {
    client: Client,
    api_server: String,
    namespace: String,
    kind: ResourceKind,
    token: Option<String>,
}

impl KubernetesProvider {
    /// Creates a provider for `kind` in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        kind: ResourceKind,
        api_server: &str,
        namespace: &str,
        token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| KeelError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_server: api_server.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            kind,
            token,
        })
    }

    /// URL of the namespaced collection for this kind.
    fn collection_url(&self) -> String {
        let group = match self.kind {
            ResourceKind::Deployment => "apis/apps/v1",
            ResourceKind::Service => "api/v1",
        };
        format!(
            "{}/{group}/namespaces/{}/{}s",
            self.api_server, self.namespace, self.kind
        )
    }

    fn object_url(&self, name: &str) -> String {
        format!("{}/{name}", self.collection_url())
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        trace!("{method} {url}");
        let builder = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Sends a request, mapping transport failures to transient errors.
    async fn send(&self, builder: RequestBuilder) -> std::result::Result<Response, ProviderError> {
        builder
            .send()
            .await
            .map_err(|e| ProviderError::transient(format!("request to API server failed: {e}")))
    }

    async fn json_body(
        &self,
        id: &ResourceId,
        response: Response,
    ) -> std::result::Result<Value, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ProviderError::transient(format!("invalid response body: {e}")));
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, id, &body))
    }

    fn ensure_kind(&self, id: &ResourceId) -> std::result::Result<(), ProviderError> {
        if id.kind == self.kind {
            Ok(())
        } else {
            Err(ProviderError::Unsupported {
                kind: id.kind.to_string(),
            })
        }
    }

    async fn patch(
        &self,
        node: &ResourceNode,
        manifest: &Value,
    ) -> std::result::Result<Value, ProviderError> {
        let builder = self
            .request(Method::PATCH, &self.object_url(&node.id.name))
            .header(header::CONTENT_TYPE, MERGE_PATCH)
            .body(manifest.to_string());
        let response = self.send(builder).await?;
        self.json_body(&node.id, response).await
    }

    fn applied(node: &ResourceNode, object: &Value) -> AppliedState {
        let state = AppliedState::new(
            node.id.clone(),
            node.attributes.clone(),
            node.hash.clone(),
            node.dependencies.clone(),
        );
        match object["metadata"]["uid"].as_str() {
            Some(uid) => state.with_external_id(uid),
            None => state,
        }
    }
}

/// Maps an unsuccessful HTTP status to a provider error.
fn classify(status: StatusCode, id: &ResourceId, body: &str) -> ProviderError {
    let message = api_message(body).unwrap_or_else(|| body.chars().take(200).collect());
    match status {
        StatusCode::NOT_FOUND => ProviderError::NotFound { id: id.to_string() },
        StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::transient(format!("{id}: throttled by API server: {message}"))
        }
        s if s.is_server_error() => ProviderError::transient(format!("{id}: {s}: {message}")),
        s => ProviderError::permanent(format!("{id}: {s}: {message}")),
    }
}

/// Extracts the message of a Kubernetes `Status` body.
fn api_message(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("message")?
        .as_str()
        .map(ToString::to_string)
}

#[async_trait]
impl Provider for KubernetesProvider {
    async fn create(&self, node: &ResourceNode) -> std::result::Result<AppliedState, ProviderError> {
        self.ensure_kind(&node.id)?;
        let manifest = render(node, &self.namespace);

        let builder = self
            .request(Method::POST, &self.collection_url())
            .json(&manifest);
        let response = self.send(builder).await?;

        let object = if response.status() == StatusCode::CONFLICT {
            info!("{} already exists, adopting it", node.id);
            self.patch(node, &manifest).await?
        } else {
            self.json_body(&node.id, response).await?
        };

        debug!("Created {}", node.id);
        Ok(Self::applied(node, &object))
    }

    async fn read(&self, id: &ResourceId) -> std::result::Result<Option<AppliedState>, ProviderError> {
        self.ensure_kind(id)?;
        let response = self.send(self.request(Method::GET, &self.object_url(&id.name))).await?;

        let object = match self.json_body(id, response).await {
            Ok(object) => object,
            Err(ProviderError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let observed = observe(self.kind, &object)?;
        let mut state = AppliedState::new(
            id.clone(),
            observed.attributes,
            observed.hash.unwrap_or_default(),
            observed.dependencies,
        );
        state.external_id = observed.uid;
        Ok(Some(state))
    }

    async fn update(
        &self,
        node: &ResourceNode,
        prior: &AppliedState,
    ) -> std::result::Result<AppliedState, ProviderError> {
        self.ensure_kind(&node.id)?;
        let manifest = render(node, &self.namespace);
        let object = self.patch(node, &manifest).await?;

        debug!("Updated {} (was {})", node.id, prior.hash);
        Ok(Self::applied(node, &object))
    }

    async fn delete(&self, prior: &AppliedState) -> std::result::Result<(), ProviderError> {
        self.ensure_kind(&prior.id)?;
        let builder = self
            .request(Method::DELETE, &self.object_url(&prior.id.name))
            .query(&[("propagationPolicy", "Background")]);
        let response = self.send(builder).await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!("Deleted {}", prior.id);
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, &prior.id, &body))
    }

    fn name(&self) -> &'static str {
        "kubernetes"
    }
}
