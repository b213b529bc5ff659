//! In-process platform.
//!
//! Used as the `memory` sandbox backend and as a test double. Failures can be
//! injected per resource, and every call is logged in order.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::Provider;
use crate::error::ProviderError;
use crate::graph::{ResourceId, ResourceNode};
use crate::state::AppliedState;

/// Kind of call recorded in the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// A create call.
    Create,
    /// A read call.
    Read,
    /// An update call.
    Update,
    /// A delete call.
    Delete,
}

/// One logged provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Which call.
    pub kind: CallKind,
    /// Target resource.
    pub id: ResourceId,
    /// Whether the call succeeded.
    pub succeeded: bool,
}

#[derive(Debug, Clone)]
enum Injected {
    Permanent(String),
    Transient { remaining: u32 },
}

#[derive(Debug, Default)]
struct Platform {
    objects: BTreeMap<ResourceId, AppliedState>,
    failures: BTreeMap<ResourceId, Injected>,
    log: Vec<CallRecord>,
    next_uid: u64,
}

/// In-memory provider for every resource kind.
#[derive(Debug, Default, Clone)]
pub struct MemoryProvider {
    platform: Arc<Mutex<Platform>>,
    latency: Duration,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MemoryProvider {
    /// Creates an empty platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a delay to every mutating call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes every mutating call on `id` fail permanently.
    pub async fn fail_permanently(&self, id: &ResourceId, message: &str) {
        self.platform
            .lock()
            .await
            .failures
            .insert(id.clone(), Injected::Permanent(message.to_string()));
    }

    /// Makes the next `times` mutating calls on `id` fail transiently.
    pub async fn fail_transiently(&self, id: &ResourceId, times: u32) {
        self.platform
            .lock()
            .await
            .failures
            .insert(id.clone(), Injected::Transient { remaining: times });
    }

    /// Removes any injected failure for `id`.
    pub async fn heal(&self, id: &ResourceId) {
        self.platform.lock().await.failures.remove(id);
    }

    /// Removes an object behind the engine's back.
    pub async fn remove_out_of_band(&self, id: &ResourceId) {
        self.platform.lock().await.objects.remove(id);
    }

    /// Replaces an object's attributes behind the engine's back.
    pub async fn modify_out_of_band(&self, id: &ResourceId, key: &str, value: serde_json::Value) {
        let mut platform = self.platform.lock().await;
        if let Some(object) = platform.objects.get_mut(id) {
            let mut attrs = object.attributes.to_value();
            if let Some(map) = attrs.as_object_mut() {
                map.insert(key.to_string(), value);
            }
            object.attributes = crate::graph::Attributes::from_value(attrs);
        }
    }

    /// Returns the object stored for `id`.
    pub async fn object(&self, id: &ResourceId) -> Option<AppliedState> {
        self.platform.lock().await.objects.get(id).cloned()
    }

    /// Returns the number of stored objects.
    pub async fn object_count(&self) -> usize {
        self.platform.lock().await.objects.len()
    }

    /// Returns the ordered call log.
    pub async fn calls(&self) -> Vec<CallRecord> {
        self.platform.lock().await.log.clone()
    }

    /// Returns the highest number of concurrent mutating calls observed.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Runs a mutating call with latency, failure injection and logging.
    async fn mutate<T>(
        &self,
        kind: CallKind,
        id: &ResourceId,
        apply: impl FnOnce(&mut Platform) -> T + Send,
    ) -> Result<T, ProviderError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut platform = self.platform.lock().await;
        let injected = match platform.failures.get_mut(id) {
            Some(Injected::Permanent(message)) => Some(ProviderError::permanent(message.clone())),
            Some(Injected::Transient { remaining }) if *remaining > 0 => {
                *remaining -= 1;
                Some(ProviderError::transient(format!("{id} temporarily unavailable")))
            }
            _ => None,
        };

        let result = match injected {
            Some(err) => Err(err),
            None => Ok(apply(&mut platform)),
        };
        platform.log.push(CallRecord {
            kind,
            id: id.clone(),
            succeeded: result.is_ok(),
        });
        drop(platform);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug!("memory provider {kind:?} {id}: ok={}", result.is_ok());
        result
    }

    fn store(platform: &mut Platform, node: &ResourceNode, external_id: Option<String>) -> AppliedState {
        let external_id = external_id.unwrap_or_else(|| {
            platform.next_uid += 1;
            format!("mem-{}", platform.next_uid)
        });
        let state = AppliedState::new(
            node.id.clone(),
            node.attributes.clone(),
            node.hash.clone(),
            node.dependencies.clone(),
        )
        .with_external_id(external_id);
        platform.objects.insert(node.id.clone(), state.clone());
        state
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn create(&self, node: &ResourceNode) -> Result<AppliedState, ProviderError> {
        self.mutate(CallKind::Create, &node.id, |platform| {
            let existing = platform
                .objects
                .get(&node.id)
                .and_then(|o| o.external_id.clone());
            Self::store(platform, node, existing)
        })
        .await
    }

    async fn read(&self, id: &ResourceId) -> Result<Option<AppliedState>, ProviderError> {
        let mut platform = self.platform.lock().await;
        let object = platform.objects.get(id).cloned();
        platform.log.push(CallRecord {
            kind: CallKind::Read,
            id: id.clone(),
            succeeded: true,
        });
        Ok(object)
    }

    async fn update(
        &self,
        node: &ResourceNode,
        prior: &AppliedState,
    ) -> Result<AppliedState, ProviderError> {
        self.mutate(CallKind::Update, &node.id, |platform| {
            Self::store(platform, node, prior.external_id.clone())
        })
        .await
    }

    async fn delete(&self, prior: &AppliedState) -> Result<(), ProviderError> {
        self.mutate(CallKind::Delete, &prior.id, |platform| {
            platform.objects.remove(&prior.id);
        })
        .await
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
