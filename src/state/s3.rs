//! S3-based state storage backend.
//!
//! Remote state for teams and CI: the document and its lock live side by side
//! under an optional key prefix.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{KeelError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::StateStore;
use super::types::StateDocument;

/// State object key suffix.
const STATE_KEY: &str = "state.json";

/// Lock object key suffix.
const LOCK_KEY: &str = "state.lock";

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    client: Client,
    bucket: String,
    prefix: String,
}

/// Normalizes a key prefix to either empty or `segment/`.
fn normalize_prefix(prefix: Option<&str>) -> String {
    match prefix.map(|p| p.trim_matches('/')) {
        Some(p) if !p.is_empty() => format!("{p}/"),
        _ => String::new(),
    }
}

fn parse_lock(content: &str) -> Result<LockInfo> {
    serde_json::from_str(content).map_err(|e| {
        KeelError::State(StateError::Corrupted {
            message: format!("Failed to parse lock: {e}"),
        })
    })
}

impl S3StateStore {
    /// Creates a new S3 state store from the ambient AWS configuration.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let config = loader.load().await;

        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a new S3 state store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| StateError::s3(format!("Failed to read S3 object: {e}")))?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    KeelError::State(StateError::Corrupted {
                        message: format!("Invalid UTF-8 in S3 object: {e}"),
                    })
                })?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StateError::s3(format!("S3 get error: {service_err}")).into())
                }
            }
        }
    }

    async fn put_object(&self, key: &str, content: Vec<u8>, only_if_absent: bool) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.into())
            .content_type("application/json");
        if only_if_absent {
            request = request.if_none_match("*");
        }

        request.send().await.map_err(|e| {
            if only_if_absent {
                StateError::LockFailed {
                    message: format!("S3 conditional put failed: {e}"),
                }
            } else {
                StateError::s3(format!("S3 put error: {e}"))
            }
        })?;

        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 delete error: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self) -> Result<Option<StateDocument>> {
        let key = self.key(STATE_KEY);
        debug!("Loading state from s3://{}/{key}", self.bucket);

        let Some(json) = self.get_object(&key).await? else {
            debug!("No state found in S3");
            return Ok(None);
        };

        let state: StateDocument = serde_json::from_str(&json).map_err(|e| {
            KeelError::State(StateError::Corrupted {
                message: format!("Failed to parse state: {e}"),
            })
        })?;

        info!(
            "Loaded state for {}/{} with {} resources",
            state.project,
            state.environment,
            state.resources.len()
        );
        Ok(Some(state))
    }

    async fn save(&self, state: &StateDocument) -> Result<()> {
        let key = self.key(STATE_KEY);
        debug!("Saving state to s3://{}/{key}", self.bucket);

        let content = serde_json::to_vec_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        self.put_object(&key, content, false).await
    }

    async fn delete(&self) -> Result<()> {
        let state_key = self.key(STATE_KEY);
        info!("Deleting state from s3://{}/{state_key}", self.bucket);

        self.delete_object(&state_key).await?;
        self.delete_object(&self.key(LOCK_KEY)).await
    }

    async fn exists(&self) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(STATE_KEY))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StateError::s3(format!("S3 head error: {service_err}")).into())
                }
            }
        }
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let key = self.key(LOCK_KEY);

        if let Some(content) = self.get_object(&key).await? {
            let existing = parse_lock(&content)?;
            if !existing.is_expired() {
                return Err(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            debug!("Expired lock held by {} found, taking over", existing.holder);
            self.delete_object(&key).await?;
        }

        let lock_info = LockInfo::new(holder);
        let content = serde_json::to_vec_pretty(&lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        self.put_object(&key, content, true).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let key = self.key(LOCK_KEY);

        if let Some(content) = self.get_object(&key).await? {
            let existing = parse_lock(&content)?;
            if existing.lock_id == lock_id {
                self.delete_object(&key).await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }

        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        self.delete_object(&self.key(LOCK_KEY)).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        match self.get_object(&self.key(LOCK_KEY)).await? {
            Some(content) => parse_lock(&content).map(Some),
            None => Ok(None),
        }
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
