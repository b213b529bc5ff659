//! Local file-based state storage backend.
//!
//! The document is written to a temp file, synced, then renamed over the
//! previous one, so a crash mid-write leaves the last good document intact.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{KeelError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::StateStore;
use super::types::StateDocument;

/// Default state directory name.
pub const STATE_DIR: &str = ".keel";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    base_dir: PathBuf,
    state_path: PathBuf,
    lock_path: PathBuf,
}

fn io_error(action: &str, path: &Path, e: &std::io::Error) -> KeelError {
    KeelError::State(StateError::io(format!(
        "Failed to {action} {}: {e}",
        path.display()
    )))
}

impl LocalStateStore {
    /// Creates a store under `.keel` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| KeelError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            state_path: base_dir.join(STATE_FILE),
            lock_path: base_dir.join(LOCK_FILE),
            base_dir,
        }
    }

    /// Returns the path of the state document.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| io_error("create directory", &self.base_dir, &e))?;
        }
        Ok(())
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read lock file", &self.lock_path, &e)),
        };

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            KeelError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    /// Writes a fresh lock file, failing if one already exists.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_vec_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
            .map_err(|e| {
                KeelError::State(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                })
            })?;

        file.write_all(&content)
            .await
            .map_err(|e| io_error("write lock file", &self.lock_path, &e))?;
        file.sync_all()
            .await
            .map_err(|e| io_error("sync lock file", &self.lock_path, &e))?;

        Ok(())
    }

    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("delete lock file", &self.lock_path, &e)),
        }
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<StateDocument>> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("State file does not exist: {}", self.state_path.display());
                return Ok(None);
            }
            Err(e) => return Err(io_error("read state file", &self.state_path, &e)),
        };

        info!("Loaded state from: {}", self.state_path.display());

        let state: StateDocument = serde_json::from_str(&content).map_err(|e| {
            KeelError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;

        Ok(Some(state))
    }

    async fn save(&self, state: &StateDocument) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_vec_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        let temp_path = self.state_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| io_error("create", &temp_path, &e))?;
        file.write_all(&content)
            .await
            .map_err(|e| io_error("write", &temp_path, &e))?;
        file.sync_all()
            .await
            .map_err(|e| io_error("sync", &temp_path, &e))?;
        drop(file);

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| io_error("rename state file to", &self.state_path, &e))?;

        debug!(
            "Saved state with {} resources to {}",
            state.resources.len(),
            self.state_path.display()
        );
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.state_path).await {
            Ok(()) => info!("Deleted state file: {}", self.state_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error("delete state file", &self.state_path, &e)),
        }

        self.delete_lock_file().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(fs::try_exists(&self.state_path).await.unwrap_or(false))
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(KeelError::State(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock held by {} found, taking over", existing.holder);
            self.delete_lock_file().await?;
        }

        let lock_info = LockInfo::new(holder);
        self.create_lock_file(&lock_info).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
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
        self.delete_lock_file().await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
