//! Advisory locking of the state document.
//!
//! A reconciliation run holds the lock for its whole duration so two runs
//! never interleave writes to the same document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::store::StateStore;
use crate::error::Result;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Information about a state lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lock info.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }
}

/// A lock held on a state store for the duration of a run.
///
/// Release it explicitly; a dropped lease is left to expire.
pub struct LockLease {
    store: Arc<dyn StateStore>,
    info: LockInfo,
}

impl LockLease {
    /// Acquires the store's lock under a fresh holder id.
    ///
    /// # Errors
    ///
    /// Returns an error if another holder owns an unexpired lock.
    pub async fn acquire(store: Arc<dyn StateStore>) -> Result<Self> {
        let holder = generate_holder_id();
        let info = store.acquire_lock(&holder).await?;
        debug!("Acquired state lock {} as {}", info.lock_id, info.holder);
        Ok(Self { store, info })
    }

    /// Gets the lock info.
    #[must_use]
    pub const fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot remove the lock.
    pub async fn release(self) -> Result<()> {
        match self.store.release_lock(&self.info.lock_id).await {
            Ok(()) => {
                debug!("Released state lock {}", self.info.lock_id);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to release state lock {}: {e}", self.info.lock_id);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for LockLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockLease")
            .field("backend", &self.store.backend_type())
            .field("info", &self.info)
            .finish()
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = Uuid::new_v4().simple().to_string();

    format!("{hostname}-{pid}-{}", &uuid[..8])
}
