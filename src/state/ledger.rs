//! The run-time ledger of applied state.
//!
//! Worker tasks commit here as soon as their provider call succeeds. Each
//! commit mutates the in-memory document and persists it under the same
//! lock, so the stored document is always a consistent snapshot.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::store::StateStore;
use super::types::{AppliedState, HistoryEntry, StateDocument};
use crate::error::{Result, StateError};
use crate::graph::ResourceId;

/// Shared, persisted record of applied resources.
pub struct StateLedger {
    store: Arc<dyn StateStore>,
    document: Mutex<StateDocument>,
}

impl StateLedger {
    /// Opens the ledger, loading the stored document or starting a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read, or if the stored
    /// document belongs to another project or environment.
    pub async fn open(store: Arc<dyn StateStore>, project: &str, environment: &str) -> Result<Self> {
        let document = match store.load().await? {
            Some(doc) if doc.project != project || doc.environment != environment => {
                return Err(StateError::ProjectMismatch {
                    expected: format!("{project}/{environment}"),
                    found: format!("{}/{}", doc.project, doc.environment),
                }
                .into());
            }
            Some(doc) => doc,
            None => {
                debug!("No stored state, starting fresh for {project}/{environment}");
                StateDocument::new(project, environment)
            }
        };

        Ok(Self {
            store,
            document: Mutex::new(document),
        })
    }

    /// Returns a copy of the current document.
    pub async fn snapshot(&self) -> StateDocument {
        self.document.lock().await.clone()
    }

    /// Returns the applied state of a resource.
    pub async fn get(&self, id: &ResourceId) -> Option<AppliedState> {
        self.document.lock().await.get(id).cloned()
    }

    /// Records a successful create or update and persists it.
    ///
    /// The applied-at timestamp is taken at commit time.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be persisted.
    pub async fn record(&self, mut state: AppliedState) -> Result<AppliedState> {
        let mut doc = self.document.lock().await;
        state.applied_at = Utc::now();
        doc.set(state.clone());
        self.store.save(&doc).await?;
        debug!("Recorded {} at {}", state.id, state.applied_at);
        Ok(state)
    }

    /// Records a successful delete and persists it.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be persisted.
    pub async fn forget(&self, id: &ResourceId) -> Result<()> {
        let mut doc = self.document.lock().await;
        if doc.remove(id).is_some() {
            self.store.save(&doc).await?;
            debug!("Forgot {id}");
        }
        Ok(())
    }

    /// Appends a run history entry and persists it.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be persisted.
    pub async fn append_history(&self, entry: HistoryEntry) -> Result<()> {
        let mut doc = self.document.lock().await;
        doc.add_history(entry);
        doc.last_updated = Utc::now();
        self.store.save(&doc).await
    }
}

impl std::fmt::Debug for StateLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateLedger")
            .field("backend", &self.store.backend_type())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeelError;
    use crate::graph::{Attributes, ResourceKind};
    use crate::state::{LocalStateStore, RunKind};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn applied(name: &str) -> AppliedState {
        AppliedState::new(
            ResourceId::new(ResourceKind::Deployment, name),
            Attributes::default(),
            String::from("hash"),
            BTreeSet::new(),
        )
    }

    #[tokio::test]
    async fn test_record_persists_immediately() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(LocalStateStore::with_base_dir(dir.path()));
        let ledger = StateLedger::open(Arc::clone(&store), "voting", "dev").await.unwrap();

        let recorded = ledger.record(applied("db")).await.unwrap();

        let stored = store.load().await.unwrap().unwrap();
        assert_eq!(stored.get(&recorded.id), Some(&recorded));
    }

    #[tokio::test]
    async fn test_forget_and_history() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(LocalStateStore::with_base_dir(dir.path()));
        let ledger = StateLedger::open(Arc::clone(&store), "voting", "dev").await.unwrap();

        let recorded = ledger.record(applied("db")).await.unwrap();
        ledger.forget(&recorded.id).await.unwrap();
        ledger
            .append_history(HistoryEntry::new("run", RunKind::Destroy, "h", vec![], None))
            .await
            .unwrap();

        let stored = store.load().await.unwrap().unwrap();
        assert!(stored.resources.is_empty());
        assert_eq!(stored.history.len(), 1);
        assert!(ledger.get(&recorded.id).await.is_none());
    }

    #[tokio::test]
    async fn test_open_rejects_foreign_state() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(LocalStateStore::with_base_dir(dir.path()));
        store.save(&StateDocument::new("other", "prod")).await.unwrap();

        let err = StateLedger::open(store, "voting", "dev").await.unwrap_err();
        assert!(matches!(
            err,
            KeelError::State(StateError::ProjectMismatch { .. })
        ));
    }
}
