//! State types for tracking applied resources.
//!
//! These types represent the last-known-applied state of every resource,
//! used for diffing and idempotent reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::graph::{Attributes, ResourceId};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of history entries kept in the state document.
pub const MAX_HISTORY: usize = 100;

/// The complete state document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateDocument {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Applied state per resource.
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, AppliedState>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Last successfully applied state of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppliedState {
    /// Resource identity.
    pub id: ResourceId,
    /// Attributes as applied.
    pub attributes: Attributes,
    /// Content hash of attributes and dependencies.
    pub hash: String,
    /// Dependency identities at apply time.
    #[serde(default)]
    pub dependencies: BTreeSet<ResourceId>,
    /// Platform-assigned identifier, if any.
    #[serde(default)]
    pub external_id: Option<String>,
    /// When the last operation on this resource completed.
    pub applied_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Run identifier.
    pub run_id: String,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: RunKind,
    /// Configuration hash at time of the run.
    pub config_hash: String,
    /// Resources changed by the run.
    pub resources: Vec<String>,
    /// Whether every operation succeeded.
    pub success: bool,
    /// Optional error summary.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of runs recorded in history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Reconciliation towards the declared state.
    Reconcile,
    /// Destruction of every managed resource.
    Destroy,
}

impl StateDocument {
    /// Creates a new empty state document.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets the applied state of a resource.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&AppliedState> {
        self.resources.get(id)
    }

    /// Adds or replaces the applied state of a resource.
    pub fn set(&mut self, state: AppliedState) {
        self.last_updated = state.applied_at;
        self.resources.insert(state.id.clone(), state);
    }

    /// Removes a resource.
    pub fn remove(&mut self, id: &ResourceId) -> Option<AppliedState> {
        let result = self.resources.remove(id);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry, dropping the oldest past the limit.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            let excess = self.history.len() + 1 - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.history.push(entry);
    }

    /// Returns all managed identities in order.
    #[must_use]
    pub fn identities(&self) -> Vec<&ResourceId> {
        self.resources.keys().collect()
    }
}

impl AppliedState {
    /// Creates an applied state stamped with the current time.
    #[must_use]
    pub fn new(
        id: ResourceId,
        attributes: Attributes,
        hash: String,
        dependencies: BTreeSet<ResourceId>,
    ) -> Self {
        Self {
            id,
            attributes,
            hash,
            dependencies,
            external_id: None,
            applied_at: Utc::now(),
        }
    }

    /// Sets the platform-assigned identifier.
    #[must_use]
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

impl HistoryEntry {
    /// Creates a history entry.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        operation: RunKind,
        config_hash: &str,
        resources: Vec<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: error.is_none(),
            error,
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Reconcile => "reconcile",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
