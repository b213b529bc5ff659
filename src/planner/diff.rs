//! Diff engine for comparing desired vs applied state.
//!
//! Each desired node is compared with its last applied state by content hash;
//! applied resources missing from the desired graph are deleted.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::canonical_json;
use crate::graph::{ResourceGraph, ResourceId, ResourceNode};
use crate::state::{AppliedState, StateDocument};

/// One unit of work for a single resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// The resource has never been applied.
    Create {
        /// Desired node.
        node: ResourceNode,
    },
    /// The resource's content hash changed.
    Update {
        /// Desired node.
        node: ResourceNode,
        /// Last applied state.
        prior: AppliedState,
    },
    /// The resource is no longer declared.
    Delete {
        /// Last applied state.
        prior: AppliedState,
    },
    /// The resource is already at its desired state.
    NoOp {
        /// Desired node.
        node: ResourceNode,
        /// Last applied state.
        prior: AppliedState,
    },
}

/// Type of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create.
    Create,
    /// Update.
    Update,
    /// Delete.
    Delete,
    /// Nothing to do.
    NoOp,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffDetail {
    /// Top-level attribute that differs, or `depends_on`.
    pub field: String,
    /// Applied value.
    pub old_value: Option<String>,
    /// Desired value.
    pub new_value: Option<String>,
}

/// Complete diff result.
#[derive(Debug, Clone)]
pub struct DiffResult {
    /// Operations for desired nodes in dependency order, then deletes.
    pub operations: Vec<Operation>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

/// Engine for computing diffs between desired and applied states.
#[derive(Debug, Default)]
pub struct DiffEngine;

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decides the operation for one desired node.
    #[must_use]
    pub fn diff(&self, node: &ResourceNode, prior: Option<&AppliedState>) -> Operation {
        match prior {
            None => {
                debug!("{} needs to be created", node.id);
                Operation::Create { node: node.clone() }
            }
            Some(prior) if prior.hash == node.hash => {
                debug!("{} is up to date", node.id);
                Operation::NoOp {
                    node: node.clone(),
                    prior: prior.clone(),
                }
            }
            Some(prior) => {
                debug!(
                    "{} needs update ({} -> {})",
                    node.id,
                    short(&prior.hash),
                    short(&node.hash)
                );
                Operation::Update {
                    node: node.clone(),
                    prior: prior.clone(),
                }
            }
        }
    }

    /// Computes operations for the whole graph against the applied document.
    #[must_use]
    pub fn compute_diff(&self, graph: &ResourceGraph, applied: &StateDocument) -> DiffResult {
        let mut operations: Vec<Operation> = graph
            .nodes_in_order()
            .map(|node| self.diff(node, applied.get(&node.id)))
            .collect();

        for (id, prior) in &applied.resources {
            if !graph.contains(id) {
                debug!("{id} is no longer declared, deleting");
                operations.push(Operation::Delete {
                    prior: prior.clone(),
                });
            }
        }

        let count = |kind: OperationKind| operations.iter().filter(|op| op.kind() == kind).count();
        let creates = count(OperationKind::Create);
        let updates = count(OperationKind::Update);
        let deletes = count(OperationKind::Delete);
        let unchanged = count(OperationKind::NoOp);

        DiffResult {
            operations,
            creates,
            updates,
            deletes,
            unchanged,
        }
    }

    /// Lists field-level differences of an operation.
    #[must_use]
    pub fn details(&self, operation: &Operation) -> Vec<DiffDetail> {
        match operation {
            Operation::Create { node } => node
                .attributes
                .iter()
                .map(|(field, value)| DiffDetail {
                    field: field.clone(),
                    old_value: None,
                    new_value: Some(canonical_json(value)),
                })
                .collect(),
            Operation::Update { node, prior } => {
                let mut fields: Vec<&String> =
                    node.attributes.keys().chain(prior.attributes.keys()).collect();
                fields.sort();
                fields.dedup();

                let mut details: Vec<DiffDetail> = fields
                    .into_iter()
                    .filter_map(|field| {
                        let old = prior.attributes.get(field);
                        let new = node.attributes.get(field);
                        (old != new).then(|| DiffDetail {
                            field: field.clone(),
                            old_value: old.map(canonical_json),
                            new_value: new.map(canonical_json),
                        })
                    })
                    .collect();

                if node.dependencies != prior.dependencies {
                    details.push(DiffDetail {
                        field: String::from("depends_on"),
                        old_value: Some(join_ids(prior.dependencies.iter())),
                        new_value: Some(join_ids(node.dependencies.iter())),
                    });
                }
                details
            }
            Operation::Delete { .. } | Operation::NoOp { .. } => Vec::new(),
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

fn join_ids<'a>(ids: impl Iterator<Item = &'a ResourceId>) -> String {
    ids.map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl Operation {
    /// Returns the identity the operation targets.
    #[must_use]
    pub const fn id(&self) -> &ResourceId {
        match self {
            Self::Create { node } | Self::Update { node, .. } | Self::NoOp { node, .. } => &node.id,
            Self::Delete { prior } => &prior.id,
        }
    }

    /// Returns the operation type.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Create { .. } => OperationKind::Create,
            Self::Update { .. } => OperationKind::Update,
            Self::Delete { .. } => OperationKind::Delete,
            Self::NoOp { .. } => OperationKind::NoOp,
        }
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.deletes > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Declaration, DeploymentSpec, ResourceConfig};
    use crate::graph::GraphBuilder;
    use std::collections::BTreeMap;

    fn deployment(name: &str, image: &str, deps: &[&str]) -> ResourceConfig {
        ResourceConfig::Deployment(Declaration {
            name: name.to_string(),
            depends_on: deps.iter().map(ToString::to_string).collect(),
            spec: DeploymentSpec {
                image: image.to_string(),
                replicas: 1,
                labels: BTreeMap::new(),
                env: BTreeMap::new(),
                ports: vec![],
                volumes: vec![],
            },
        })
    }

    fn applied_from(graph: &ResourceGraph) -> StateDocument {
        let mut doc = StateDocument::new("voting", "dev");
        for node in graph.nodes_in_order() {
            doc.set(AppliedState::new(
                node.id.clone(),
                node.attributes.clone(),
                node.hash.clone(),
                node.dependencies.clone(),
            ));
        }
        doc
    }

    #[test]
    fn test_create_update_noop_delete() {
        let engine = DiffEngine::new();
        let before = GraphBuilder::new()
            .build(&[
                deployment("db", "postgres:15", &[]),
                deployment("redis", "redis:7", &[]),
                deployment("old", "old:1", &[]),
            ])
            .unwrap();
        let applied = applied_from(&before);

        let after = GraphBuilder::new()
            .build(&[
                deployment("db", "postgres:16", &[]),
                deployment("redis", "redis:7", &[]),
                deployment("worker", "worker:1", &["deployment/db"]),
            ])
            .unwrap();

        let diff = engine.compute_diff(&after, &applied);
        let ops: Vec<String> = diff.operations.iter().map(ToString::to_string).collect();
        assert_eq!(
            ops,
            [
                "update(deployment/db)",
                "no-op(deployment/redis)",
                "create(deployment/worker)",
                "delete(deployment/old)",
            ]
        );
        assert_eq!((diff.creates, diff.updates, diff.deletes, diff.unchanged), (1, 1, 1, 1));
        assert_eq!(diff.total_changes(), 3);
    }

    #[test]
    fn test_dependency_change_alone_is_update() {
        let engine = DiffEngine::new();
        let before = GraphBuilder::new()
            .build(&[deployment("db", "postgres:15", &[]), deployment("worker", "w:1", &[])])
            .unwrap();
        let applied = applied_from(&before);
        let after = GraphBuilder::new()
            .build(&[
                deployment("db", "postgres:15", &[]),
                deployment("worker", "w:1", &["deployment/db"]),
            ])
            .unwrap();

        let diff = engine.compute_diff(&after, &applied);
        let update = diff
            .operations
            .iter()
            .find(|op| op.kind() == OperationKind::Update)
            .unwrap();
        assert_eq!(update.id().to_string(), "deployment/worker");

        let details = engine.details(update);
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].field, "depends_on");
    }

    #[test]
    fn test_update_details_name_changed_fields() {
        let engine = DiffEngine::new();
        let before = GraphBuilder::new()
            .build(&[deployment("db", "postgres:15", &[])])
            .unwrap();
        let after = GraphBuilder::new()
            .build(&[deployment("db", "postgres:16", &[])])
            .unwrap();
        let applied = applied_from(&before);

        let diff = engine.compute_diff(&after, &applied);
        let details = engine.details(&diff.operations[0]);
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].field, "image");
        assert_eq!(details[0].old_value.as_deref(), Some("\"postgres:15\""));
        assert_eq!(details[0].new_value.as_deref(), Some("\"postgres:16\""));
    }
}
