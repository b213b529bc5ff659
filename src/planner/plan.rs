//! Reconciliation plan types and construction.
//!
//! A plan lists deletes first, dependents before their dependencies, then
//! every desired node in topological order. Each operation carries the
//! indices of the operations that must reach terminal success before it may
//! start. A delete waits on every operation whose applied state still
//! depends on the deleted resource, including updates that drop the edge.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

use super::diff::{DiffResult, Operation, OperationKind};
use crate::graph::{ResourceId, topological_sort};

/// An ordered, immutable set of operations for one reconciliation.
#[derive(Debug, Clone)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Operations in listing order.
    pub operations: Vec<Operation>,
    /// For each operation, indices of the operations it waits on.
    pub prerequisites: Vec<Vec<usize>>,
}

impl Plan {
    /// Orders the operations of a diff and wires their prerequisites.
    #[must_use]
    pub fn from_diff(diff: DiffResult, config_hash: &str) -> Self {
        let (deletes, applies): (Vec<Operation>, Vec<Operation>) = diff
            .operations
            .into_iter()
            .partition(|op| op.kind() == OperationKind::Delete);

        let mut operations = order_deletes(deletes);
        operations.extend(applies);

        let index: HashMap<ResourceId, usize> = operations
            .iter()
            .enumerate()
            .map(|(i, op)| (op.id().clone(), i))
            .collect();

        let mut prerequisites = vec![Vec::new(); operations.len()];
        for (i, op) in operations.iter().enumerate() {
            match op {
                Operation::Delete { prior } => {
                    for (j, other) in operations.iter().enumerate() {
                        let dependent = match other {
                            Operation::Delete { prior: dependent }
                            | Operation::Update { prior: dependent, .. }
                            | Operation::NoOp { prior: dependent, .. } => dependent,
                            Operation::Create { .. } => continue,
                        };
                        if dependent.dependencies.contains(&prior.id) {
                            prerequisites[i].push(j);
                        }
                    }
                }
                Operation::Create { node }
                | Operation::Update { node, .. }
                | Operation::NoOp { node, .. } => {
                    prerequisites[i] = node
                        .dependencies
                        .iter()
                        .filter_map(|dep| index.get(dep).copied())
                        .collect();
                }
            }
            prerequisites[i].sort_unstable();
        }

        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            operations,
            prerequisites,
        }
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the plan holds no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns true if any operation mutates the platform.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.operations.iter().any(|op| op.kind() != OperationKind::NoOp)
    }

    /// Counts operations of one kind.
    #[must_use]
    pub fn count(&self, kind: OperationKind) -> usize {
        self.operations.iter().filter(|op| op.kind() == kind).count()
    }

    /// For each operation, indices of the operations waiting on it.
    #[must_use]
    pub fn successors(&self) -> Vec<Vec<usize>> {
        let mut successors = vec![Vec::new(); self.operations.len()];
        for (i, prereqs) in self.prerequisites.iter().enumerate() {
            for &p in prereqs {
                successors[p].push(i);
            }
        }
        successors
    }

    /// Indices of every operation that transitively waits on `index`.
    #[must_use]
    pub fn transitive_successors(&self, index: usize) -> BTreeSet<usize> {
        reachable(&self.successors(), index)
    }
}

/// Walks `successors` from `index`, excluding `index` itself.
pub(crate) fn reachable(successors: &[Vec<usize>], index: usize) -> BTreeSet<usize> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![index];
    while let Some(current) = stack.pop() {
        for &next in successors.get(current).map_or(&[][..], Vec::as_slice) {
            if seen.insert(next) {
                stack.push(next);
            }
        }
    }
    seen
}

/// Orders deletes so that dependents are removed before their dependencies.
fn order_deletes(deletes: Vec<Operation>) -> Vec<Operation> {
    let mut by_id: BTreeMap<ResourceId, Operation> = deletes
        .into_iter()
        .map(|op| (op.id().clone(), op))
        .collect();

    let edges: BTreeMap<ResourceId, BTreeSet<ResourceId>> = by_id
        .iter()
        .map(|(id, op)| {
            let deps = match op {
                Operation::Delete { prior } => prior
                    .dependencies
                    .iter()
                    .filter(|dep| by_id.contains_key(*dep))
                    .cloned()
                    .collect(),
                _ => BTreeSet::new(),
            };
            (id.clone(), deps)
        })
        .collect();

    let order = match topological_sort(&edges) {
        Ok(mut order) => {
            order.reverse();
            order
        }
        Err(stuck) => {
            // Applied state is expected to be acyclic; fall back to reverse
            // identity order for corrupted documents.
            warn!("Applied dependencies form a cycle among {} resources", stuck.len());
            edges.keys().rev().cloned().collect()
        }
    };

    order.into_iter().filter_map(|id| by_id.remove(&id)).collect()
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Plan ({} operations):", self.len())?;
        for (i, op) in self.operations.iter().enumerate() {
            write!(f, "  {}. {op}", i + 1)?;
            if !self.prerequisites[i].is_empty() {
                let after: Vec<String> = self.prerequisites[i].iter().map(|p| (p + 1).to_string()).collect();
                write!(f, " after {}", after.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
