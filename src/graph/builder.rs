//! Graph construction and ordering.
//!
//! Turns the declared resources into a validated DAG. Every failure here is
//! raised before any provider call is made.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::{Attributes, ResourceId, ResourceNode};
use crate::config::{ConfigHasher, ResourceConfig};
use crate::error::GraphError;

/// Builds resource graphs from declarations.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    hasher: ConfigHasher,
}

impl GraphBuilder {
    /// Creates a new graph builder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Builds and validates the graph.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate or malformed identities, schema
    /// violations, undeclared dependencies, and dependency cycles.
    pub fn build(&self, declarations: &[ResourceConfig]) -> Result<ResourceGraph, GraphError> {
        let mut nodes: BTreeMap<ResourceId, ResourceNode> = BTreeMap::new();

        for decl in declarations {
            let id = ResourceId::parse(&format!("{}/{}", decl.kind(), decl.name()))?;

            if nodes.contains_key(&id) {
                return Err(GraphError::DuplicateIdentity { id: id.to_string() });
            }

            decl.validate_schema()
                .map_err(|message| GraphError::SchemaViolation {
                    id: id.to_string(),
                    message,
                })?;

            let mut dependencies = BTreeSet::new();
            for raw in decl.depends_on() {
                let dep = ResourceId::parse(raw)?;
                if dep == id {
                    return Err(GraphError::CycleDetected {
                        cycle: format!("{id} -> {id}"),
                    });
                }
                dependencies.insert(dep);
            }

            let value = decl
                .spec_value()
                .map_err(|e| GraphError::SchemaViolation {
                    id: id.to_string(),
                    message: e.to_string(),
                })?;
            let attributes = Attributes::from_value(value);
            let hash = self.hasher.hash_resource(&attributes, &dependencies);

            nodes.insert(
                id.clone(),
                ResourceNode {
                    id,
                    spec: decl.clone(),
                    attributes,
                    dependencies,
                    hash,
                },
            );
        }

        for node in nodes.values() {
            if let Some(missing) = node.dependencies.iter().find(|d| !nodes.contains_key(d)) {
                return Err(GraphError::UnknownDependency {
                    id: node.id.to_string(),
                    dependency: missing.to_string(),
                });
            }
        }

        let edges: BTreeMap<ResourceId, BTreeSet<ResourceId>> = nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.dependencies.clone()))
            .collect();

        let order = topological_sort(&edges).map_err(|remaining| GraphError::CycleDetected {
            cycle: describe_cycle(&edges, &remaining),
        })?;

        let mut dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>> = nodes
            .keys()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();
        for node in nodes.values() {
            for dep in &node.dependencies {
                if let Some(set) = dependents.get_mut(dep) {
                    set.insert(node.id.clone());
                }
            }
        }

        debug!("Built resource graph with {} nodes", nodes.len());

        Ok(ResourceGraph {
            nodes,
            order,
            dependents,
        })
    }
}

/// A validated, acyclic resource graph.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: BTreeMap<ResourceId, ResourceNode>,
    order: Vec<ResourceId>,
    dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

impl ResourceGraph {
    /// Returns the node with the given identity.
    #[must_use]
    pub fn node(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// Returns true if the graph contains the identity.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns identities in dependency order with a lexicographic tie-break.
    #[must_use]
    pub fn topological_order(&self) -> &[ResourceId] {
        &self.order
    }

    /// Returns nodes in dependency order.
    pub fn nodes_in_order(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Returns the direct dependents of a node.
    #[must_use]
    pub fn dependents(&self, id: &ResourceId) -> Option<&BTreeSet<ResourceId>> {
        self.dependents.get(id)
    }
}

/// Orders identities so every node follows its dependencies.
///
/// Kahn's algorithm; among ready nodes the lexicographically smallest goes
/// first. Dependencies missing from `edges` are ignored.
///
/// # Errors
///
/// Returns the nodes left unordered when the edges contain a cycle.
pub fn topological_sort(
    edges: &BTreeMap<ResourceId, BTreeSet<ResourceId>>,
) -> Result<Vec<ResourceId>, BTreeSet<ResourceId>> {
    let mut in_degree: BTreeMap<&ResourceId, usize> = BTreeMap::new();
    let mut children: BTreeMap<&ResourceId, Vec<&ResourceId>> = BTreeMap::new();

    for (id, deps) in edges {
        let known = deps.iter().filter(|d| edges.contains_key(*d));
        let mut count = 0;
        for dep in known {
            children.entry(dep).or_default().push(id);
            count += 1;
        }
        in_degree.insert(id, count);
    }

    let mut ready: BTreeSet<&ResourceId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(edges.len());

    while let Some(id) = ready.pop_first() {
        order.push(id.clone());
        for child in children.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(child) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*child);
                }
            }
        }
    }

    if order.len() == edges.len() {
        Ok(order)
    } else {
        Err(in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id.clone())
            .collect())
    }
}

/// Renders one cycle among the nodes Kahn's algorithm could not order.
///
/// Every such node has a dependency that is itself unordered, so following
/// dependencies from the smallest one must revisit a node.
fn describe_cycle(
    edges: &BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    remaining: &BTreeSet<ResourceId>,
) -> String {
    let Some(start) = remaining.first() else {
        return String::new();
    };

    let mut path: Vec<&ResourceId> = vec![start];
    let mut current = start;
    loop {
        let next = edges
            .get(current)
            .and_then(|deps| deps.iter().find(|d| remaining.contains(*d)));
        let Some(next) = next else {
            break;
        };
        if let Some(pos) = path.iter().position(|p| *p == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(ToString::to_string).collect();
            cycle.push(next.to_string());
            return cycle.join(" -> ");
        }
        path.push(next);
        current = next;
    }

    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Declaration, DeploymentSpec, ServicePort, ServiceSpec, ServiceType};
    use crate::graph::ResourceKind;

    fn deployment(name: &str, deps: &[&str]) -> ResourceConfig {
        ResourceConfig::Deployment(Declaration {
            name: name.to_string(),
            depends_on: deps.iter().map(ToString::to_string).collect(),
            spec: DeploymentSpec {
                image: format!("example/{name}:1.0"),
                replicas: 1,
                labels: BTreeMap::from([(String::from("app"), name.to_string())]),
                env: BTreeMap::new(),
                ports: vec![],
                volumes: vec![],
            },
        })
    }

    fn service(name: &str, deps: &[&str]) -> ResourceConfig {
        ResourceConfig::Service(Declaration {
            name: name.to_string(),
            depends_on: deps.iter().map(ToString::to_string).collect(),
            spec: ServiceSpec {
                service_type: ServiceType::ClusterIP,
                selector: BTreeMap::from([(String::from("app"), name.to_string())]),
                labels: BTreeMap::new(),
                ports: vec![ServicePort {
                    name: name.to_string(),
                    port: 80,
                    target_port: 80,
                    node_port: None,
                }],
            },
        })
    }

    fn id(raw: &str) -> ResourceId {
        ResourceId::parse(raw).unwrap()
    }

    fn rendered(order: &[ResourceId]) -> Vec<String> {
        order.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_acyclic_graph_builds_in_dependency_order() {
        let graph = GraphBuilder::new()
            .build(&[
                service("db", &["deployment/db"]),
                deployment("worker", &["deployment/db", "deployment/redis"]),
                deployment("redis", &[]),
                deployment("db", &[]),
            ])
            .unwrap();

        assert_eq!(graph.len(), 4);
        assert_eq!(
            rendered(graph.topological_order()),
            ["deployment/db", "deployment/redis", "deployment/worker", "service/db"]
        );
    }

    #[test]
    fn test_order_ignores_declaration_order() {
        let a = GraphBuilder::new()
            .build(&[deployment("b", &[]), deployment("a", &[]), deployment("c", &["deployment/b"])])
            .unwrap();
        let b = GraphBuilder::new()
            .build(&[deployment("c", &["deployment/b"]), deployment("a", &[]), deployment("b", &[])])
            .unwrap();
        assert_eq!(a.topological_order(), b.topological_order());
    }

    #[test]
    fn test_duplicate_identity() {
        let err = GraphBuilder::new()
            .build(&[deployment("db", &[]), deployment("db", &[])])
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::DuplicateIdentity {
                id: String::from("deployment/db")
            }
        );
    }

    #[test]
    fn test_same_name_different_kind_is_allowed() {
        let graph = GraphBuilder::new()
            .build(&[deployment("db", &[]), service("db", &["deployment/db"])])
            .unwrap();
        assert!(graph.contains(&id("service/db")));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = GraphBuilder::new()
            .build(&[deployment("worker", &["deployment/db"])])
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));
    }

    #[test]
    fn test_malformed_reference() {
        let err = GraphBuilder::new()
            .build(&[deployment("worker", &["db"])])
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidIdentity { .. }));
    }

    #[test]
    fn test_self_edge_is_a_cycle() {
        let err = GraphBuilder::new()
            .build(&[deployment("a", &["deployment/a"])])
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                cycle: String::from("deployment/a -> deployment/a")
            }
        );
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let err = GraphBuilder::new()
            .build(&[
                deployment("a", &["deployment/c"]),
                deployment("b", &["deployment/a"]),
                deployment("c", &["deployment/b"]),
                deployment("d", &[]),
            ])
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                cycle: String::from("deployment/a -> deployment/c -> deployment/b -> deployment/a")
            }
        );
    }

    #[test]
    fn test_schema_violation() {
        let mut bad = deployment("a", &[]);
        if let ResourceConfig::Deployment(d) = &mut bad {
            d.spec.image = String::new();
        }
        let err = GraphBuilder::new().build(&[bad]).unwrap_err();
        assert!(matches!(err, GraphError::SchemaViolation { .. }));
    }

    #[test]
    fn test_dependents_map() {
        let graph = GraphBuilder::new()
            .build(&[
                deployment("db", &[]),
                deployment("worker", &["deployment/db"]),
                service("worker", &["deployment/worker"]),
                deployment("redis", &[]),
            ])
            .unwrap();

        assert_eq!(
            graph.dependents(&id("deployment/db")),
            Some(&BTreeSet::from([id("deployment/worker")]))
        );
        assert_eq!(
            graph.dependents(&id("deployment/worker")),
            Some(&BTreeSet::from([id("service/worker")]))
        );
        assert!(
            graph
                .dependents(&id("deployment/redis"))
                .is_none_or(BTreeSet::is_empty)
        );
    }

    #[test]
    fn test_node_carries_hash_and_attributes() {
        let graph = GraphBuilder::new().build(&[deployment("db", &[])]).unwrap();
        let node = graph.node(&id("deployment/db")).unwrap();
        assert_eq!(node.id.kind, ResourceKind::Deployment);
        assert_eq!(node.hash.len(), 64);
        assert_eq!(
            node.attributes.get("image"),
            Some(&serde_json::json!("example/db:1.0"))
        );
    }
}
