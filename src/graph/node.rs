//! Resource nodes and their canonical attribute sets.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::ResourceId;
use crate::config::ResourceConfig;

/// Canonical attribute set of a resource.
///
/// Keys are kept ordered so two semantically equal specs always produce the
/// same attribute set regardless of declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, serde_json::Value>);

impl Attributes {
    /// Builds an attribute set from a JSON value.
    ///
    /// Non-object values are stored under a single `value` key.
    #[must_use]
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => Self(map.into_iter().collect()),
            serde_json::Value::Null => Self::default(),
            other => Self(BTreeMap::from([(String::from("value"), other)])),
        }
    }

    /// Returns the value of a top-level attribute.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Iterates over attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    /// Returns the attribute keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Returns the number of top-level attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Converts the attributes into a JSON object.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone().into_iter().collect())
    }
}

/// A validated node of the resource graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNode {
    /// Resource identity.
    pub id: ResourceId,
    /// Typed desired spec.
    pub spec: ResourceConfig,
    /// Canonical attribute set derived from the spec.
    pub attributes: Attributes,
    /// Identities this node depends on.
    pub dependencies: BTreeSet<ResourceId>,
    /// Content hash over attributes and dependencies.
    pub hash: String,
}

impl ResourceNode {
    /// Returns true if this node declares a dependency on `id`.
    #[must_use]
    pub fn depends_on(&self, id: &ResourceId) -> bool {
        self.dependencies.contains(id)
    }
}
