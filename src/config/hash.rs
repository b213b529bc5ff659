//! Content hashing for change detection.
//!
//! Hashes are SHA-256 over a canonical JSON rendering in which object keys
//! are sorted recursively, so reordering fields in the configuration never
//! changes a hash.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt::Write as _;

use super::spec::DeployConfig;
use crate::graph::{Attributes, ResourceId};

/// Hasher for computing configuration and resource hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the content hash of a single resource.
    ///
    /// Dependency identities are folded in so a change to the dependency set
    /// alone also changes the hash.
    #[must_use]
    pub fn hash_resource(
        &self,
        attributes: &Attributes,
        dependencies: &BTreeSet<ResourceId>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical_json(&attributes.to_value()).as_bytes());
        hasher.update([0u8]);
        for dep in dependencies {
            hasher.update(dep.to_string().as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a hash of the entire deployment configuration.
    ///
    /// Falls back to an empty object for unserializable input, which cannot
    /// happen for a parsed configuration.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let value = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        let mut hasher = Sha256::new();
        hasher.update(canonical_json(&value).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

/// Renders a JSON value with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceKind;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": {"y": 1, "x": [ {"d": 1, "c": 2} ]}, "a": "s"});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":"s","b":{"x":[{"c":2,"d":1}],"y":1}}"#
        );
    }

    #[test]
    fn test_field_order_does_not_change_hash() {
        let hasher = ConfigHasher::new();
        let deps = BTreeSet::new();
        let a: Attributes = serde_json::from_str(r#"{"image":"redis","replicas":1}"#).unwrap();
        let b: Attributes = serde_json::from_str(r#"{"replicas":1,"image":"redis"}"#).unwrap();
        assert_eq!(hasher.hash_resource(&a, &deps), hasher.hash_resource(&b, &deps));
    }

    #[test]
    fn test_dependency_change_changes_hash() {
        let hasher = ConfigHasher::new();
        let attrs = Attributes::from_value(json!({"image": "worker"}));
        let none = BTreeSet::new();
        let some = BTreeSet::from([ResourceId::new(ResourceKind::Deployment, "db")]);
        assert_ne!(
            hasher.hash_resource(&attrs, &none),
            hasher.hash_resource(&attrs, &some)
        );
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }
}
