//! Resource identities.
//!
//! A resource is identified by its kind and name, rendered as `kind/name`
//! (for example `deployment/db`). Identities order lexicographically by that
//! rendering, which is the tie-break used everywhere a deterministic order
//! is needed.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::GraphError;

/// Kinds of resources the engine knows how to reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A replicated workload (`apps/v1` Deployment).
    Deployment,
    /// A stable network endpoint (`v1` Service).
    Service,
}

impl ResourceKind {
    /// All known kinds.
    pub const ALL: [Self; 2] = [Self::Deployment, Self::Service];

    /// Returns the lowercase name used in identities.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Service => "service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| GraphError::InvalidIdentity {
                value: s.to_string(),
                reason: format!("unknown kind '{s}'"),
            })
    }
}

/// Unique identity of a resource: kind plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name, unique within its kind.
    pub name: String,
}

impl ResourceId {
    /// Creates a new identity.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Parses a `kind/name` reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is malformed or names an unknown kind.
    pub fn parse(value: &str) -> Result<Self, GraphError> {
        let Some((kind, name)) = value.split_once('/') else {
            return Err(GraphError::InvalidIdentity {
                value: value.to_string(),
                reason: String::from("expected format KIND/NAME"),
            });
        };

        if name.is_empty() || name.contains('/') {
            return Err(GraphError::InvalidIdentity {
                value: value.to_string(),
                reason: String::from("name must be non-empty and contain no '/'"),
            });
        }

        let kind = kind.parse::<ResourceKind>().map_err(|_| GraphError::InvalidIdentity {
            value: value.to_string(),
            reason: format!("unknown kind '{kind}'"),
        })?;

        Ok(Self::new(kind, name))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl Ord for ResourceId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .as_str()
            .cmp(other.kind.as_str())
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for ResourceId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for ResourceId {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identity() {
        let id = ResourceId::parse("service/vote").unwrap();
        assert_eq!(id.kind, ResourceKind::Service);
        assert_eq!(id.name, "vote");
        assert_eq!(id.to_string(), "service/vote");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ResourceId::parse("vote").is_err());
        assert!(ResourceId::parse("service/").is_err());
        assert!(ResourceId::parse("configmap/vote").is_err());
        assert!(ResourceId::parse("service/a/b").is_err());
    }

    #[test]
    fn test_lexicographic_order() {
        let mut ids = vec![
            ResourceId::new(ResourceKind::Service, "db"),
            ResourceId::new(ResourceKind::Deployment, "worker"),
            ResourceId::new(ResourceKind::Deployment, "db"),
        ];
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["deployment/db", "deployment/worker", "service/db"]);
    }

    #[test]
    fn test_serde_as_string() {
        let id = ResourceId::new(ResourceKind::Deployment, "redis");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"deployment/redis\"");
        let back: ResourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
