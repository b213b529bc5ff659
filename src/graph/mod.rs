//! Resource graph module.
//!
//! This module turns declared resources into a validated dependency graph:
//! - Resource identities and kinds
//! - Nodes with canonical attribute sets
//! - Validation, cycle detection and topological ordering

mod builder;
mod identity;
mod node;

pub use builder::{GraphBuilder, ResourceGraph, topological_sort};
pub use identity::{ResourceId, ResourceKind};
pub use node::{Attributes, ResourceNode};
