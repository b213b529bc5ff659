//! Provider module.
//!
//! Providers perform the actual create, read, update and delete calls
//! against a target platform:
//! - The `Provider` trait and the kind-dispatching registry
//! - A Kubernetes API server provider
//! - An in-memory platform
//! - A retrying wrapper for transient failures

mod interface;
mod kubernetes;
pub mod manifest;
mod memory;
mod registry;
mod retry;

pub use interface::Provider;
#[cfg(test)]
pub use interface::MockProvider;
pub use kubernetes::KubernetesProvider;
pub use memory::{CallKind, CallRecord, MemoryProvider};
pub use registry::ProviderRegistry;
pub use retry::{RetryPolicy, RetryingProvider};
