// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// Tests unwrap freely
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Keel
//!
//! A declarative, idempotent resource-reconciliation engine for Kubernetes
//! Deployments and Services.
//!
//! ## Overview
//!
//! Keel reads a desired-state document, builds a dependency graph of the
//! declared resources, diffs it against the last applied state and drives a
//! provider until the platform matches:
//!
//! - Independent resources are applied in parallel on a bounded worker pool
//! - A dependency is always committed before its dependents start
//! - A failed resource blocks only the resources that depend on it
//! - Re-running after a partial failure only touches what is still pending
//!
//! ## Architecture
//!
//! 1. **Desired State**: declared in `keel.deploy.yaml`
//! 2. **Resource Graph**: validated, acyclic, topologically ordered
//! 3. **Plan**: per-resource create, update, delete or no-op
//! 4. **Execution**: provider calls with a state commit after each success
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation and hashing
//! - [`graph`]: Resource identities and the dependency graph
//! - [`state`]: State storage backends (local, S3), locking and the ledger
//! - [`provider`]: Kubernetes and in-memory providers, retries
//! - [`planner`]: Diffing, plan construction and execution
//! - [`reconciler`]: End-to-end runs, drift checks and destroy
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: voting
//!
//! resources:
//!   - kind: deployment
//!     name: db
//!     spec:
//!       image: postgres:15-alpine
//!   - kind: service
//!     name: db
//!     depends_on: [deployment/db]
//!     spec:
//!       selector:
//!         app: db
//!       ports:
//!         - name: postgres
//!           port: 5432
//!           target_port: 5432
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig};
pub use error::{KeelError, Result};
pub use graph::{GraphBuilder, ResourceGraph, ResourceId, ResourceKind};
pub use planner::{DiffEngine, Outcome, Plan, PlanExecutor};
pub use provider::{KubernetesProvider, MemoryProvider, Provider, ProviderRegistry};
pub use reconciler::{DriftReport, ReconciliationReport, Reconciler};
pub use state::{LocalStateStore, S3StateStore, StateLedger, StateStore};
