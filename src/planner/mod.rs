//! Planning and execution module.
//!
//! This module handles:
//! - Computing operations by diffing desired against applied state
//! - Ordering operations into a plan with prerequisite edges
//! - Executing plans on a bounded worker pool

mod diff;
mod executor;
mod plan;

pub use diff::{DiffDetail, DiffEngine, DiffResult, Operation, OperationKind};
pub use executor::{ExecutionResult, Outcome, PlanExecutor};
pub use plan::Plan;
