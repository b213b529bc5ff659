//! CLI module for the keel tool.
//!
//! This module provides the command-line interface for planning, applying
//! and inspecting reconciliations.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::{MessageLevel, OutputFormatter};
