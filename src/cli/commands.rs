//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Keel - declarative reconciliation of Kubernetes deployments and services.
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "KEEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new project with the voting app template.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration and resource graph.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Compute and display the reconciliation plan.
    Plan {
        /// Show changed fields per operation.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Reconcile the platform with the configuration.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Override the configured worker pool size.
        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Check for drift between recorded state and the platform.
    Drift,

    /// Delete every resource recorded in state.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage state backend.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Remove the lock whoever holds it.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply_with_globals() {
        let cli = Cli::try_parse_from([
            "keel",
            "apply",
            "--yes",
            "--max-parallel",
            "8",
            "--output",
            "json",
            "--log-json",
        ])
        .unwrap();

        assert_eq!(cli.output, OutputFormat::Json);
        assert!(cli.log_json);
        match cli.command {
            Commands::Apply { yes, max_parallel } => {
                assert!(yes);
                assert_eq!(max_parallel, Some(8));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_state_unlock() {
        let cli = Cli::try_parse_from(["keel", "state", "unlock", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::State {
                command: StateCommands::Unlock { force: true, lock_id: None }
            }
        ));
    }

    #[test]
    fn test_command_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
