//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{DeployConfig, ValidationResult};
use crate::planner::{DiffDetail, DiffEngine, OperationKind, Outcome, Plan};
use crate::reconciler::{DriftReport, DriftStatus, ReconciliationReport};
use crate::state::{LockInfo, StateDocument};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan operation row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "After")]
    after: String,
}

/// Report row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// Drift row for table display.
#[derive(Tabled)]
struct DriftRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
}

/// Applied resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "External ID")]
    external_id: String,
    #[tabled(rename = "Applied")]
    applied_at: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::new(plan, detailed)),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required, {} resources are up to date.\n",
                "✓".green(),
                plan.len()
            );
        }

        let mut output = String::new();
        let _ = write!(output, "\nReconciliation plan (config {})\n\n", short(&plan.config_hash));

        let rows: Vec<PlanRow> = plan
            .operations
            .iter()
            .enumerate()
            .filter(|(_, op)| op.kind() != OperationKind::NoOp)
            .map(|(i, op)| PlanRow {
                index: i + 1,
                action: Self::format_operation(op.kind()),
                resource: op.id().to_string(),
                after: plan.prerequisites[i]
                    .iter()
                    .map(|p| (p + 1).to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            let engine = DiffEngine::new();
            for op in &plan.operations {
                let details = engine.details(op);
                if details.is_empty() {
                    continue;
                }
                let _ = writeln!(output, "\n  {} {}", Self::format_operation(op.kind()), op.id());
                for detail in details {
                    let _ = writeln!(
                        output,
                        "      {}: {} -> {}",
                        detail.field,
                        detail.old_value.as_deref().unwrap_or("(none)").red(),
                        detail.new_value.as_deref().unwrap_or("(none)").green()
                    );
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged\n",
            plan.count(OperationKind::Create).to_string().green(),
            plan.count(OperationKind::Update).to_string().yellow(),
            plan.count(OperationKind::Delete).to_string().red(),
            plan.count(OperationKind::NoOp)
        );
        output
    }

    /// Formats a reconciliation or destroy report.
    #[must_use]
    pub fn format_report(&self, report: &ReconciliationReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                let status = if report.is_success() {
                    format!("{} Run {} completed", "✓".green(), report.kind)
                } else if report.cancelled {
                    format!("{} Run {} cancelled", "⚠".yellow(), report.kind)
                } else {
                    format!("{} Run {} incomplete", "✗".red(), report.kind)
                };

                let mut output = format!("{status}\n\n");
                let rows: Vec<OutcomeRow> = report
                    .entries
                    .iter()
                    .map(|e| OutcomeRow {
                        resource: e.id.to_string(),
                        action: e.operation.to_string(),
                        outcome: Self::format_outcome(&e.outcome),
                    })
                    .collect();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                let _ = writeln!(output, "\n{}", report.summary());
                if !report.blocked.is_empty() {
                    let _ = writeln!(output, "\n{} Blocked:", "⚠".yellow());
                    for entry in &report.entries {
                        if let Outcome::Blocked { cause, .. } = &entry.outcome {
                            let _ = writeln!(output, "   - {}: {cause}", entry.id);
                        }
                    }
                }
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                if report.is_converged() {
                    return format!("{} No drift detected, state is converged.\n", "✓".green());
                }
                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                let rows: Vec<DriftRow> = report
                    .resources
                    .iter()
                    .map(|r| DriftRow {
                        resource: r.id.to_string(),
                        status: Self::format_drift_status(&r.status),
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                output
            }
        }
    }

    /// Formats a state document.
    #[must_use]
    pub fn format_state(&self, state: &StateDocument) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = write!(output, "\nState: {}/{}\n\n", state.project, state.environment);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}\n", state.resources.len());

                if !state.resources.is_empty() {
                    let rows: Vec<ResourceRow> = state
                        .resources
                        .values()
                        .map(|r| ResourceRow {
                            resource: r.id.to_string(),
                            hash: short(&r.hash).to_string(),
                            external_id: r.external_id.clone().unwrap_or_default(),
                            applied_at: r.applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }
                output
            }
        }
    }

    /// Formats a validation result with a configuration summary.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &DeployConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
                "resources": config.resource_names(),
            })),
            OutputFormat::Text => {
                let mut output = String::new();
                if result.is_valid() {
                    let _ = writeln!(output, "{} Configuration is valid", "✓".green());
                } else {
                    let _ = writeln!(output, "{} Configuration is invalid:", "✗".red());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                let _ = writeln!(output, "\nConfiguration summary:");
                let _ = writeln!(output, "   Project: {}", config.qualified_name());
                let _ = writeln!(output, "   Namespace: {}", config.project.namespace);
                let _ = writeln!(output, "   Resources: {}", config.resources.len());
                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => to_json(lock),
            OutputFormat::Text => format!(
                "State locked: {} by {} (expires in {}s)\n",
                lock.lock_id,
                lock.holder,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a one-line status message.
    #[must_use]
    pub fn message(&self, level: MessageLevel, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "status": level.as_str(),
                "message": message,
            })),
            OutputFormat::Text => {
                let marker = match level {
                    MessageLevel::Success => "✓".green(),
                    MessageLevel::Warning => "⚠".yellow(),
                    MessageLevel::Error => "✗".red(),
                };
                format!("{marker} {message}\n")
            }
        }
    }

    fn format_operation(kind: OperationKind) -> String {
        match kind {
            OperationKind::Create => "+create".green().to_string(),
            OperationKind::Update => "~update".yellow().to_string(),
            OperationKind::Delete => "-delete".red().to_string(),
            OperationKind::NoOp => "no-op".dimmed().to_string(),
        }
    }

    fn format_outcome(outcome: &Outcome) -> String {
        match outcome {
            Outcome::Applied => "applied".green().to_string(),
            Outcome::Unchanged => "unchanged".dimmed().to_string(),
            Outcome::Blocked { root, .. } => format!("blocked ({root})").red().to_string(),
            Outcome::Cancelled => "cancelled".yellow().to_string(),
        }
    }

    fn format_drift_status(status: &DriftStatus) -> String {
        let text = status.to_string();
        match status {
            DriftStatus::InSync => text.green().to_string(),
            DriftStatus::Drifted { .. } | DriftStatus::Unmanaged => text.yellow().to_string(),
            DriftStatus::Missing => text.red().to_string(),
            DriftStatus::Pending => text.dimmed().to_string(),
        }
    }
}

/// Severity of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    /// Completed successfully.
    Success,
    /// Needs attention.
    Warning,
    /// Failed.
    Error,
}

impl MessageLevel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

#[derive(Serialize)]
struct PlanJson {
    config_hash: String,
    creates: usize,
    updates: usize,
    deletes: usize,
    unchanged: usize,
    operations: Vec<OperationJson>,
}

#[derive(Serialize)]
struct OperationJson {
    id: String,
    operation: OperationKind,
    after: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    changes: Vec<DiffDetail>,
}

impl PlanJson {
    fn new(plan: &Plan, detailed: bool) -> Self {
        let engine = DiffEngine::new();
        Self {
            config_hash: plan.config_hash.clone(),
            creates: plan.count(OperationKind::Create),
            updates: plan.count(OperationKind::Update),
            deletes: plan.count(OperationKind::Delete),
            unchanged: plan.count(OperationKind::NoOp),
            operations: plan
                .operations
                .iter()
                .zip(&plan.prerequisites)
                .map(|(op, prereqs)| OperationJson {
                    id: op.id().to_string(),
                    operation: op.kind(),
                    after: prereqs
                        .iter()
                        .map(|&p| plan.operations[p].id().to_string())
                        .collect(),
                    changes: if detailed { engine.details(op) } else { Vec::new() },
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, ConfigValidator};
    use crate::graph::GraphBuilder;
    use crate::planner::DiffEngine;

    fn plan() -> Plan {
        let config = ConfigParser::new()
            .parse_yaml(include_str!("../../templates/keel.deploy.yaml"), None)
            .unwrap();
        let graph = GraphBuilder::new().build(&config.resources).unwrap();
        let applied = StateDocument::new("voting", "dev");
        Plan::from_diff(DiffEngine::new().compute_diff(&graph, &applied), "abcdef0123456789")
    }

    #[test]
    fn test_plan_json_lists_prerequisites() {
        let output = OutputFormatter::new(OutputFormat::Json).format_plan(&plan(), false);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(value["creates"], 9);
        let worker = value["operations"]
            .as_array()
            .unwrap()
            .iter()
            .find(|op| op["id"] == "deployment/worker")
            .unwrap();
        assert_eq!(worker["operation"], "create");
        assert_eq!(worker["after"], serde_json::json!(["deployment/db", "deployment/redis"]));
        assert!(worker.get("changes").is_none());
    }

    #[test]
    fn test_plan_text_shows_summary() {
        colored::control::set_override(false);
        let output = OutputFormatter::new(OutputFormat::Text).format_plan(&plan(), true);
        assert!(output.contains("config abcdef01"));
        assert!(output.contains("Plan: 9 to create, 0 to update, 0 to delete, 0 unchanged"));
        assert!(output.contains("image: (none) -> \"postgres:15-alpine\""));
    }

    #[test]
    fn test_validation_json() {
        let config = ConfigParser::new()
            .parse_yaml(include_str!("../../templates/keel.deploy.yaml"), None)
            .unwrap();
        let result = ConfigValidator::new().check(&config);
        let output = OutputFormatter::new(OutputFormat::Json).format_validation(&config, &result, true);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["valid"], true);
    }

    #[test]
    fn test_message_json() {
        let output = OutputFormatter::new(OutputFormat::Json).message(MessageLevel::Error, "boom");
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "boom");
    }
}
