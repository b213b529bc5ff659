//! Reconciler for maintaining desired state.
//!
//! This module drives one run end to end: build the resource graph, lock the
//! state, diff against the ledger, execute the plan and record history.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, DeployConfig};
use crate::error::Result;
use crate::graph::{GraphBuilder, ResourceGraph, ResourceId};
use crate::planner::{DiffEngine, ExecutionResult, Outcome, OperationKind, Plan, PlanExecutor};
use crate::provider::{Provider, manifest};
use crate::state::{HistoryEntry, LockLease, RunKind, StateLedger, StateStore};

/// Reconciler for maintaining desired state.
pub struct Reconciler<'a> {
    /// Configuration.
    config: &'a DeployConfig,
    /// State store.
    store: Arc<dyn StateStore>,
    /// Provider for every resource kind.
    provider: Arc<dyn Provider>,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Worker pool size.
    max_parallel: usize,
}

/// One line of a reconciliation report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    /// Target resource.
    pub id: ResourceId,
    /// Planned operation.
    pub operation: OperationKind,
    /// Final outcome.
    pub outcome: Outcome,
}

/// Result of a reconciliation or destroy run.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    /// Unique run identifier.
    pub run_id: String,
    /// Type of run.
    pub kind: RunKind,
    /// Configuration hash the run was planned from.
    pub config_hash: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Outcomes in plan order.
    pub entries: Vec<ReportEntry>,
    /// Every identity that ended blocked.
    pub blocked: BTreeSet<ResourceId>,
    /// Whether the run was cancelled before completing.
    pub cancelled: bool,
}

impl<'a> Reconciler<'a> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(
        config: &'a DeployConfig,
        store: Arc<dyn StateStore>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            config,
            store,
            provider,
            hasher: ConfigHasher::new(),
            diff_engine: DiffEngine::new(),
            max_parallel: config.execution.max_parallel,
        }
    }

    /// Overrides the configured worker pool size.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Builds and validates the desired resource graph.
    ///
    /// # Errors
    ///
    /// Returns a graph error for duplicate, unknown, malformed or cyclic
    /// declarations.
    pub fn graph(&self) -> Result<ResourceGraph> {
        Ok(GraphBuilder::new().build(&self.config.resources)?)
    }

    async fn open_ledger(&self) -> Result<StateLedger> {
        StateLedger::open(
            Arc::clone(&self.store),
            &self.config.project.name,
            &self.config.project.environment,
        )
        .await
    }

    /// Computes the plan without applying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid or state cannot be loaded.
    pub async fn plan(&self) -> Result<Plan> {
        let graph = self.graph()?;
        let applied = self.open_ledger().await?.snapshot().await;
        let diff = self.diff_engine.compute_diff(&graph, &applied);
        info!(
            "Diff: {} creates, {} updates, {} deletes, {} unchanged",
            diff.creates, diff.updates, diff.deletes, diff.unchanged
        );
        Ok(Plan::from_diff(diff, &self.hasher.hash_config(self.config)))
    }

    /// Converges the platform towards the declared resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid, the state lock is held
    /// elsewhere, or state cannot be persisted. Provider failures do not
    /// fail the run; they appear as blocked entries in the report.
    pub async fn reconcile(&self, cancel: watch::Receiver<bool>) -> Result<ReconciliationReport> {
        info!(
            "Starting reconciliation for {}/{}",
            self.config.project.name, self.config.project.environment
        );
        let graph = self.graph()?;
        self.run(RunKind::Reconcile, &graph, cancel).await
    }

    /// Deletes every resource recorded in state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is held elsewhere or state cannot
    /// be persisted.
    pub async fn destroy(&self, cancel: watch::Receiver<bool>) -> Result<ReconciliationReport> {
        info!(
            "Destroying {}/{}",
            self.config.project.name, self.config.project.environment
        );
        self.run(RunKind::Destroy, &ResourceGraph::default(), cancel).await
    }

    /// Runs one locked pass from `graph` and releases the lock afterwards.
    async fn run(
        &self,
        kind: RunKind,
        graph: &ResourceGraph,
        cancel: watch::Receiver<bool>,
    ) -> Result<ReconciliationReport> {
        let lease = LockLease::acquire(Arc::clone(&self.store)).await?;
        let result = self.run_locked(kind, graph, cancel).await;
        if let Err(e) = lease.release().await {
            warn!("State lock was not released: {e}");
        }
        result
    }

    async fn run_locked(
        &self,
        kind: RunKind,
        graph: &ResourceGraph,
        cancel: watch::Receiver<bool>,
    ) -> Result<ReconciliationReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let config_hash = self.hasher.hash_config(self.config);

        let ledger = Arc::new(self.open_ledger().await?);
        let applied = ledger.snapshot().await;
        let diff = self.diff_engine.compute_diff(graph, &applied);
        let plan = Plan::from_diff(diff, &config_hash);
        debug!("{plan}");

        if !plan.has_changes() {
            info!("No changes required, state is converged");
        }

        let planned: Vec<(ResourceId, OperationKind)> = plan
            .operations
            .iter()
            .map(|op| (op.id().clone(), op.kind()))
            .collect();

        let executor = PlanExecutor::new(
            Arc::clone(&self.provider),
            Arc::clone(&ledger),
            self.max_parallel,
        )
        .with_cancellation(cancel);

        let ExecutionResult { outcomes, cancelled } = match executor.execute(plan).await {
            Ok(result) => result,
            Err(err) => {
                error!("Run {run_id} aborted: {err}");
                let entry = HistoryEntry::new(&run_id, kind, &config_hash, vec![], Some(err.to_string()));
                if let Err(e) = ledger.append_history(entry).await {
                    warn!("Failed to record run history: {e}");
                }
                return Err(err);
            }
        };

        let entries: Vec<ReportEntry> = planned
            .into_iter()
            .zip(outcomes)
            .map(|((id, operation), outcome)| ReportEntry { id, operation, outcome })
            .collect();

        let report = ReconciliationReport {
            run_id,
            kind,
            config_hash,
            started_at,
            finished_at: Utc::now(),
            blocked: entries
                .iter()
                .filter(|e| matches!(e.outcome, Outcome::Blocked { .. }))
                .map(|e| e.id.clone())
                .collect(),
            entries,
            cancelled,
        };

        let error = (!report.is_success()).then(|| report.summary());
        let changed = report
            .entries
            .iter()
            .filter(|e| e.outcome == Outcome::Applied)
            .map(|e| e.id.to_string())
            .collect();
        ledger
            .append_history(HistoryEntry::new(&report.run_id, kind, &report.config_hash, changed, error))
            .await?;

        if report.blocked.is_empty() {
            info!("Run {} finished: {}", report.run_id, report.summary());
        } else {
            warn!("Run {} finished: {}", report.run_id, report.summary());
        }
        Ok(report)
    }

    /// Compares recorded state with what the platform reports.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid, state cannot be loaded or a
    /// provider read fails.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!(
            "Checking for drift in {}/{}",
            self.config.project.name, self.config.project.environment
        );

        let graph = self.graph()?;
        let applied = self.open_ledger().await?.snapshot().await;
        let mut resources = Vec::new();

        for (id, state) in &applied.resources {
            let status = match self.provider.read(id).await? {
                None => DriftStatus::Missing,
                Some(live) => {
                    let fields = manifest::drifted_fields(&state.attributes, &live.attributes);
                    if fields.is_empty() {
                        DriftStatus::InSync
                    } else {
                        DriftStatus::Drifted { fields }
                    }
                }
            };
            debug!("{id}: {status:?}");
            resources.push(DriftEntry {
                id: id.clone(),
                status,
            });
        }

        for node in graph.nodes_in_order() {
            if applied.get(&node.id).is_some() {
                continue;
            }
            let status = if self.provider.read(&node.id).await?.is_some() {
                DriftStatus::Unmanaged
            } else {
                DriftStatus::Pending
            };
            resources.push(DriftEntry {
                id: node.id.clone(),
                status,
            });
        }

        resources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(DriftReport { resources })
    }
}

impl ReconciliationReport {
    /// Returns true if nothing was blocked or cancelled.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.blocked.is_empty() && !self.cancelled
    }

    /// Counts entries with the given operation that reached `Applied`.
    #[must_use]
    pub fn applied(&self, operation: OperationKind) -> usize {
        self.entries
            .iter()
            .filter(|e| e.operation == operation && e.outcome == Outcome::Applied)
            .count()
    }

    /// Returns the outcome recorded for `id`.
    #[must_use]
    pub fn outcome(&self, id: &ResourceId) -> Option<&Outcome> {
        self.entries.iter().find(|e| &e.id == id).map(|e| &e.outcome)
    }

    /// One-line summary of the run.
    #[must_use]
    pub fn summary(&self) -> String {
        let unchanged = self
            .entries
            .iter()
            .filter(|e| e.outcome == Outcome::Unchanged)
            .count();
        let cancelled = self
            .entries
            .iter()
            .filter(|e| e.outcome == Outcome::Cancelled)
            .count();
        format!(
            "{} created, {} updated, {} deleted, {unchanged} unchanged, {} blocked, {cancelled} cancelled",
            self.applied(OperationKind::Create),
            self.applied(OperationKind::Update),
            self.applied(OperationKind::Delete),
            self.blocked.len(),
        )
    }
}

/// Drift status of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriftStatus {
    /// The platform matches recorded state.
    InSync,
    /// Recorded fields differ on the platform.
    Drifted {
        /// Top-level fields that differ.
        fields: Vec<String>,
    },
    /// Recorded in state but gone from the platform.
    Missing,
    /// Declared and present on the platform, but not in state.
    Unmanaged,
    /// Declared, never applied.
    Pending,
}

/// Drift status of one resource.
#[derive(Debug, Clone, Serialize)]
pub struct DriftEntry {
    /// Resource identity.
    pub id: ResourceId,
    /// Observed status.
    pub status: DriftStatus,
}

/// Report of drift detection.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    /// Per-resource status, ordered by identity.
    pub resources: Vec<DriftEntry>,
}

impl DriftReport {
    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.resources.iter().all(|r| r.status == DriftStatus::InSync)
    }

    /// Returns the status recorded for `id`.
    #[must_use]
    pub fn status(&self, id: &ResourceId) -> Option<&DriftStatus> {
        self.resources.iter().find(|r| &r.id == id).map(|r| &r.status)
    }
}

impl std::fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InSync => write!(f, "in sync"),
            Self::Drifted { fields } => write!(f, "drifted ({})", fields.join(", ")),
            Self::Missing => write!(f, "missing"),
            Self::Unmanaged => write!(f, "unmanaged"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_converged() {
            return write!(f, "No drift detected, state is converged");
        }
        writeln!(f, "Drift detected:")?;
        for entry in self.resources.iter().filter(|r| r.status != DriftStatus::InSync) {
            writeln!(f, "  - {}: {}", entry.id, entry.status)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.is_success() { "successful" } else { "incomplete" };
        writeln!(f, "Run {} {status}:", self.run_id)?;
        for entry in &self.entries {
            writeln!(f, "  {} {}: {}", entry.operation, entry.id, entry.outcome)?;
        }
        write!(f, "  {}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::graph::ResourceKind;
    use crate::provider::{CallKind, MemoryProvider};
    use crate::state::LocalStateStore;
    use serde_json::json;
    use tempfile::TempDir;

    const VOTING: &str = r"
project:
  name: voting
provider:
  backend: memory
resources:
  - kind: deployment
    name: db
    spec:
      image: postgres:15-alpine
  - kind: deployment
    name: redis
    spec:
      image: redis:7-alpine
  - kind: deployment
    name: worker
    depends_on: [deployment/db, deployment/redis]
    spec:
      image: dockersamples/examplevotingapp_worker:latest
  - kind: service
    name: db
    depends_on: [deployment/db]
    spec:
      type: ClusterIP
      selector:
        app: db
      ports:
        - name: postgres
          port: 5432
          target_port: 5432
";

    fn config(yaml: &str) -> DeployConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    fn store(dir: &TempDir) -> Arc<dyn StateStore> {
        Arc::new(LocalStateStore::with_base_dir(dir.path()))
    }

    fn never() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    fn deployment(name: &str) -> ResourceId {
        ResourceId::new(ResourceKind::Deployment, name)
    }

    #[tokio::test]
    async fn test_second_run_is_all_noop() {
        let dir = TempDir::new().unwrap();
        let config = config(VOTING);
        let provider = MemoryProvider::new();
        let reconciler = Reconciler::new(&config, store(&dir), Arc::new(provider.clone()));

        let first = reconciler.reconcile(never()).await.unwrap();
        assert!(first.is_success());
        assert_eq!(first.applied(OperationKind::Create), 4);

        let mutations = provider.calls().await.len();
        let second = reconciler.reconcile(never()).await.unwrap();
        assert!(second.entries.iter().all(|e| e.operation == OperationKind::NoOp));
        assert!(second.entries.iter().all(|e| e.outcome == Outcome::Unchanged));
        assert_eq!(provider.calls().await.len(), mutations);

        let plan = reconciler.plan().await.unwrap();
        assert!(!plan.has_changes());
    }

    #[tokio::test]
    async fn test_failed_run_recovers_on_rerun() {
        let dir = TempDir::new().unwrap();
        let config = config(VOTING);
        let provider = MemoryProvider::new();
        provider.fail_permanently(&deployment("db"), "crash loop").await;
        let reconciler = Reconciler::new(&config, store(&dir), Arc::new(provider.clone()));

        let report = reconciler.reconcile(never()).await.unwrap();
        assert!(!report.is_success());
        let blocked: Vec<String> = report.blocked.iter().map(ToString::to_string).collect();
        assert_eq!(blocked, ["deployment/db", "deployment/worker", "service/db"]);
        assert_eq!(report.outcome(&deployment("redis")), Some(&Outcome::Applied));

        provider.heal(&deployment("db")).await;
        let rerun = reconciler.reconcile(never()).await.unwrap();
        assert!(rerun.is_success());
        assert_eq!(rerun.applied(OperationKind::Create), 3);
        assert_eq!(rerun.outcome(&deployment("redis")), Some(&Outcome::Unchanged));

        let history = LocalStateStore::with_base_dir(dir.path())
            .load()
            .await
            .unwrap()
            .unwrap()
            .history;
        assert_eq!(history.len(), 2);
        assert!(!history[0].success);
        assert!(history[1].success);
    }

    #[tokio::test]
    async fn test_invalid_graph_fails_before_any_call() {
        let dir = TempDir::new().unwrap();
        let config = config(
            "project:\n  name: voting\nprovider:\n  backend: memory\nresources:\n  - kind: deployment\n    name: a\n    depends_on: [deployment/b]\n    spec:\n      image: a:1\n  - kind: deployment\n    name: b\n    depends_on: [deployment/a]\n    spec:\n      image: b:1\n",
        );
        let provider = MemoryProvider::new();
        let reconciler = Reconciler::new(&config, store(&dir), Arc::new(provider.clone()));

        assert!(reconciler.reconcile(never()).await.is_err());
        assert!(provider.calls().await.is_empty());
        assert!(!store(&dir).is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_held_lock_rejects_run() {
        let dir = TempDir::new().unwrap();
        let config = config(VOTING);
        let store = store(&dir);
        store.acquire_lock("someone-else").await.unwrap();

        let reconciler = Reconciler::new(&config, Arc::clone(&store), Arc::new(MemoryProvider::new()));
        assert!(reconciler.reconcile(never()).await.is_err());
    }

    #[tokio::test]
    async fn test_drift_detection() {
        let dir = TempDir::new().unwrap();
        let config = config(VOTING);
        let provider = MemoryProvider::new();
        let reconciler = Reconciler::new(&config, store(&dir), Arc::new(provider.clone()));
        reconciler.reconcile(never()).await.unwrap();

        assert!(reconciler.check_drift().await.unwrap().is_converged());

        provider
            .modify_out_of_band(&deployment("redis"), "image", json!("redis:6"))
            .await;
        provider.remove_out_of_band(&deployment("worker")).await;

        let report = reconciler.check_drift().await.unwrap();
        assert!(!report.is_converged());
        assert_eq!(
            report.status(&deployment("redis")),
            Some(&DriftStatus::Drifted {
                fields: vec![String::from("image")]
            })
        );
        assert_eq!(report.status(&deployment("worker")), Some(&DriftStatus::Missing));
        assert_eq!(report.status(&deployment("db")), Some(&DriftStatus::InSync));
    }

    #[tokio::test]
    async fn test_destroy_removes_everything_dependents_first() {
        let dir = TempDir::new().unwrap();
        let config = config(VOTING);
        let provider = MemoryProvider::new();
        let reconciler = Reconciler::new(&config, store(&dir), Arc::new(provider.clone()));
        reconciler.reconcile(never()).await.unwrap();

        let report = reconciler.destroy(never()).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.applied(OperationKind::Delete), 4);
        assert_eq!(provider.object_count().await, 0);

        let deletes: Vec<String> = provider
            .calls()
            .await
            .into_iter()
            .filter(|c| c.kind == CallKind::Delete)
            .map(|c| c.id.to_string())
            .collect();
        let position = |id: &str| deletes.iter().position(|d| d == id).unwrap();
        assert!(position("deployment/worker") < position("deployment/db"));
        assert!(position("service/db") < position("deployment/db"));
    }

    #[tokio::test]
    async fn test_report_serializes_to_json() {
        let dir = TempDir::new().unwrap();
        let config = config(VOTING);
        let reconciler = Reconciler::new(&config, store(&dir), Arc::new(MemoryProvider::new()));
        let report = reconciler.reconcile(never()).await.unwrap();

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["kind"], "reconcile");
        assert_eq!(value["entries"][0]["id"], "deployment/db");
        assert_eq!(value["entries"][0]["operation"], "create");
        assert_eq!(value["entries"][0]["outcome"]["status"], "applied");
    }
}
