//! Plan execution on a bounded worker pool.
//!
//! Each ready operation is moved into its own task. A task holds a semaphore
//! permit for the duration of its provider call and ledger commit, so a
//! dependent only becomes ready after its dependency's state is persisted.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, warn};

use super::diff::Operation;
use super::plan::{Plan, reachable};
use crate::error::{KeelError, ProviderError, ReconcileError, Result};
use crate::graph::ResourceId;
use crate::provider::Provider;
use crate::state::StateLedger;

/// Final outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The provider call succeeded and the ledger was updated.
    Applied,
    /// Nothing needed to change.
    Unchanged,
    /// The operation failed, or an operation it waits on failed.
    Blocked {
        /// The provider error, or which upstream failed.
        cause: String,
        /// Identity whose operation failed.
        root: ResourceId,
    },
    /// The run was cancelled before the operation started.
    Cancelled,
}

impl Outcome {
    /// Returns true for `Applied` and `Unchanged`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Applied | Self::Unchanged)
    }
}

/// Outcomes of an executed plan, index-aligned with its operations.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// One outcome per plan operation.
    pub outcomes: Vec<Outcome>,
    /// Whether any operation was cancelled.
    pub cancelled: bool,
}

enum TaskResult {
    Done,
    Cancelled,
    ProviderFailed(ProviderError),
    StoreFailed(KeelError),
}

/// Scheduling bookkeeping for one run.
struct Schedule {
    successors: Vec<Vec<usize>>,
    waiting: Vec<usize>,
    ready: BTreeSet<usize>,
    outcomes: Vec<Option<Outcome>>,
}

impl Schedule {
    fn new(plan: &Plan) -> Self {
        let waiting: Vec<usize> = plan.prerequisites.iter().map(Vec::len).collect();
        let ready = (0..waiting.len()).filter(|&i| waiting[i] == 0).collect();
        Self {
            successors: plan.successors(),
            waiting,
            ready,
            outcomes: vec![None; plan.len()],
        }
    }

    fn succeed(&mut self, index: usize, outcome: Outcome) {
        self.outcomes[index] = Some(outcome);
        for &next in &self.successors[index] {
            self.waiting[next] -= 1;
            if self.waiting[next] == 0 {
                self.ready.insert(next);
            }
        }
    }

    /// Blocks `index` and every operation that transitively waits on it.
    fn block(&mut self, index: usize, root: &ResourceId, cause: String) -> Vec<usize> {
        self.outcomes[index] = Some(Outcome::Blocked {
            cause,
            root: root.clone(),
        });

        let mut blocked = Vec::new();
        for next in reachable(&self.successors, index) {
            if self.outcomes[next].is_some() {
                continue;
            }
            self.outcomes[next] = Some(Outcome::Blocked {
                cause: format!("dependency {root} failed"),
                root: root.clone(),
            });
            self.ready.remove(&next);
            blocked.push(next);
        }
        blocked
    }
}

/// Executes plans against a provider, committing to the ledger.
pub struct PlanExecutor {
    provider: Arc<dyn Provider>,
    ledger: Arc<StateLedger>,
    max_parallel: usize,
    cancel: watch::Receiver<bool>,
}

impl PlanExecutor {
    /// Creates an executor with at most `max_parallel` concurrent operations.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, ledger: Arc<StateLedger>, max_parallel: usize) -> Self {
        let (_, cancel) = watch::channel(false);
        Self {
            provider,
            ledger,
            max_parallel: max_parallel.max(1),
            cancel,
        }
    }

    /// Stops scheduling new operations once the channel reads `true`.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Executes every operation of the plan.
    ///
    /// Provider failures block the failing operation and everything waiting
    /// on it while independent operations continue.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot persist a commit or a worker
    /// task dies. Scheduling stops and in-flight tasks are drained first.
    pub async fn execute(&self, plan: Plan) -> Result<ExecutionResult> {
        let mut schedule = Schedule::new(&plan);
        let ids: Vec<ResourceId> = plan.operations.iter().map(|op| op.id().clone()).collect();
        let mut pending: Vec<Option<Operation>> = plan.operations.into_iter().map(Some).collect();

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks: JoinSet<(usize, TaskResult)> = JoinSet::new();
        let mut running: HashMap<Id, usize> = HashMap::new();
        let mut fatal: Option<KeelError> = None;

        info!(
            "Executing {} operations with up to {} workers",
            pending.len(),
            self.max_parallel
        );

        loop {
            if fatal.is_none() && !self.is_cancelled() {
                while let Some(index) = schedule.ready.pop_first() {
                    let Some(operation) = pending[index].take() else {
                        continue;
                    };
                    if let Operation::NoOp { node, .. } = &operation {
                        debug!("{} unchanged", node.id);
                        schedule.succeed(index, Outcome::Unchanged);
                        continue;
                    }

                    debug!("Scheduling {operation}");
                    let semaphore = Arc::clone(&semaphore);
                    let provider = Arc::clone(&self.provider);
                    let ledger = Arc::clone(&self.ledger);
                    let cancel = self.cancel.clone();
                    let handle = tasks.spawn(async move {
                        let Ok(_permit) = semaphore.acquire_owned().await else {
                            return (index, TaskResult::Cancelled);
                        };
                        if *cancel.borrow() {
                            return (index, TaskResult::Cancelled);
                        }
                        (index, run_operation(operation, provider.as_ref(), &ledger).await)
                    });
                    running.insert(handle.id(), index);
                }
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };

            match joined {
                Ok((task, (index, result))) => {
                    running.remove(&task);
                    match result {
                        TaskResult::Done => {
                            info!("{} applied", ids[index]);
                            schedule.succeed(index, Outcome::Applied);
                        }
                        TaskResult::Cancelled => {
                            debug!("{} cancelled before start", ids[index]);
                            schedule.outcomes[index] = Some(Outcome::Cancelled);
                        }
                        TaskResult::ProviderFailed(err) => {
                            let root = &ids[index];
                            warn!("{root} failed: {err}");
                            for blocked in schedule.block(index, root, err.to_string()) {
                                warn!("{} blocked by {root}", ids[blocked]);
                            }
                        }
                        TaskResult::StoreFailed(err) => {
                            error!("Failed to persist state for {}: {err}", ids[index]);
                            schedule.block(index, &ids[index], err.to_string());
                            fatal.get_or_insert(err);
                        }
                    }
                }
                Err(join_error) => {
                    let index = running.remove(&join_error.id());
                    let resource = index.map_or_else(|| String::from("unknown"), |i| ids[i].to_string());
                    error!("Worker for {resource} failed: {join_error}");
                    if let Some(index) = index {
                        schedule.block(index, &ids[index], join_error.to_string());
                    }
                    fatal.get_or_insert(
                        ReconcileError::WorkerFailed {
                            resource,
                            message: join_error.to_string(),
                        }
                        .into(),
                    );
                }
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        let outcomes: Vec<Outcome> = schedule
            .outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or(Outcome::Cancelled))
            .collect();
        let cancelled = outcomes.contains(&Outcome::Cancelled);
        if cancelled {
            warn!("Run cancelled; unstarted operations were skipped");
        }

        Ok(ExecutionResult {
            outcomes,
            cancelled,
        })
    }
}

/// Performs one provider call and commits its result.
async fn run_operation(operation: Operation, provider: &dyn Provider, ledger: &StateLedger) -> TaskResult {
    let applied = match operation {
        Operation::Create { node } => provider.create(&node).await,
        Operation::Update { node, prior } => provider.update(&node, &prior).await,
        Operation::Delete { prior } => {
            return match provider.delete(&prior).await {
                Ok(()) => commit(ledger.forget(&prior.id).await),
                Err(err) => TaskResult::ProviderFailed(err),
            };
        }
        Operation::NoOp { .. } => return TaskResult::Done,
    };

    match applied {
        Ok(state) => commit(ledger.record(state).await.map(|_| ())),
        Err(err) => TaskResult::ProviderFailed(err),
    }
}

fn commit(result: Result<()>) -> TaskResult {
    match result {
        Ok(()) => TaskResult::Done,
        Err(err) => TaskResult::StoreFailed(err),
    }
}

impl std::fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("provider", &self.provider.name())
            .field("max_parallel", &self.max_parallel)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Blocked { cause, .. } => write!(f, "blocked: {cause}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Declaration, DeploymentSpec, ResourceConfig};
    use crate::graph::{GraphBuilder, ResourceGraph, ResourceKind};
    use crate::planner::DiffEngine;
    use crate::provider::{CallKind, MemoryProvider, MockProvider};
    use crate::state::{LocalStateStore, LockInfo, StateDocument, StateStore};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    fn deployment(name: &str, deps: &[&str]) -> ResourceConfig {
        ResourceConfig::Deployment(Declaration {
            name: name.to_string(),
            depends_on: deps.iter().map(ToString::to_string).collect(),
            spec: DeploymentSpec {
                image: format!("{name}:1"),
                replicas: 1,
                labels: BTreeMap::new(),
                env: BTreeMap::new(),
                ports: vec![],
                volumes: vec![],
            },
        })
    }

    fn id(name: &str) -> ResourceId {
        ResourceId::new(ResourceKind::Deployment, name)
    }

    async fn ledger(dir: &TempDir) -> Arc<StateLedger> {
        let store: Arc<dyn StateStore> = Arc::new(LocalStateStore::with_base_dir(dir.path()));
        Arc::new(StateLedger::open(store, "voting", "dev").await.unwrap())
    }

    async fn plan_for(graph: &ResourceGraph, ledger: &StateLedger) -> Plan {
        let applied = ledger.snapshot().await;
        Plan::from_diff(DiffEngine::new().compute_diff(graph, &applied), "cfg")
    }

    fn outcome_of<'a>(plan_ids: &[ResourceId], result: &'a ExecutionResult, name: &str) -> &'a Outcome {
        let index = plan_ids.iter().position(|i| i.name == name).unwrap();
        &result.outcomes[index]
    }

    #[tokio::test]
    async fn test_failed_dependency_blocks_dependent() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir).await;
        let provider = MemoryProvider::new();
        provider.fail_permanently(&id("db"), "image pull failed").await;

        let graph = GraphBuilder::new()
            .build(&[deployment("db", &[]), deployment("service", &["deployment/db"])])
            .unwrap();
        let plan = plan_for(&graph, &ledger).await;
        let ids: Vec<ResourceId> = plan.operations.iter().map(|op| op.id().clone()).collect();

        let executor = PlanExecutor::new(Arc::new(provider.clone()), Arc::clone(&ledger), 4);
        let result = executor.execute(plan).await.unwrap();

        match outcome_of(&ids, &result, "db") {
            Outcome::Blocked { cause, root } => {
                assert_eq!(root, &id("db"));
                assert!(cause.contains("image pull failed"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            outcome_of(&ids, &result, "service"),
            &Outcome::Blocked {
                cause: String::from("dependency deployment/db failed"),
                root: id("db"),
            }
        );

        let calls = provider.calls().await;
        assert!(calls.iter().all(|c| c.id == id("db")));
        assert!(ledger.snapshot().await.resources.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_contained_to_dependents() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir).await;
        let provider = MemoryProvider::new();
        provider.fail_permanently(&id("redis"), "quota exceeded").await;

        let graph = GraphBuilder::new()
            .build(&[
                deployment("db", &[]),
                deployment("redis", &[]),
                deployment("result", &["deployment/db"]),
                deployment("vote", &["deployment/redis"]),
                deployment("worker", &["deployment/db", "deployment/redis"]),
            ])
            .unwrap();
        let plan = plan_for(&graph, &ledger).await;
        let ids: Vec<ResourceId> = plan.operations.iter().map(|op| op.id().clone()).collect();

        let result = PlanExecutor::new(Arc::new(provider), Arc::clone(&ledger), 2)
            .execute(plan)
            .await
            .unwrap();

        assert_eq!(outcome_of(&ids, &result, "db"), &Outcome::Applied);
        assert_eq!(outcome_of(&ids, &result, "result"), &Outcome::Applied);
        for name in ["redis", "vote", "worker"] {
            assert!(matches!(
                outcome_of(&ids, &result, name),
                Outcome::Blocked { root, .. } if root == &id("redis")
            ));
        }
        assert!(!result.cancelled);

        let doc = ledger.snapshot().await;
        let applied: Vec<&str> = doc.resources.keys().map(|i| i.name.as_str()).collect();
        assert_eq!(applied, ["db", "result"]);
    }

    #[tokio::test]
    async fn test_dependency_commits_before_dependent() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir).await;
        let provider = MemoryProvider::new().with_latency(Duration::from_millis(5));

        let graph = GraphBuilder::new()
            .build(&[
                deployment("db", &[]),
                deployment("result", &["deployment/db"]),
                deployment("worker", &["deployment/result"]),
            ])
            .unwrap();
        let plan = plan_for(&graph, &ledger).await;
        PlanExecutor::new(Arc::new(provider), Arc::clone(&ledger), 4)
            .execute(plan)
            .await
            .unwrap();

        let doc = ledger.snapshot().await;
        let db = doc.get(&id("db")).unwrap().applied_at;
        let result = doc.get(&id("result")).unwrap().applied_at;
        let worker = doc.get(&id("worker")).unwrap().applied_at;
        assert!(db <= result);
        assert!(result <= worker);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir).await;
        let provider = MemoryProvider::new().with_latency(Duration::from_millis(20));

        let declarations: Vec<ResourceConfig> =
            (0..8).map(|i| deployment(&format!("app{i}"), &[])).collect();
        let graph = GraphBuilder::new().build(&declarations).unwrap();
        let plan = plan_for(&graph, &ledger).await;

        let result = PlanExecutor::new(Arc::new(provider.clone()), Arc::clone(&ledger), 3)
            .execute(plan)
            .await
            .unwrap();

        assert!(result.outcomes.iter().all(|o| o == &Outcome::Applied));
        let peak = provider.peak_concurrency();
        assert!(peak <= 3, "peak concurrency {peak}");
        assert!(peak >= 2, "independent operations should overlap");
    }

    #[tokio::test]
    async fn test_deletes_dependents_first() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir).await;
        let provider = MemoryProvider::new();
        let executor = PlanExecutor::new(Arc::new(provider.clone()), Arc::clone(&ledger), 4);

        let graph = GraphBuilder::new()
            .build(&[deployment("a", &[]), deployment("b", &["deployment/a"])])
            .unwrap();
        executor.execute(plan_for(&graph, &ledger).await).await.unwrap();

        let empty = GraphBuilder::new().build(&[]).unwrap();
        let result = executor.execute(plan_for(&empty, &ledger).await).await.unwrap();
        assert!(result.outcomes.iter().all(|o| o == &Outcome::Applied));

        let deletes: Vec<String> = provider
            .calls()
            .await
            .into_iter()
            .filter(|c| c.kind == CallKind::Delete)
            .map(|c| c.id.name)
            .collect();
        assert_eq!(deletes, ["b", "a"]);
        assert_eq!(provider.object_count().await, 0);
        assert!(ledger.snapshot().await.resources.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_unstarted_operations() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir).await;
        let provider = MemoryProvider::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        let graph = GraphBuilder::new()
            .build(&[deployment("db", &[]), deployment("worker", &["deployment/db"])])
            .unwrap();
        let plan = plan_for(&graph, &ledger).await;

        let result = PlanExecutor::new(Arc::new(provider.clone()), Arc::clone(&ledger), 4)
            .with_cancellation(cancel_rx)
            .execute(plan)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert!(result.outcomes.iter().all(|o| o == &Outcome::Cancelled));
        assert!(provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_run_lets_in_flight_operation_commit() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir).await;
        let provider = MemoryProvider::new().with_latency(Duration::from_millis(100));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let graph = GraphBuilder::new()
            .build(&[deployment("db", &[]), deployment("worker", &["deployment/db"])])
            .unwrap();
        let plan = plan_for(&graph, &ledger).await;
        let ids: Vec<ResourceId> = plan.operations.iter().map(|op| op.id().clone()).collect();

        let executor = PlanExecutor::new(Arc::new(provider.clone()), Arc::clone(&ledger), 4)
            .with_cancellation(cancel_rx);
        let run = tokio::spawn(async move { executor.execute(plan).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel_tx.send(true).unwrap();
        let result = run.await.unwrap().unwrap();

        assert!(result.cancelled);
        assert_eq!(outcome_of(&ids, &result, "db"), &Outcome::Applied);
        assert_eq!(outcome_of(&ids, &result, "worker"), &Outcome::Cancelled);

        let doc = ledger.snapshot().await;
        let applied: Vec<&str> = doc.resources.keys().map(|i| i.name.as_str()).collect();
        assert_eq!(applied, ["db"]);
        assert!(provider.calls().await.iter().all(|c| c.id == id("db")));

        let persisted = LocalStateStore::with_base_dir(dir.path())
            .load()
            .await
            .unwrap()
            .unwrap();
        assert!(persisted.get(&id("db")).is_some());
        assert!(persisted.get(&id("worker")).is_none());
    }

    #[tokio::test]
    async fn test_failed_update_keeps_its_former_dependency() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir).await;
        let provider = MemoryProvider::new();
        let executor = PlanExecutor::new(Arc::new(provider.clone()), Arc::clone(&ledger), 4);

        let before = GraphBuilder::new()
            .build(&[deployment("a", &[]), deployment("b", &["deployment/a"])])
            .unwrap();
        executor.execute(plan_for(&before, &ledger).await).await.unwrap();

        let mut b = deployment("b", &[]);
        if let ResourceConfig::Deployment(d) = &mut b {
            d.spec.image = String::from("b:2");
        }
        let after = GraphBuilder::new().build(&[b]).unwrap();
        provider.fail_permanently(&id("b"), "rollout rejected").await;

        let plan = plan_for(&after, &ledger).await;
        let ids: Vec<ResourceId> = plan.operations.iter().map(|op| op.id().clone()).collect();
        let result = executor.execute(plan).await.unwrap();

        assert!(matches!(
            outcome_of(&ids, &result, "b"),
            Outcome::Blocked { root, .. } if root == &id("b")
        ));
        assert_eq!(
            outcome_of(&ids, &result, "a"),
            &Outcome::Blocked {
                cause: String::from("dependency deployment/b failed"),
                root: id("b"),
            }
        );
        assert!(provider.object(&id("a")).await.is_some());
        assert!(ledger.snapshot().await.get(&id("a")).is_some());
        assert!(
            !provider
                .calls()
                .await
                .iter()
                .any(|c| c.kind == CallKind::Delete)
        );
    }

    #[tokio::test]
    async fn test_panicking_worker_names_its_resource() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir).await;
        let mut provider = MockProvider::new();
        provider
            .expect_create()
            .returning(|_| panic!("provider crashed"));

        let graph = GraphBuilder::new()
            .build(&[deployment("db", &[]), deployment("worker", &["deployment/db"])])
            .unwrap();
        let plan = plan_for(&graph, &ledger).await;

        let err = PlanExecutor::new(Arc::new(provider), Arc::clone(&ledger), 4)
            .execute(plan)
            .await
            .unwrap_err();
        match err {
            KeelError::Reconcile(ReconcileError::WorkerFailed { resource, .. }) => {
                assert_eq!(resource, "deployment/db");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(ledger.snapshot().await.resources.is_empty());
    }

    #[tokio::test]
    async fn test_noop_operations_make_no_calls() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir).await;
        let provider = MemoryProvider::new();
        let executor = PlanExecutor::new(Arc::new(provider.clone()), Arc::clone(&ledger), 4);
        let graph = GraphBuilder::new()
            .build(&[deployment("db", &[]), deployment("worker", &["deployment/db"])])
            .unwrap();

        executor.execute(plan_for(&graph, &ledger).await).await.unwrap();
        let calls_after_first = provider.calls().await.len();

        let result = executor.execute(plan_for(&graph, &ledger).await).await.unwrap();
        assert!(result.outcomes.iter().all(|o| o == &Outcome::Unchanged));
        assert_eq!(provider.calls().await.len(), calls_after_first);
    }

    struct ReadOnlyStore;

    #[async_trait]
    impl StateStore for ReadOnlyStore {
        async fn load(&self) -> Result<Option<StateDocument>> {
            Ok(None)
        }
        async fn save(&self, _state: &StateDocument) -> Result<()> {
            Err(crate::error::StateError::io("disk full").into())
        }
        async fn delete(&self) -> Result<()> {
            Ok(())
        }
        async fn exists(&self) -> Result<bool> {
            Ok(false)
        }
        async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
            Ok(LockInfo::new(holder))
        }
        async fn release_lock(&self, _lock_id: &str) -> Result<()> {
            Ok(())
        }
        async fn force_unlock(&self) -> Result<()> {
            Ok(())
        }
        async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
            Ok(None)
        }
        fn backend_type(&self) -> &'static str {
            "read-only"
        }
    }

    #[tokio::test]
    async fn test_store_failure_aborts_run() {
        let store: Arc<dyn StateStore> = Arc::new(ReadOnlyStore);
        let ledger = Arc::new(StateLedger::open(store, "voting", "dev").await.unwrap());
        let provider = MemoryProvider::new();

        let graph = GraphBuilder::new()
            .build(&[deployment("db", &[]), deployment("worker", &["deployment/db"])])
            .unwrap();
        let plan = plan_for(&graph, &ledger).await;

        let err = PlanExecutor::new(Arc::new(provider.clone()), ledger, 4)
            .execute(plan)
            .await
            .unwrap_err();
        assert!(matches!(err, KeelError::State(_)));

        let creates: Vec<ResourceId> = provider.calls().await.into_iter().map(|c| c.id).collect();
        assert_eq!(creates, [id("db")]);
    }
}
