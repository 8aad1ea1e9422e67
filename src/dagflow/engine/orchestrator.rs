// SPDX-License-Identifier: MIT

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::status::status_of;
use crate::dagflow::config::EngineConfig;
use crate::dagflow::executor::LocalBackend;
use crate::dagflow::ledger::{MemoryLedger, SqliteLedger, TaskLedger};
use crate::dagflow::repository::{
    open_pool, MemoryRepository, SqliteRepository, WorkflowRecord, WorkflowRepository,
    WorkflowStatus,
};
use crate::dagflow::workdir::{self, FileEntry};
use crate::dagflow::EngineError;
use crate::graph::{
    ExecutionBackend, GraphEngine, GraphState, NodeState, NodeView, RootContext, StageGraphEngine,
};

/// Workflow as returned to callers: the record plus freshly derived rule and
/// node sets
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSnapshot {
    pub id: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub work_dir: PathBuf,
    pub applicable_rules: Vec<String>,
    pub submittable_nodes: Vec<String>,
    pub applied_rules: Vec<String>,
    pub nodes: Vec<NodeView>,
    pub graph: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct OrchestrationEngine {
    repository: Arc<dyn WorkflowRepository>,
    ledger: Arc<dyn TaskLedger>,
    graphs: Arc<dyn GraphEngine>,
    backend: Arc<dyn ExecutionBackend>,
    work_dir: PathBuf,
    lock: Mutex<()>,
}

impl OrchestrationEngine {
    pub fn new(
        repository: Arc<dyn WorkflowRepository>,
        ledger: Arc<dyn TaskLedger>,
        backend: Arc<dyn ExecutionBackend>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repository,
            ledger,
            graphs: Arc::new(StageGraphEngine),
            backend,
            work_dir: work_dir.into(),
            lock: Mutex::new(()),
        }
    }

    /// Replace the built-in staged-template graph engine
    pub fn with_graph_engine(mut self, graphs: Arc<dyn GraphEngine>) -> Self {
        self.graphs = graphs;
        self
    }

    /// Build an engine with SQLite or in-memory stores and the local backend
    pub async fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        workdir::create(&config.work_dir).await?;

        let (repository, ledger): (Arc<dyn WorkflowRepository>, Arc<dyn TaskLedger>) =
            match &config.database_url {
                Some(url) => {
                    log::info!("Using SQLite storage at {}", url);
                    let pool = open_pool(url).await?;
                    let repository = SqliteRepository::new(pool.clone());
                    repository.migrate().await?;
                    let ledger = SqliteLedger::new(pool);
                    ledger.migrate().await?;
                    (Arc::new(repository), Arc::new(ledger))
                }
                None => {
                    log::info!("Using in-memory storage");
                    (
                        Arc::new(MemoryRepository::new()),
                        Arc::new(MemoryLedger::new()),
                    )
                }
            };

        Ok(Self::new(
            repository,
            ledger,
            Arc::new(LocalBackend::new()),
            config.work_dir.clone(),
        ))
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Instantiate a workflow from a template document.
    ///
    /// Runs without the engine lock: the insert touches no existing record.
    pub async fn create_workflow(
        &self,
        template: &Value,
        name: &str,
        params: &Map<String, Value>,
    ) -> Result<WorkflowSnapshot, EngineError> {
        let id = Uuid::new_v4().to_string();
        let dir = workdir::workflow_dir(&self.work_dir, &id);

        let mut graph = self.graphs.create(template, RootContext::new(&dir))?;
        graph.init(params)?;

        let name = match name.trim() {
            "" => graph.name().to_string(),
            given => given.to_string(),
        };

        workdir::create(&dir).await?;
        let now = Utc::now();
        let record = WorkflowRecord {
            id: id.clone(),
            name,
            status: status_of(graph.as_ref()),
            graph: graph.to_json()?,
            work_dir: dir.clone(),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.repository.create(&record).await {
            if let Err(cleanup) = workdir::remove(&dir).await {
                log::warn!("Failed to remove {}: {}", dir.display(), cleanup);
            }
            return Err(e);
        }

        log::info!("Created workflow {} ({})", record.id, record.name);
        Ok(self.snapshot(record, graph.as_ref(), &HashSet::new()))
    }

    /// Fetch a workflow, reconciling it first if it has outstanding tasks
    pub async fn get_workflow(&self, id: &str) -> Result<WorkflowSnapshot, EngineError> {
        let (record, graph, outstanding) = {
            let _guard = self.lock.lock().await;
            let record = self.fetch(id).await?;
            let graph = self.graphs.load(&record.graph, self.backend.as_ref())?;
            let record = if self.ledger.has_tasks(id).await? {
                self.reconcile(record, graph.as_ref()).await?
            } else {
                record
            };
            let outstanding = self.outstanding(id).await?;
            (record, graph, outstanding)
        };

        Ok(self.snapshot(record, graph.as_ref(), &outstanding))
    }

    /// Apply a batch of rules. The whole batch is checked against the
    /// currently applicable set before any rule is applied.
    pub async fn apply_rules(
        &self,
        id: &str,
        rule_ids: &[String],
    ) -> Result<WorkflowSnapshot, EngineError> {
        let _guard = self.lock.lock().await;
        let (record, mut graph) = self.load_reconciled(id).await?;

        let applicable: HashSet<String> = applicable_rules(graph.as_ref()).into_iter().collect();
        let mut seen = HashSet::new();
        for rule in rule_ids {
            if !seen.insert(rule.as_str()) {
                return Err(EngineError::invalid_rule(rule, "listed more than once"));
            }
            if !applicable.contains(rule) {
                return Err(EngineError::invalid_rule(rule, "not currently applicable"));
            }
        }

        for rule in rule_ids {
            graph.apply_rule(rule)?;
            log::info!("Applied rule {} to workflow {}", rule, id);
        }

        let record = self.persist(record, graph.as_ref()).await?;
        let outstanding = self.outstanding(id).await?;
        Ok(self.snapshot(record, graph.as_ref(), &outstanding))
    }

    /// Dispatch a batch of nodes. Every node must be submittable and listed
    /// once, otherwise nothing is dispatched.
    pub async fn submit_nodes(
        &self,
        id: &str,
        node_ids: &[String],
    ) -> Result<WorkflowSnapshot, EngineError> {
        let _guard = self.lock.lock().await;
        let (record, mut graph) = self.load_reconciled(id).await?;

        let outstanding = self.outstanding(id).await?;
        let submittable: HashSet<String> = submittable_nodes(graph.as_ref(), &outstanding)
            .into_iter()
            .collect();
        let mut seen = HashSet::new();
        for node in node_ids {
            if !seen.insert(node.as_str()) {
                return Err(EngineError::invalid_node(node, "listed more than once"));
            }
            if !submittable.contains(node) {
                return Err(EngineError::invalid_node(node, "not submittable"));
            }
        }

        for node in node_ids {
            graph.submit_node(node, self.backend.as_ref())?;
            log::info!("Submitted node {} of workflow {}", node, id);
        }

        // Ledger entries only for a stored submission; a failed write leaves
        // the nodes DEFINED and submittable again.
        let record = self.persist(record, graph.as_ref()).await?;
        for node in node_ids {
            self.ledger.create_task(id, node).await?;
        }
        let outstanding = self.outstanding(id).await?;
        Ok(self.snapshot(record, graph.as_ref(), &outstanding))
    }

    /// Remove a workflow, its ledger entries and its work directory.
    /// Returns `false` for an unknown id.
    pub async fn delete_workflow(&self, id: &str) -> Result<bool, EngineError> {
        let _guard = self.lock.lock().await;
        let record = self.repository.get(id).await?;
        let removed = self.repository.delete(id).await?;
        self.ledger.delete_tasks(id).await?;

        if let Some(record) = record.filter(|_| removed) {
            workdir::remove(&record.work_dir).await?;
            log::info!("Deleted workflow {}", id);
        }
        Ok(removed)
    }

    /// Reconcile ledger-tracked workflows, then list records
    pub async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowRecord>, EngineError> {
        {
            let _guard = self.lock.lock().await;
            self.reconcile_tracked().await?;
        }
        self.repository.list(status).await
    }

    /// Reconcile every workflow with outstanding ledger entries.
    /// Returns how many were reconciled successfully.
    pub async fn reconcile_all(&self) -> Result<usize, EngineError> {
        let _guard = self.lock.lock().await;
        self.reconcile_tracked().await
    }

    /// Recursive listing of a workflow's work directory
    pub async fn list_files(&self, id: &str) -> Result<Vec<FileEntry>, EngineError> {
        let record = self.fetch(id).await?;
        workdir::list_files(&record.work_dir).await
    }

    /// Work directory of an existing workflow
    pub async fn workflow_dir(&self, id: &str) -> Result<PathBuf, EngineError> {
        Ok(self.fetch(id).await?.work_dir)
    }

    async fn fetch(&self, id: &str) -> Result<WorkflowRecord, EngineError> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found(id))
    }

    async fn load_reconciled(
        &self,
        id: &str,
    ) -> Result<(WorkflowRecord, Box<dyn GraphState>), EngineError> {
        let record = self.fetch(id).await?;
        let graph = self.graphs.load(&record.graph, self.backend.as_ref())?;
        let record = self.reconcile(record, graph.as_ref()).await?;
        Ok((record, graph))
    }

    async fn outstanding(&self, id: &str) -> Result<HashSet<String>, EngineError> {
        Ok(self.ledger.list_tasks(id).await?.into_iter().collect())
    }

    /// Drop ledger entries whose node is terminal or gone. Terminal entries
    /// are cleared only after the observed graph has been persisted.
    async fn reconcile(
        &self,
        record: WorkflowRecord,
        graph: &dyn GraphState,
    ) -> Result<WorkflowRecord, EngineError> {
        let mut seen = HashSet::new();
        let mut finished = Vec::new();

        for node_id in self.ledger.list_tasks(&record.id).await? {
            if !seen.insert(node_id.clone()) {
                continue;
            }
            match graph.node(&node_id) {
                Some(node) if node.state.is_terminal() => {
                    log::debug!(
                        "Node {} of workflow {} finished as {:?}",
                        node_id,
                        record.id,
                        node.state
                    );
                    finished.push(node_id);
                }
                Some(_) => {}
                None => {
                    log::warn!(
                        "Purging orphan ledger entry {} of workflow {}",
                        node_id,
                        record.id
                    );
                    self.ledger.delete_task(&record.id, &node_id).await?;
                }
            }
        }

        if finished.is_empty() {
            return Ok(record);
        }

        let record = self.persist(record, graph).await?;
        for node_id in &finished {
            self.ledger.delete_task(&record.id, node_id).await?;
        }
        Ok(record)
    }

    async fn persist(
        &self,
        mut record: WorkflowRecord,
        graph: &dyn GraphState,
    ) -> Result<WorkflowRecord, EngineError> {
        record.graph = graph.to_json()?;
        record.status = status_of(graph);
        record.updated_at = Utc::now();
        let id = record.id.clone();
        self.repository
            .update(&record)
            .await?
            .ok_or_else(|| EngineError::not_found(id))
    }

    /// Bulk reconciliation; caller holds the lock. A workflow whose record or
    /// graph cannot be loaded has its ledger entries purged. Other failures
    /// keep the entries for the next pass.
    async fn reconcile_tracked(&self) -> Result<usize, EngineError> {
        let mut reconciled = 0;
        for id in self.ledger.list_workflows().await? {
            let loaded = match self.repository.get(&id).await? {
                Some(record) => self
                    .graphs
                    .load(&record.graph, self.backend.as_ref())
                    .map(|graph| (record, graph))
                    .map_err(EngineError::from),
                None => Err(EngineError::not_found(id.as_str())),
            };

            match loaded {
                Ok((record, graph)) => match self.reconcile(record, graph.as_ref()).await {
                    Ok(_) => reconciled += 1,
                    Err(e) => log::warn!("Failed to reconcile workflow {}: {}", id, e),
                },
                Err(e) => {
                    log::warn!("Cannot load workflow {}, purging its tasks: {}", id, e);
                    self.ledger.delete_tasks(&id).await?;
                }
            }
        }
        Ok(reconciled)
    }

    fn snapshot(
        &self,
        record: WorkflowRecord,
        graph: &dyn GraphState,
        outstanding: &HashSet<String>,
    ) -> WorkflowSnapshot {
        WorkflowSnapshot {
            applicable_rules: applicable_rules(graph),
            submittable_nodes: submittable_nodes(graph, outstanding),
            applied_rules: graph.applied_rules(),
            nodes: graph
                .nodes()
                .into_iter()
                .filter_map(|n| graph.node(&n))
                .collect(),
            id: record.id,
            name: record.name,
            status: record.status,
            work_dir: record.work_dir,
            graph: record.graph,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

fn applicable_rules(graph: &dyn GraphState) -> Vec<String> {
    graph
        .rules()
        .into_iter()
        .filter(|r| graph.is_applicable(r))
        .collect()
}

/// Nodes that are not tracked in the ledger, were never submitted and have
/// all upstream dependencies satisfied
fn submittable_nodes(graph: &dyn GraphState, outstanding: &HashSet<String>) -> Vec<String> {
    graph
        .nodes()
        .into_iter()
        .filter(|id| !outstanding.contains(id))
        .filter(|id| {
            graph.node(id).is_some_and(|n| {
                n.state == NodeState::Defined && n.submit_time.is_none()
            })
        })
        .filter(|id| graph.upstream_ok(id))
        .collect()
}
