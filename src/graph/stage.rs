// SPDX-License-Identifier: MIT

//! Staged-template graph adapter
//!
//! Each template stage is a rule. Applying it appends the stage's steps to the
//! DAG as DEFINED nodes. The whole graph round-trips through JSON so the
//! orchestration engine can persist it as an opaque snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use super::backend::{ExecutionBackend, NodeTask};
use super::template::{self, ParameterDef, StageDef, WorkflowTemplate};
use super::{GraphEngine, GraphError, GraphState, NodeState, NodeView, RootContext};

/// A node in the live graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagNode {
    pub id: String,
    pub name: String,
    pub stage: String,
    pub command: Option<String>,
    #[serde(default)]
    pub upstream: Vec<String>,
    pub state: NodeState,
    pub submit_time: Option<DateTime<Utc>>,
    /// Backend handle, set once on submission
    pub task: Option<String>,
    pub work_dir: PathBuf,
}

/// Serializable graph state built from a `WorkflowTemplate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageGraph {
    name: String,
    context: RootContext,
    parameter_defs: Vec<ParameterDef>,
    #[serde(default)]
    parameters: Map<String, Value>,
    #[serde(default)]
    initialized: bool,
    stages: Vec<StageDef>,
    #[serde(default)]
    dag: Vec<DagNode>,
    /// Pending rule ids (stage names)
    #[serde(default)]
    rules: Vec<String>,
    #[serde(default)]
    applied: Vec<String>,
}

impl StageGraph {
    pub fn new(template: WorkflowTemplate, context: RootContext) -> Self {
        let rules = template.stages.iter().map(|s| s.name.clone()).collect();
        Self {
            name: template.name,
            context,
            parameter_defs: template.parameters,
            parameters: Map::new(),
            initialized: false,
            stages: template.stages,
            dag: Vec::new(),
            rules,
            applied: Vec::new(),
        }
    }

    fn find(&self, id: &str) -> Option<&DagNode> {
        self.dag.iter().find(|n| n.id == id)
    }

    fn stage(&self, name: &str) -> Option<&StageDef> {
        self.stages.iter().find(|s| s.name == name)
    }

    fn base_dir(&self) -> PathBuf {
        self.context.readwrite.first().cloned().unwrap_or_default()
    }

    /// Applied and every node it produced finished successfully
    fn stage_succeeded(&self, stage: &str) -> bool {
        self.applied.iter().any(|a| a == stage)
            && self
                .dag
                .iter()
                .filter(|n| n.stage == stage)
                .all(|n| n.state == NodeState::Success)
    }

    /// Refresh dispatched nodes from the backend
    fn observe(&mut self, backend: &dyn ExecutionBackend) {
        for node in self.dag.iter_mut().filter(|n| n.state.is_active()) {
            let Some(handle) = node.task.as_deref() else {
                continue;
            };
            match backend.status(handle) {
                Some(status) => {
                    let state = NodeState::from(status);
                    if state != node.state {
                        log::debug!("Node {} moved {:?} -> {:?}", node.id, node.state, state);
                        node.state = state;
                    }
                }
                None => log::debug!("Backend has no status for task {} ({})", handle, node.id),
            }
        }
    }
}

impl GraphState for StageGraph {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, params: &Map<String, Value>) -> Result<(), GraphError> {
        self.parameters = template::resolve_parameters(&self.parameter_defs, params)?;
        self.initialized = true;
        Ok(())
    }

    fn to_json(&self) -> Result<Value, GraphError> {
        Ok(serde_json::to_value(self)?)
    }

    fn nodes(&self) -> Vec<String> {
        self.dag.iter().map(|n| n.id.clone()).collect()
    }

    fn node(&self, id: &str) -> Option<NodeView> {
        self.find(id).map(|n| NodeView {
            id: n.id.clone(),
            name: n.name.clone(),
            state: n.state,
            submit_time: n.submit_time,
            upstream: n.upstream.clone(),
        })
    }

    fn rules(&self) -> Vec<String> {
        self.rules.clone()
    }

    fn applied_rules(&self) -> Vec<String> {
        self.applied.clone()
    }

    fn is_applicable(&self, rule_id: &str) -> bool {
        if !self.initialized || !self.rules.iter().any(|r| r == rule_id) {
            return false;
        }
        match self.stage(rule_id) {
            Some(stage) => stage
                .dependencies
                .iter()
                .all(|dep| self.stage_succeeded(dep)),
            None => false,
        }
    }

    fn apply_rule(&mut self, rule_id: &str) -> Result<(), GraphError> {
        let Some(position) = self.rules.iter().position(|r| r == rule_id) else {
            return Err(GraphError::UnknownRule(rule_id.to_string()));
        };
        if !self.is_applicable(rule_id) {
            return Err(GraphError::NotApplicable(rule_id.to_string()));
        }
        let stage = self
            .stage(rule_id)
            .cloned()
            .ok_or_else(|| GraphError::UnknownRule(rule_id.to_string()))?;

        let base = self.base_dir();
        for step in &stage.steps {
            let id = template::node_id(&stage.name, &step.name);
            let upstream = step
                .depends_on
                .to_vec()
                .iter()
                .map(|r| template::resolve_dependency(&stage.name, r))
                .collect();
            self.dag.push(DagNode {
                id,
                name: step.name.clone(),
                stage: stage.name.clone(),
                command: step
                    .command
                    .as_deref()
                    .map(|c| interpolate(c, &self.parameters)),
                upstream,
                state: NodeState::Defined,
                submit_time: None,
                task: None,
                work_dir: base.join(&stage.name).join(&step.name),
            });
        }

        self.rules.remove(position);
        self.applied.push(rule_id.to_string());
        Ok(())
    }

    fn upstream_ok(&self, node_id: &str) -> bool {
        match self.find(node_id) {
            Some(node) => node.upstream.iter().all(|up| {
                self.find(up)
                    .is_some_and(|n| n.state == NodeState::Success)
            }),
            None => false,
        }
    }

    fn submit_node(
        &mut self,
        node_id: &str,
        backend: &dyn ExecutionBackend,
    ) -> Result<(), GraphError> {
        let node = self
            .dag
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))?;
        if node.state != NodeState::Defined || node.submit_time.is_some() {
            return Err(GraphError::AlreadySubmitted(node_id.to_string()));
        }

        let handle = backend.submit(NodeTask {
            node_id: node.id.clone(),
            command: node.command.clone(),
            work_dir: node.work_dir.clone(),
        });
        node.task = Some(handle);
        node.submit_time = Some(Utc::now());
        node.state = NodeState::Submitted;
        Ok(())
    }
}

/// Replace `{name}` placeholders with resolved parameter values in one pass,
/// so substituted text is never expanded again.
/// Arrays are joined with spaces; unknown placeholders are kept as written.
pub fn interpolate(command: &str, params: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(command.len());
    let mut rest = command;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let value = tail
            .find('}')
            .and_then(|close| params.get(&tail[..close]).map(|value| (close, value)));
        match value {
            Some((close, value)) => {
                out.push_str(&render(value));
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

/// `GraphEngine` over staged templates
#[derive(Debug, Clone, Copy, Default)]
pub struct StageGraphEngine;

impl GraphEngine for StageGraphEngine {
    fn create(
        &self,
        template: &Value,
        context: RootContext,
    ) -> Result<Box<dyn GraphState>, GraphError> {
        let template = WorkflowTemplate::from_json(template)?;
        Ok(Box::new(StageGraph::new(template, context)))
    }

    fn load(
        &self,
        snapshot: &Value,
        backend: &dyn ExecutionBackend,
    ) -> Result<Box<dyn GraphState>, GraphError> {
        let mut graph: StageGraph = serde_json::from_value(snapshot.clone())?;
        graph.observe(backend);
        Ok(Box::new(graph))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TaskStatus;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Backend whose handles are node ids and whose statuses are set by hand
    #[derive(Default)]
    struct FakeBackend {
        submitted: Mutex<Vec<NodeTask>>,
        statuses: Mutex<HashMap<String, TaskStatus>>,
    }

    impl FakeBackend {
        fn set(&self, handle: &str, status: TaskStatus) {
            self.statuses
                .lock()
                .unwrap()
                .insert(handle.to_string(), status);
        }
    }

    impl ExecutionBackend for FakeBackend {
        fn submit(&self, task: NodeTask) -> String {
            let handle = task.node_id.clone();
            self.submitted.lock().unwrap().push(task);
            self.set(&handle, TaskStatus::Pending);
            handle
        }

        fn status(&self, handle: &str) -> Option<TaskStatus> {
            self.statuses.lock().unwrap().get(handle).copied()
        }
    }

    fn template() -> Value {
        json!({
            "name": "analysis",
            "parameters": [{"name": "nevents", "type": "int", "default": 100}],
            "stages": [
                {
                    "name": "prepare",
                    "steps": [
                        {"name": "fetch", "command": "fetch -n {nevents}"},
                        {"name": "unpack", "depends_on": "fetch"}
                    ]
                },
                {
                    "name": "analyze",
                    "dependencies": ["prepare"],
                    "steps": [{"name": "run", "depends_on": "prepare.unpack"}]
                }
            ]
        })
    }

    fn created() -> Box<dyn GraphState> {
        let mut graph = StageGraphEngine
            .create(&template(), RootContext::new("/tmp/wf"))
            .unwrap();
        graph.init(&Map::new()).unwrap();
        graph
    }

    #[test]
    fn test_create_lists_stages_as_rules() {
        let graph = created();
        assert_eq!(graph.name(), "analysis");
        assert_eq!(graph.rules(), vec!["prepare", "analyze"]);
        assert!(graph.applied_rules().is_empty());
        assert!(graph.nodes().is_empty());
        assert!(graph.is_applicable("prepare"));
        assert!(!graph.is_applicable("analyze"));
    }

    #[test]
    fn test_rules_not_applicable_before_init() {
        let graph = StageGraphEngine
            .create(&template(), RootContext::new("/tmp/wf"))
            .unwrap();
        assert!(!graph.is_applicable("prepare"));
    }

    #[test]
    fn test_apply_rule_adds_defined_nodes() {
        let mut graph = created();
        graph.apply_rule("prepare").unwrap();

        assert_eq!(graph.nodes(), vec!["prepare.fetch", "prepare.unpack"]);
        assert_eq!(graph.rules(), vec!["analyze"]);
        assert_eq!(graph.applied_rules(), vec!["prepare"]);

        let unpack = graph.node("prepare.unpack").unwrap();
        assert_eq!(unpack.state, NodeState::Defined);
        assert_eq!(unpack.upstream, vec!["prepare.fetch"]);
        assert!(graph.upstream_ok("prepare.fetch"));
        assert!(!graph.upstream_ok("prepare.unpack"));
    }

    #[test]
    fn test_apply_rule_errors() {
        let mut graph = created();
        assert!(matches!(
            graph.apply_rule("missing"),
            Err(GraphError::UnknownRule(_))
        ));
        assert!(matches!(
            graph.apply_rule("analyze"),
            Err(GraphError::NotApplicable(_))
        ));
        graph.apply_rule("prepare").unwrap();
        assert!(matches!(
            graph.apply_rule("prepare"),
            Err(GraphError::UnknownRule(_))
        ));
    }

    #[test]
    fn test_submit_and_observe_through_snapshot() {
        let backend = FakeBackend::default();
        let mut graph = created();
        graph.apply_rule("prepare").unwrap();
        graph.submit_node("prepare.fetch", &backend).unwrap();

        let fetch = graph.node("prepare.fetch").unwrap();
        assert_eq!(fetch.state, NodeState::Submitted);
        assert!(fetch.submit_time.is_some());
        assert!(matches!(
            graph.submit_node("prepare.fetch", &backend),
            Err(GraphError::AlreadySubmitted(_))
        ));

        {
            let submitted = backend.submitted.lock().unwrap();
            assert_eq!(submitted.len(), 1);
            assert_eq!(submitted[0].command.as_deref(), Some("fetch -n 100"));
            assert_eq!(submitted[0].work_dir, PathBuf::from("/tmp/wf/prepare/fetch"));
        }

        backend.set("prepare.fetch", TaskStatus::Succeeded);
        let snapshot = graph.to_json().unwrap();
        let reloaded = StageGraphEngine.load(&snapshot, &backend).unwrap();
        assert_eq!(
            reloaded.node("prepare.fetch").unwrap().state,
            NodeState::Success
        );
        assert!(reloaded.upstream_ok("prepare.unpack"));
    }

    #[test]
    fn test_unknown_handle_keeps_persisted_state() {
        let backend = FakeBackend::default();
        let mut graph = created();
        graph.apply_rule("prepare").unwrap();
        graph.submit_node("prepare.fetch", &backend).unwrap();
        let snapshot = graph.to_json().unwrap();

        let restarted = FakeBackend::default();
        let reloaded = StageGraphEngine.load(&snapshot, &restarted).unwrap();
        assert_eq!(
            reloaded.node("prepare.fetch").unwrap().state,
            NodeState::Submitted
        );
    }

    #[test]
    fn test_dependent_stage_needs_all_nodes_successful() {
        let backend = FakeBackend::default();
        let mut graph = created();
        graph.apply_rule("prepare").unwrap();
        graph.submit_node("prepare.fetch", &backend).unwrap();
        graph.submit_node("prepare.unpack", &backend).unwrap();

        let snapshot = graph.to_json().unwrap();

        backend.set("prepare.fetch", TaskStatus::Succeeded);
        let partial = StageGraphEngine.load(&snapshot, &backend).unwrap();
        assert!(!partial.is_applicable("analyze"));

        backend.set("prepare.unpack", TaskStatus::Failed);
        let failed = StageGraphEngine.load(&snapshot, &backend).unwrap();
        assert!(!failed.is_applicable("analyze"));

        backend.set("prepare.unpack", TaskStatus::Succeeded);
        let done = StageGraphEngine.load(&snapshot, &backend).unwrap();
        assert!(done.is_applicable("analyze"));
    }

    #[test]
    fn test_interpolate() {
        let params = json!({"n": 5, "files": ["a", "b"], "tag": "x"})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(
            interpolate("run -n {n} {files} --tag={tag} {other}", &params),
            "run -n 5 a b --tag=x {other}"
        );
    }

    #[test]
    fn test_interpolated_values_are_not_expanded_again() {
        let params = json!({"label": "{path}", "path": "/data", "pattern": ["{label}", "x"]})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(
            interpolate("tag {label} at {path} grep {pattern}", &params),
            "tag {path} at /data grep {label} x"
        );
        assert_eq!(interpolate("{{path}} {", &params), "{/data} {");
    }
}
