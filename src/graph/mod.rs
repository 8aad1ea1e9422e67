// SPDX-License-Identifier: MIT

//! Graph engine seam
//!
//! This module provides:
//! - `GraphEngine` / `GraphState` - the narrow interface the orchestration engine uses
//! - `ExecutionBackend` - asynchronous node dispatch
//! - `StageGraphEngine` - a staged-template implementation of the interface

pub mod backend;
mod error;
pub mod stage;
pub mod template;

pub use backend::{ExecutionBackend, NodeTask, TaskStatus};
pub use error::GraphError;
pub use stage::{StageGraph, StageGraphEngine};
pub use template::{DependsOn, ParameterDef, ParameterType, StageDef, StepDef, WorkflowTemplate};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Execution state of a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Defined,
    Submitted,
    Running,
    Success,
    Failed,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Success | NodeState::Failed)
    }

    /// Dispatched but not yet finished
    pub fn is_active(self) -> bool {
        matches!(self, NodeState::Submitted | NodeState::Running)
    }
}

impl From<TaskStatus> for NodeState {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Pending => NodeState::Submitted,
            TaskStatus::Running => NodeState::Running,
            TaskStatus::Succeeded => NodeState::Success,
            TaskStatus::Failed => NodeState::Failed,
        }
    }
}

/// Read-only view of a node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    pub id: String,
    pub name: String,
    pub state: NodeState,
    pub submit_time: Option<DateTime<Utc>>,
    pub upstream: Vec<String>,
}

/// Filesystem scope handed to a graph when it is created
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RootContext {
    pub readwrite: Vec<PathBuf>,
    #[serde(default)]
    pub readonly: Vec<PathBuf>,
}

impl RootContext {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            readwrite: vec![work_dir.into()],
            readonly: vec![],
        }
    }
}

/// Builds graph states from templates and serialized snapshots
pub trait GraphEngine: Send + Sync {
    /// Instantiate an uninitialized graph from a template document
    fn create(
        &self,
        template: &Value,
        context: RootContext,
    ) -> Result<Box<dyn GraphState>, GraphError>;

    /// Restore a graph from its snapshot, refreshing dispatched nodes from the backend
    fn load(
        &self,
        snapshot: &Value,
        backend: &dyn ExecutionBackend,
    ) -> Result<Box<dyn GraphState>, GraphError>;
}

/// Live graph of nodes plus its pending and applied rules
pub trait GraphState: Send + Sync {
    /// Template name the graph was created from
    fn name(&self) -> &str;

    /// Bind initialization parameters
    fn init(&mut self, params: &Map<String, Value>) -> Result<(), GraphError>;

    fn to_json(&self) -> Result<Value, GraphError>;

    /// Node ids in creation order
    fn nodes(&self) -> Vec<String>;

    fn node(&self, id: &str) -> Option<NodeView>;

    /// Pending rule ids in declaration order
    fn rules(&self) -> Vec<String>;

    /// Applied rule ids in application order
    fn applied_rules(&self) -> Vec<String>;

    fn is_applicable(&self, rule_id: &str) -> bool;

    /// Apply a pending rule and move it to the applied log
    fn apply_rule(&mut self, rule_id: &str) -> Result<(), GraphError>;

    /// True if every upstream dependency of the node finished successfully
    fn upstream_ok(&self, node_id: &str) -> bool;

    /// Dispatch a DEFINED node through the backend
    fn submit_node(
        &mut self,
        node_id: &str,
        backend: &dyn ExecutionBackend,
    ) -> Result<(), GraphError>;
}
