// SPDX-License-Identifier: MIT

//! Execution backend seam
//!
//! Backends dispatch one node's work at a time and never call back. The graph
//! adapter keeps the returned handle on the node and asks for its status when
//! a snapshot is loaded again.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Work description handed to a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTask {
    pub node_id: String,
    pub command: Option<String>,
    pub work_dir: PathBuf,
}

/// Status of a dispatched task as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Asynchronous, fire-and-forget node execution.
///
/// Both methods must return without waiting on the task itself.
pub trait ExecutionBackend: Send + Sync {
    /// Dispatch a task and return an opaque handle for later status lookups
    fn submit(&self, task: NodeTask) -> String;

    /// Current status for a handle, `None` if the backend does not know it
    fn status(&self, handle: &str) -> Option<TaskStatus>;
}
