// SPDX-License-Identifier: MIT

//! Workflow repository
//!
//! Durable CRUD for workflow records keyed by id. Each call is atomic on its
//! own; keeping records consistent with the task ledger is the engine's job.

mod memory;
mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::{open_pool, SqliteRepository};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::dagflow::EngineError;

/// Derived workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Waiting,
    Running,
    Success,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Waiting => "WAITING",
            WorkflowStatus::Running => "RUNNING",
            WorkflowStatus::Success => "SUCCESS",
            WorkflowStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WAITING" => Ok(WorkflowStatus::Waiting),
            "RUNNING" => Ok(WorkflowStatus::Running),
            "SUCCESS" => Ok(WorkflowStatus::Success),
            "FAILED" => Ok(WorkflowStatus::Failed),
            _ => Err(EngineError::other(format!("unknown workflow status '{}'", s))),
        }
    }
}

/// Persisted workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: String,
    pub name: String,
    pub status: WorkflowStatus,
    /// Serialized graph snapshot
    pub graph: Value,
    pub work_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage trait for workflow records
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Insert a new record, failing with `DuplicateKey` if the id exists
    async fn create(&self, record: &WorkflowRecord) -> Result<(), EngineError>;

    async fn get(&self, id: &str) -> Result<Option<WorkflowRecord>, EngineError>;

    /// Replace the stored record. `None` means no record matched the id.
    async fn update(&self, record: &WorkflowRecord) -> Result<Option<WorkflowRecord>, EngineError>;

    /// Returns whether a record was removed
    async fn delete(&self, id: &str) -> Result<bool, EngineError>;

    /// All records ordered by creation time, optionally filtered by status
    async fn list(&self, status: Option<WorkflowStatus>)
        -> Result<Vec<WorkflowRecord>, EngineError>;
}
