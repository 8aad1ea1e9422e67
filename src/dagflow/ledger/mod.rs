// SPDX-License-Identifier: MIT

//! Task ledger
//!
//! Durable set of `(workflow_id, node_id)` pairs for nodes that were dispatched
//! but not yet observed in a terminal state. An entry blocks re-submission of
//! its node; a missing entry says nothing about the node having finished.

mod memory;
mod sqlite;

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

use async_trait::async_trait;

use crate::dagflow::EngineError;

#[async_trait]
pub trait TaskLedger: Send + Sync {
    /// Record a submission. Duplicate pairs are tolerated.
    async fn create_task(&self, workflow_id: &str, node_id: &str) -> Result<(), EngineError>;

    /// Remove every entry matching the pair
    async fn delete_task(&self, workflow_id: &str, node_id: &str) -> Result<(), EngineError>;

    /// Remove all entries of a workflow
    async fn delete_tasks(&self, workflow_id: &str) -> Result<(), EngineError>;

    async fn has_tasks(&self, workflow_id: &str) -> Result<bool, EngineError>;

    /// Node ids with outstanding entries, in insertion order. May repeat.
    async fn list_tasks(&self, workflow_id: &str) -> Result<Vec<String>, EngineError>;

    /// Distinct workflow ids that have at least one entry
    async fn list_workflows(&self) -> Result<Vec<String>, EngineError>;
}
