// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::TaskLedger;
use crate::dagflow::EngineError;

/// In-process ledger. Entries are kept as an ordered multiset.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    entries: Arc<RwLock<Vec<(String, String)>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskLedger for MemoryLedger {
    async fn create_task(&self, workflow_id: &str, node_id: &str) -> Result<(), EngineError> {
        let mut entries = self.entries.write().await;
        entries.push((workflow_id.to_string(), node_id.to_string()));
        Ok(())
    }

    async fn delete_task(&self, workflow_id: &str, node_id: &str) -> Result<(), EngineError> {
        let mut entries = self.entries.write().await;
        entries.retain(|(w, n)| !(w == workflow_id && n == node_id));
        Ok(())
    }

    async fn delete_tasks(&self, workflow_id: &str) -> Result<(), EngineError> {
        let mut entries = self.entries.write().await;
        entries.retain(|(w, _)| w != workflow_id);
        Ok(())
    }

    async fn has_tasks(&self, workflow_id: &str) -> Result<bool, EngineError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().any(|(w, _)| w == workflow_id))
    }

    async fn list_tasks(&self, workflow_id: &str) -> Result<Vec<String>, EngineError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(w, _)| w == workflow_id)
            .map(|(_, n)| n.clone())
            .collect())
    }

    async fn list_workflows(&self) -> Result<Vec<String>, EngineError> {
        let entries = self.entries.read().await;
        let mut ids: Vec<String> = Vec::new();
        for (w, _) in entries.iter() {
            if !ids.contains(w) {
                ids.push(w.clone());
            }
        }
        Ok(ids)
    }
}
