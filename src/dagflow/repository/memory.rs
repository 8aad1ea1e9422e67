// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{WorkflowRecord, WorkflowRepository, WorkflowStatus};
use crate::dagflow::EngineError;

/// In-process repository, lost on restart
#[derive(Clone, Default)]
pub struct MemoryRepository {
    records: Arc<RwLock<HashMap<String, WorkflowRecord>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for MemoryRepository {
    async fn create(&self, record: &WorkflowRecord) -> Result<(), EngineError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(EngineError::DuplicateKey(record.id.clone()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<WorkflowRecord>, EngineError> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn update(&self, record: &WorkflowRecord) -> Result<Option<WorkflowRecord>, EngineError> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, EngineError> {
        let mut records = self.records.write().await;
        Ok(records.remove(id).is_some())
    }

    async fn list(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowRecord>, EngineError> {
        let records = self.records.read().await;
        let mut listed: Vec<WorkflowRecord> = records
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(listed)
    }
}
