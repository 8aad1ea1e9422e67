// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::TaskLedger;
use crate::dagflow::EngineError;

/// SQLite-based ledger stored in `workflow_tasks`
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_tasks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                workflow_id TEXT NOT NULL,
                node_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_workflow_tasks_workflow ON workflow_tasks (workflow_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TaskLedger for SqliteLedger {
    async fn create_task(&self, workflow_id: &str, node_id: &str) -> Result<(), EngineError> {
        sqlx::query("INSERT INTO workflow_tasks (workflow_id, node_id) VALUES (?, ?)")
            .bind(workflow_id)
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_task(&self, workflow_id: &str, node_id: &str) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM workflow_tasks WHERE workflow_id = ? AND node_id = ?")
            .bind(workflow_id)
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_tasks(&self, workflow_id: &str) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM workflow_tasks WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn has_tasks(&self, workflow_id: &str) -> Result<bool, EngineError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM workflow_tasks WHERE workflow_id = ?")
                .bind(workflow_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn list_tasks(&self, workflow_id: &str) -> Result<Vec<String>, EngineError> {
        let nodes = sqlx::query_scalar(
            "SELECT node_id FROM workflow_tasks WHERE workflow_id = ? ORDER BY seq ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(nodes)
    }

    async fn list_workflows(&self) -> Result<Vec<String>, EngineError> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT workflow_id FROM workflow_tasks
            GROUP BY workflow_id
            ORDER BY MIN(seq) ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
