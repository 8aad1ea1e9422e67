// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::{WorkflowRecord, WorkflowRepository, WorkflowStatus};
use crate::dagflow::EngineError;

/// Open a pool for `url`, creating the database file if needed.
///
/// In-memory databases are per connection, so they get a single long-lived one.
pub async fn open_pool(url: &str) -> Result<SqlitePool, EngineError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = if url.contains(":memory:") || url.contains("mode=memory") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new().connect_with(options).await?
    };
    Ok(pool)
}

/// SQLite-based repository implementation
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `workflows` table if it does not exist
    pub async fn migrate(&self) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                graph TEXT NOT NULL,
                work_dir TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_status ON workflows (status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn from_row(row: &SqliteRow) -> Result<WorkflowRecord, EngineError> {
    let status: String = row.try_get("status")?;
    let graph: String = row.try_get("graph")?;
    let work_dir: String = row.try_get("work_dir")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(WorkflowRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: status.parse()?,
        graph: serde_json::from_str(&graph)?,
        work_dir: PathBuf::from(work_dir),
        created_at,
        updated_at,
    })
}

#[async_trait]
impl WorkflowRepository for SqliteRepository {
    async fn create(&self, record: &WorkflowRecord) -> Result<(), EngineError> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflows (id, name, status, graph, work_dir, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.graph)?)
        .bind(record.work_dir.to_string_lossy().into_owned())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(EngineError::DuplicateKey(record.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<WorkflowRecord>, EngineError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, status, graph, work_dir, created_at, updated_at
            FROM workflows
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(from_row).transpose()
    }

    async fn update(&self, record: &WorkflowRecord) -> Result<Option<WorkflowRecord>, EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET name = ?, status = ?, graph = ?, work_dir = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.name)
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.graph)?)
        .bind(record.work_dir.to_string_lossy().into_owned())
        .bind(record.updated_at)
        .bind(&record.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(None)
        } else {
            Ok(Some(record.clone()))
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, EngineError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowRecord>, EngineError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    r#"
                    SELECT id, name, status, graph, work_dir, created_at, updated_at
                    FROM workflows
                    WHERE status = ?
                    ORDER BY created_at ASC, id ASC
                    "#,
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, name, status, graph, work_dir, created_at, updated_at
                    FROM workflows
                    ORDER BY created_at ASC, id ASC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn repository() -> SqliteRepository {
        let pool = open_pool("sqlite::memory:").await.unwrap();
        let repo = SqliteRepository::new(pool);
        repo.migrate().await.unwrap();
        repo
    }

    fn record(id: &str) -> WorkflowRecord {
        let now = Utc::now();
        WorkflowRecord {
            id: id.to_string(),
            name: "analysis".to_string(),
            status: WorkflowStatus::Waiting,
            graph: json!({"dag": [], "rules": ["prepare"]}),
            work_dir: PathBuf::from("/tmp").join(id),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = repository().await;
        let wf = record("a");
        repo.create(&wf).await.unwrap();

        let stored = repo.get("a").await.unwrap().unwrap();
        assert_eq!(stored.name, "analysis");
        assert_eq!(stored.status, WorkflowStatus::Waiting);
        assert_eq!(stored.graph, wf.graph);
        assert_eq!(stored.work_dir, wf.work_dir);
        assert!(repo.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let repo = repository().await;
        repo.create(&record("a")).await.unwrap();
        assert!(matches!(
            repo.create(&record("a")).await,
            Err(EngineError::DuplicateKey(_))
        ));
    }

    #[tokio::test]
    async fn test_update_delete_and_list() {
        let repo = repository().await;
        assert!(repo.update(&record("ghost")).await.unwrap().is_none());

        let mut wf = record("a");
        repo.create(&wf).await.unwrap();
        repo.create(&record("b")).await.unwrap();

        wf.status = WorkflowStatus::Failed;
        wf.graph = json!({"dag": [{"id": "x"}]});
        assert!(repo.update(&wf).await.unwrap().is_some());

        let failed = repo.list(Some(WorkflowStatus::Failed)).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].graph, wf.graph);
        assert_eq!(repo.list(None).await.unwrap().len(), 2);

        assert!(repo.delete("a").await.unwrap());
        assert!(!repo.delete("a").await.unwrap());
        assert_eq!(repo.list(None).await.unwrap().len(), 1);
    }
}
