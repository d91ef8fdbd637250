// SQLite TaskRepository Implementation
// Durable mirror of non-terminal tasks: upserted on every update, deleted
// at the terminal transition, read back in full at startup.

use crate::cluster_repository::map_sqlx_error;
use async_trait::async_trait;
use corral_core::domain::{Task, TaskId, TaskState};
use corral_core::error::Result;
use corral_core::port::TaskRepository;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use tracing::warn;

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn upsert(&self, task: &Task) -> Result<()> {
        let logs: Vec<&String> = task.logs.iter().collect();
        let logs_json = serde_json::to_string(&logs)?;

        sqlx::query(
            r#"
            INSERT INTO tasks (id, status, progress, message, logs, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                progress = excluded.progress,
                message = excluded.message,
                logs = excluded.logs,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&task.id)
        .bind(task.status.to_string())
        .bind(task.progress as i64)
        .bind(&task.message)
        .bind(logs_json)
        .bind(&task.error)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM tasks ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(|r| r.into_task()).collect())
    }
}

/// SQLite row representation of a mirrored task
#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: String,
    status: String,
    progress: i64,
    message: String,
    logs: String,
    error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TaskRow {
    fn into_task(self) -> Task {
        let logs: VecDeque<String> = match serde_json::from_str::<Vec<String>>(&self.logs) {
            Ok(lines) => lines.into(),
            Err(e) => {
                warn!(task_id = %self.id, error = %e, "Discarding undecodable task log column");
                VecDeque::new()
            }
        };

        Task {
            id: self.id,
            // Only non-terminal tasks are mirrored; an unreadable status
            // falls back to pending rather than inventing a terminal state
            status: TaskState::parse(&self.status).unwrap_or(TaskState::Pending),
            progress: self.progress.clamp(0, 100) as u8,
            message: self.message,
            logs,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: None,
        }
    }
}
