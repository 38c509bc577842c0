use crate::adapters::Database;
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite};

const TASK_COLUMNS: &str = "id, queue, task, status, attempts, max_retries, eta_ms, enqueued_at, \
     started_at, finished_at, result, error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// task_queue 表中的一筆工作
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct QueuedTask {
    pub id: i64,
    pub queue: String,
    pub task: String,
    pub status: TaskStatus,
    pub attempts: i64,
    pub max_retries: i64,
    pub eta_ms: i64,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl QueuedTask {
    pub fn can_retry(&self) -> bool {
        self.attempts <= self.max_retries
    }

    pub fn result_json(&self) -> Option<Value> {
        self.result
            .as_deref()
            .and_then(|r| serde_json::from_str(r).ok())
    }
}

/// 以 SQLite 為 broker 的工作佇列，beat 與 worker 跨行程共用
#[derive(Debug, Clone)]
pub struct TaskBroker {
    db: Database,
}

impl TaskBroker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn enqueue(
        &self,
        task: &str,
        queue: &str,
        max_retries: i64,
        eta: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO task_queue (queue, task, status, attempts, max_retries, eta_ms, enqueued_at) \
             VALUES (?, ?, 'pending', 0, ?, ?, ?) RETURNING id",
        )
        .bind(queue)
        .bind(task)
        .bind(max_retries)
        .bind(eta.timestamp_millis())
        .bind(now)
        .fetch_one(self.db.pool())
        .await?;

        tracing::debug!("Enqueued {} on {} (id {})", task, queue, id);
        Ok(id)
    }

    /// 原子地取出指定佇列中最早到期的工作，並標記為 running
    pub async fn claim(&self, queues: &[String], now: DateTime<Utc>) -> Result<Option<QueuedTask>> {
        if queues.is_empty() {
            return Ok(None);
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "UPDATE task_queue SET status = 'running', attempts = attempts + 1, started_at = ",
        );
        query
            .push_bind(now)
            .push(" WHERE id = (SELECT id FROM task_queue WHERE status = 'pending' AND eta_ms <= ")
            .push_bind(now.timestamp_millis())
            .push(" AND queue IN (");
        let mut separated = query.separated(", ");
        for queue in queues {
            separated.push_bind(queue.clone());
        }
        separated.push_unseparated(") ORDER BY eta_ms, id LIMIT 1) RETURNING ");
        query.push(TASK_COLUMNS);

        let task = query
            .build_query_as::<QueuedTask>()
            .fetch_optional(self.db.pool())
            .await?;
        Ok(task)
    }

    pub async fn complete(&self, id: i64, result: &Value, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE task_queue SET status = 'done', finished_at = ?, result = ?, error = NULL \
             WHERE id = ?",
        )
        .bind(now)
        .bind(result.to_string())
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// 重新排入佇列，eta 之後才會被取出
    pub async fn retry(&self, id: i64, error: &str, eta: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE task_queue SET status = 'pending', eta_ms = ?, error = ?, started_at = NULL \
             WHERE id = ?",
        )
        .bind(eta.timestamp_millis())
        .bind(error)
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn fail(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE task_queue SET status = 'failed', finished_at = ?, error = ? WHERE id = ?",
        )
        .bind(now)
        .bind(error)
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<QueuedTask>> {
        let query = format!("SELECT {} FROM task_queue WHERE id = ?", TASK_COLUMNS);
        let task = sqlx::query_as::<_, QueuedTask>(&query)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(task)
    }

    pub async fn count_with_status(&self, status: TaskStatus) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM task_queue WHERE status = ?")
            .bind(status)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    /// worker 中斷後遺留的 running 工作重新排回佇列
    pub async fn requeue_stale(&self, started_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE task_queue SET status = 'pending', started_at = NULL \
             WHERE status = 'running' AND started_at < ?",
        )
        .bind(started_before)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() > 0 {
            tracing::warn!("♻️ Requeued {} stale running tasks", result.rows_affected());
        }
        Ok(result.rows_affected())
    }

    /// 刪除早於 before 已完成或失敗的紀錄
    pub async fn prune_finished(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM task_queue WHERE status IN ('done', 'failed') AND finished_at < ?",
        )
        .bind(before)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }
}
