use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::tasks::repo_types::{Priority, Status, Task};

const TASK_COLUMNS: &str = "id, title, description, status, priority, created_by, assigned_to, \
     due_date, is_deleted, created_at, updated_at";

impl Task {
    pub async fn create(
        db: &PgPool,
        title: &str,
        description: Option<&str>,
        status: Status,
        priority: Priority,
        created_by: Uuid,
        assigned_to: Option<Uuid>,
        due_date: Option<OffsetDateTime>,
    ) -> anyhow::Result<Task> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "INSERT INTO tasks (title, description, status, priority, created_by, assigned_to, due_date) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(title)
        .bind(description)
        .bind(status.as_str())
        .bind(priority.as_str())
        .bind(created_by)
        .bind(assigned_to)
        .bind(due_date)
        .fetch_one(db)
        .await?;
        Ok(task)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND NOT is_deleted"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(task)
    }

    pub async fn list(
        db: &PgPool,
        status: Option<Status>,
        priority: Option<Priority>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Task>> {
        let pattern = search.map(|s| format!("%{s}%"));
        let tasks = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE NOT is_deleted \
               AND ($1::text IS NULL OR status = $1) \
               AND ($2::text IS NULL OR priority = $2) \
               AND ($3::text IS NULL OR title ILIKE $3 OR description ILIKE $3) \
             ORDER BY created_at DESC LIMIT $4 OFFSET $5"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(priority.map(|p| p.as_str()))
        .bind(pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;
        Ok(tasks)
    }

    pub async fn count(
        db: &PgPool,
        status: Option<Status>,
        priority: Option<Priority>,
        search: Option<&str>,
    ) -> anyhow::Result<i64> {
        let pattern = search.map(|s| format!("%{s}%"));
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM tasks \
             WHERE NOT is_deleted \
               AND ($1::text IS NULL OR status = $1) \
               AND ($2::text IS NULL OR priority = $2) \
               AND ($3::text IS NULL OR title ILIKE $3 OR description ILIKE $3)",
        )
        .bind(status.map(|s| s.as_str()))
        .bind(priority.map(|p| p.as_str()))
        .bind(pattern)
        .fetch_one(db)
        .await?;
        Ok(total)
    }

    pub async fn update(
        db: &PgPool,
        id: Uuid,
        title: Option<&str>,
        description: Option<&str>,
        status: Option<Status>,
        priority: Option<Priority>,
        assigned_to: Option<Uuid>,
        due_date: Option<OffsetDateTime>,
    ) -> anyhow::Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "UPDATE tasks SET \
               title = COALESCE($2, title), \
               description = COALESCE($3, description), \
               status = COALESCE($4, status), \
               priority = COALESCE($5, priority), \
               assigned_to = COALESCE($6, assigned_to), \
               due_date = COALESCE($7, due_date), \
               updated_at = now() \
             WHERE id = $1 AND NOT is_deleted \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(title)
        .bind(description)
        .bind(status.map(|s| s.as_str()))
        .bind(priority.map(|p| p.as_str()))
        .bind(assigned_to)
        .bind(due_date)
        .fetch_optional(db)
        .await?;
        Ok(task)
    }

    pub async fn soft_delete(db: &PgPool, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET is_deleted = TRUE, updated_at = now() \
             WHERE id = $1 AND NOT is_deleted",
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Per-status counters for the board header.
    pub async fn stats(db: &PgPool) -> anyhow::Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM tasks WHERE NOT is_deleted GROUP BY status",
        )
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}
