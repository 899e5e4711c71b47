use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::dto::Pagination;
use crate::tasks::repo_types::{Priority, Status, Task};

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    #[serde(rename = "assignedTo")]
    pub assigned_to: Option<Uuid>,
    #[serde(rename = "dueDate", default, with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    #[serde(rename = "assignedTo")]
    pub assigned_to: Option<Uuid>,
    #[serde(rename = "dueDate", default, with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub success: bool,
    pub data: Vec<Task>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct TaskDataResponse {
    pub success: bool,
    pub data: Task,
}

/// Counters behind the kanban column headers.
#[derive(Debug, Serialize)]
pub struct TaskStats {
    pub todo: i64,
    #[serde(rename = "in-progress")]
    pub in_progress: i64,
    pub done: i64,
}

#[derive(Debug, Serialize)]
pub struct TaskStatsResponse {
    pub success: bool,
    pub data: TaskStats,
}
